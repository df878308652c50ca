//! Compiler properties checked through the public API

use nslice_mgrd::{compile, intended_config, CompileError, DeviceOps};
use nslice_test::{epipe_fixtures, vpls_fixtures, vprn_fixtures};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn count_entries(op: &DeviceOps, pattern: &str) -> usize {
    op.updates
        .iter()
        .filter(|e| {
            let path = e.path.as_str();
            path.ends_with(']') && path.rsplit('/').any(|seg| seg.starts_with(pattern))
        })
        .count()
}

#[test]
fn test_compile_is_byte_identical_across_calls() {
    for spec in [
        vpls_fixtures::vpls_blue(),
        vpls_fixtures::vpls_blue_three_sites(),
        epipe_fixtures::epipe_red(),
        vprn_fixtures::vprn_gold(),
    ] {
        let first = serde_json::to_vec(&intended_config(&spec).unwrap()).unwrap();
        let second = serde_json::to_vec(&intended_config(&spec).unwrap()).unwrap();
        assert_eq!(first, second, "{}", spec.service_name);
    }
}

#[test]
fn test_epipe_endpoint_count_must_be_two() {
    for count in [0, 1, 3, 4] {
        let spec = epipe_fixtures::epipe_with_endpoints(count);
        assert!(
            matches!(intended_config(&spec), Err(CompileError::InvalidSpec { .. })),
            "{} endpoints accepted",
            count
        );
    }
    assert!(intended_config(&epipe_fixtures::epipe_with_endpoints(2)).is_ok());
}

#[test]
fn test_vpls_example_compiles_to_two_device_op_sets() {
    let compiled = compile(&vpls_fixtures::vpls_blue(), &BTreeMap::new()).unwrap();
    let routers: Vec<&str> = compiled.ops.iter().map(|op| op.router.as_str()).collect();
    assert_eq!(routers, vec!["SR1", "SR2"]);

    for op in &compiled.ops {
        assert!(op.deletes.is_empty());
        assert_eq!(
            op.updates[0].path.as_str(),
            "/configure/service/vpls[service-name=blue]"
        );
        assert_eq!(count_entries(op, "sap["), 1, "{}", op.router);
        assert_eq!(count_entries(op, "mesh-sdp["), 1, "{}", op.router);
    }
}

#[test]
fn test_replan_after_removing_a_site_deletes_only_that_device() {
    let three = intended_config(&vpls_fixtures::vpls_blue_three_sites()).unwrap();
    let prior: BTreeMap<String, _> = three
        .iter()
        .map(|(router, config)| (router.clone(), config.clone()))
        .collect();
    let compiled = compile(&vpls_fixtures::vpls_blue(), &prior).unwrap();

    let sr3 = compiled.ops.iter().find(|op| op.router == "SR3").unwrap();
    assert!(sr3.is_delete_only());
    assert_eq!(
        sr3.deletes[0].as_str(),
        "/configure/service/vpls[service-name=blue]"
    );

    let sr1 = compiled.ops.iter().find(|op| op.router == "SR1").unwrap();
    assert_eq!(
        sr1.deletes.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
        vec!["/configure/service/vpls[service-name=blue]/mesh-sdp[sdp-bind-id=7003:7001]"]
    );
}
