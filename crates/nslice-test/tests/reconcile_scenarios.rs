//! End-to-end reconciliation scenarios on the simulated fabric

use nslice_mgrd::{ConfigPath, ConfigValue, EndpointState, ErrorKind, Phase};
use nslice_test::{
    epipe_fixtures, resource_key, service_root, vpls_fixtures, vprn_fixtures, DeviceVerifier,
    StatusVerifier, TestFabric, ROUTERS,
};
use nslice_types::ServiceType;
use pretty_assertions::assert_eq;

fn set_counts(fabric: &TestFabric) -> Vec<u64> {
    ROUTERS.iter().map(|r| fabric.gateway.set_count(r)).collect()
}

/// The two-router VPLS provisions to Active with both endpoints applied.
#[tokio::test(start_paused = true)]
async fn test_vpls_example_goes_active() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let key = resource_key("blue");
    fabric.create(&key, vpls_fixtures::vpls_blue());
    fabric.settle().await;

    let status = StatusVerifier::new(&fabric);
    status.assert_phase(&key, Phase::Active)?;
    status.assert_router_state(&key, "SR1", EndpointState::Applied)?;
    status.assert_router_state(&key, "SR2", EndpointState::Applied)?;

    let devices = DeviceVerifier::new(&fabric);
    let root = service_root(ServiceType::Vpls, "blue");
    devices.assert_value("SR1", &root.child("service-id"), &ConfigValue::Number(7001))?;
    devices.assert_present("SR1", &ConfigPath::new(format!("{}/mesh-sdp[sdp-bind-id=7002:7001]", root)))?;
    devices.assert_present("SR2", &ConfigPath::new(format!("{}/sap[sap-id=1/1/c2/1:702]", root)))?;
    devices.assert_absent("SR3", &root)?;

    let doc = serde_json::to_value(fabric.status(&key).unwrap())?;
    assert_eq!(doc["phase"], "Active");
    assert_eq!(doc["generation"], 1);
    assert_eq!(doc["perEndpoint"].as_array().unwrap().len(), 2);
    Ok(())
}

/// Applying then checking drift finds nothing, for every service type.
#[tokio::test(start_paused = true)]
async fn test_no_spurious_drift_after_apply() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let services = [
        ("blue", vpls_fixtures::vpls_blue()),
        ("red", epipe_fixtures::epipe_red()),
        ("gold", vprn_fixtures::vprn_gold()),
    ];
    for (name, spec) in services.clone() {
        fabric.create(&resource_key(name), spec);
    }
    fabric.settle().await;
    let before = set_counts(&fabric);

    fabric.drift_cycle().await;
    for (name, _) in &services {
        let key = resource_key(name);
        StatusVerifier::new(&fabric).assert_phase(&key, Phase::Active)?;
        assert!(fabric.record(&key).unwrap().pending_heal.is_empty());
    }
    assert_eq!(set_counts(&fabric), before);
    Ok(())
}

/// An ePipe without exactly two endpoints never reaches a device.
#[tokio::test(start_paused = true)]
async fn test_invalid_epipe_is_error_without_writes() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let key = resource_key("bad-pw");
    fabric.create(&key, epipe_fixtures::epipe_with_endpoints(3));
    fabric.settle().await;

    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Error)?;
    let record = fabric.record(&key).unwrap();
    assert!(record
        .endpoints
        .values()
        .all(|s| s.last_error.as_ref().map(|e| e.kind) == Some(ErrorKind::InvalidSpec)));
    assert_eq!(set_counts(&fabric), vec![0, 0, 0, 0]);
    Ok(())
}

/// SR1 succeeds, SR2 is unreachable: Degraded, and SR1 keeps its config.
#[tokio::test(start_paused = true)]
async fn test_partial_failure_is_degraded_without_rollback() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    fabric.gateway.set_reachable("SR2", false);
    let key = resource_key("blue");
    fabric.create(&key, vpls_fixtures::vpls_blue());
    fabric.settle().await;

    let status = StatusVerifier::new(&fabric);
    status.assert_phase(&key, Phase::Degraded)?;
    status.assert_router_state(&key, "SR1", EndpointState::Applied)?;
    status.assert_router_state(&key, "SR2", EndpointState::Failed)?;

    let root = service_root(ServiceType::Vpls, "blue");
    DeviceVerifier::new(&fabric).assert_present("SR1", &root)?;
    let sr2_error = fabric.record(&key).unwrap().endpoints
        [&vpls_fixtures::vpls_blue().endpoints[1].key()]
        .last_error
        .clone()
        .unwrap();
    assert_eq!(sr2_error.kind, ErrorKind::Connection);

    // the failed device converges once it is back
    fabric.gateway.set_reachable("SR2", true);
    fabric.resync_cycle().await;
    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Active)?;
    DeviceVerifier::new(&fabric).assert_present("SR2", &root)?;
    Ok(())
}

/// Removing a managed path out of band degrades the service until the heal
/// puts exactly that path back.
#[tokio::test(start_paused = true)]
async fn test_drift_heals_without_touching_foreign_config() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let key = resource_key("green");
    let foreign = ConfigPath::new("/configure/system/name");
    fabric.gateway.set_raw("SR1", foreign, ConfigValue::text("pe-sr1"));
    fabric.create(&key, vpls_fixtures::vpls_green());
    fabric.create(&resource_key("blue"), vpls_fixtures::vpls_blue());
    fabric.settle().await;

    let root = service_root(ServiceType::Vpls, "green");
    let sdp = ConfigPath::new(format!("{}/mesh-sdp[sdp-bind-id=7102:7100]", root));
    let before = fabric.gateway.config_of("SR1");
    fabric.gateway.remove_path("SR1", &sdp);

    fabric.drift_cycle().await;

    let phases = fabric.sink.phases(&key);
    assert_eq!(&phases[phases.len() - 2..], &[Phase::Degraded, Phase::Active]);
    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Active)?;
    let devices = DeviceVerifier::new(&fabric);
    devices.assert_present("SR1", &sdp)?;
    devices.assert_untouched_outside("SR1", &root, &before)?;
    assert_eq!(fabric.gateway.config_of("SR1"), before);
    Ok(())
}

/// A changed value is restored to the last applied intent, not adopted.
#[tokio::test(start_paused = true)]
async fn test_drifted_value_restored_to_intent() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let key = resource_key("gold");
    fabric.create(&key, vprn_fixtures::vprn_gold());
    fabric.settle().await;

    let rd = service_root(ServiceType::Vprn, "gold").child("bgp-ipvpn/mpls/route-distinguisher");
    fabric.gateway.set_raw("SR3", rd.clone(), ConfigValue::text("65000:1"));
    fabric.drift_cycle().await;

    DeviceVerifier::new(&fabric).assert_value("SR3", &rd, &ConfigValue::text("64496:9001"))?;
    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Active)?;
    Ok(())
}

/// An unreachable device during a drift check is Unknown, not drift.
#[tokio::test(start_paused = true)]
async fn test_unreachable_during_drift_check_does_not_heal() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let key = resource_key("red");
    fabric.create(&key, epipe_fixtures::epipe_red());
    fabric.settle().await;
    let before = set_counts(&fabric);

    fabric.gateway.set_reachable("SR4", false);
    fabric.drift_cycle().await;

    let status = StatusVerifier::new(&fabric);
    status.assert_router_state(&key, "SR4", EndpointState::Unknown)?;
    status.assert_phase(&key, Phase::Active)?;
    assert_eq!(set_counts(&fabric), before);
    Ok(())
}

/// Deleting with one endpoint unreachable stays in Deleting until that
/// device's teardown succeeds.
#[tokio::test(start_paused = true)]
async fn test_delete_waits_for_every_device() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let key = resource_key("blue");
    let root = service_root(ServiceType::Vpls, "blue");
    fabric.create(&key, vpls_fixtures::vpls_blue());
    fabric.settle().await;

    fabric.gateway.set_reachable("SR2", false);
    fabric.delete(&key);
    fabric.settle().await;

    for _ in 0..3 {
        StatusVerifier::new(&fabric).assert_phase(&key, Phase::Deleting)?;
        fabric.drift_cycle().await;
        fabric.resync_cycle().await;
    }
    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Deleting)?;
    DeviceVerifier::new(&fabric).assert_absent("SR1", &root)?;
    assert_eq!(fabric.mgr.len(), 1);

    fabric.gateway.set_reachable("SR2", true);
    fabric.resync_cycle().await;
    assert!(fabric.record(&key).is_none());
    assert!(fabric.status(&key).is_none());
    DeviceVerifier::new(&fabric).assert_absent("SR2", &root)?;
    Ok(())
}

/// Dropping a site removes the service from that router only.
#[tokio::test(start_paused = true)]
async fn test_update_removes_dropped_site() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let key = resource_key("blue");
    let root = service_root(ServiceType::Vpls, "blue");
    fabric.create(&key, vpls_fixtures::vpls_blue_three_sites());
    fabric.settle().await;
    DeviceVerifier::new(&fabric).assert_present("SR3", &root)?;

    fabric.update(&key, vpls_fixtures::vpls_blue());
    fabric.settle().await;

    let devices = DeviceVerifier::new(&fabric);
    devices.assert_absent("SR3", &root)?;
    devices.assert_absent("SR1", &ConfigPath::new(format!("{}/mesh-sdp[sdp-bind-id=7003:7001]", root)))?;
    devices.assert_present("SR1", &ConfigPath::new(format!("{}/mesh-sdp[sdp-bind-id=7002:7001]", root)))?;
    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Active)?;
    assert_eq!(fabric.record(&key).unwrap().generation, 2);
    Ok(())
}

/// An SDP id already bound on a router by another service is rejected.
#[tokio::test(start_paused = true)]
async fn test_sdp_collision_across_services_rejected() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    fabric.create(&resource_key("blue"), vpls_fixtures::vpls_blue());
    fabric.settle().await;

    let key = resource_key("orange");
    fabric.create(&key, vpls_fixtures::vpls_sdp_collision());
    fabric.settle().await;

    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Error)?;
    let last_error = fabric.status(&key).unwrap().last_error.unwrap();
    assert!(last_error.contains("SDP 7001 on SR1"), "{}", last_error);
    assert_eq!(fabric.gateway.set_count("SR4"), 0);
    StatusVerifier::new(&fabric).assert_phase(&resource_key("blue"), Phase::Active)?;
    Ok(())
}

/// Transient write failures are retried inside the cycle.
#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried_within_cycle() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    fabric.gateway.fail_next_sets("SR1", 1, true);
    let key = resource_key("red");
    fabric.create(&key, epipe_fixtures::epipe_red());
    fabric.settle().await;

    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Active)?;
    Ok(())
}

/// A drift check reports the service's operational state apart from the
/// phase: one router down makes the service DOWN, an unreadable one UNKNOWN.
#[tokio::test(start_paused = true)]
async fn test_operational_status_reported_apart_from_phase() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let key = resource_key("blue");
    fabric.create(&key, vpls_fixtures::vpls_blue());
    fabric.settle().await;

    fabric.drift_cycle().await;
    let doc = serde_json::to_value(fabric.status(&key).unwrap())?;
    assert_eq!(doc["operationalStatus"], "UP");

    fabric.gateway.set_oper_state("SR2", 7001, "down");
    fabric.drift_cycle().await;
    let doc = serde_json::to_value(fabric.status(&key).unwrap())?;
    assert_eq!(doc["phase"], "Active");
    assert_eq!(doc["operationalStatus"], "DOWN");
    assert_eq!(doc["perEndpoint"][0]["operState"], "UP");
    assert_eq!(doc["perEndpoint"][1]["operState"], "DOWN");

    fabric.gateway.set_oper_state("SR2", 7001, "up");
    fabric.gateway.set_reachable("SR1", false);
    fabric.drift_cycle().await;
    let doc = serde_json::to_value(fabric.status(&key).unwrap())?;
    assert_eq!(doc["operationalStatus"], "UNKNOWN");
    Ok(())
}

/// A service deleted and created again under the same name converges, and
/// its drift checks keep running.
#[tokio::test(start_paused = true)]
async fn test_recreated_service_converges() -> anyhow::Result<()> {
    let mut fabric = TestFabric::new();
    let key = resource_key("blue");
    fabric.create(&key, vpls_fixtures::vpls_blue());
    fabric.settle().await;

    fabric.delete(&key);
    fabric.create(&key, vpls_fixtures::vpls_blue());
    fabric.settle().await;
    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Active)?;

    let root = service_root(ServiceType::Vpls, "blue");
    fabric
        .gateway
        .set_raw("SR1", root.child("admin-state"), ConfigValue::text("disable"));
    fabric.drift_cycle().await;
    DeviceVerifier::new(&fabric).assert_value("SR1", &root.child("admin-state"), &ConfigValue::text("enable"))?;
    StatusVerifier::new(&fabric).assert_phase(&key, Phase::Active)?;
    Ok(())
}
