//! slicemgrd entry point.
//!
//! Loads configuration and service manifests, then runs the reconciliation
//! loop against the simulated fabric until interrupted.

use anyhow::Context;
use clap::Parser;
use nslice_mgrd::{
    init_logging, load_manifests, DeviceGateway, DeviceSessions, DriftDetector, JsonFileStatusSink,
    LogFormat, MemoryGateway, Orchestrator, Reconciler, SliceDaemon, SliceMgr, SliceMgrConfig,
    StatusSink,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Network slice reconciler
#[derive(Parser, Debug)]
#[command(name = "slicemgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, default_value = nslice_mgrd::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory of service manifests (JSON)
    #[arg(short = 'm', long)]
    manifests: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let format = if args.pretty { LogFormat::Pretty } else { LogFormat::Json };
    init_logging(&args.log_level, format);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("slicemgrd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = SliceMgrConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let manifests = match &args.manifests {
        Some(dir) => load_manifests(dir).context("loading manifests")?,
        None => Vec::new(),
    };

    // without an inventory, simulate every router the manifests mention
    let mut routers: BTreeSet<String> = config.devices.iter().map(|d| d.name.clone()).collect();
    if routers.is_empty() {
        routers.extend(
            manifests
                .iter()
                .flat_map(|m| m.spec.endpoints.iter().map(|ep| ep.router_name.clone())),
        );
    }
    info!(routers = routers.len(), manifests = manifests.len(), "starting slicemgrd");

    let gateway = Arc::new(MemoryGateway::with_routers(routers));
    let sessions = Arc::new(
        DeviceSessions::new(
            gateway as Arc<dyn DeviceGateway>,
            Arc::new(config.simulation_credentials()),
        )
        .with_inventory(config.inventory())
        .with_op_timeout(config.device_timeout()),
    );
    let orchestrator = Orchestrator::new(Arc::clone(&sessions))
        .with_retry(config.retry_policy())
        .with_fanout(config.reconcile.fanout);
    let detector = DriftDetector::new(sessions).with_fanout(config.reconcile.fanout);
    let sink = Arc::new(JsonFileStatusSink::new(&config.status.dir)) as Arc<dyn StatusSink>;

    let (mgr, sender) = SliceMgr::new(Reconciler::new(orchestrator, detector, sink));
    for manifest in manifests {
        sender
            .on_create(manifest.key(), manifest.spec, manifest.metadata.generation)
            .context("queueing manifest")?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => warn!(error = %e, "signal handler failed, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    let mgr = SliceDaemon::new(config.daemon_config(), mgr, shutdown_rx).run().await;
    info!(resources = mgr.len(), "slicemgrd stopped");
    drop(sender);
    Ok(())
}
