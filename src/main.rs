use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use printbridge::capabilities::{Capabilities, LogAlerts};
use printbridge::config;
use printbridge::print::poller::{self, Monitor};
use printbridge::print::registry::ConnectionRegistry;
use printbridge::print::simulation::{
    SimulatedDirectory, SimulatedJobSource, SimulatedMetering, SimulatedPrintPath,
};
use printbridge::store::MemoryLedger;

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    let registry = Arc::new(ConnectionRegistry::load(config::CONNECTIONS_FILE.as_str())?);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let mut busy_flags = Vec::new();
    let mut sessions = Vec::new();

    for connection in registry.snapshot() {
        if !connection.enabled {
            continue;
        }
        if !connection.simulation {
            // Production transports are wired in by the embedding service;
            // the bundled binary runs simulation connections only.
            warn!(
                connection = %connection.id,
                "no transport bundled for non-simulation connection; skipped"
            );
            continue;
        }

        let metering = Arc::new(SimulatedMetering::new());
        let caps = Capabilities {
            source: Arc::new(SimulatedJobSource::new()),
            metering: metering.clone(),
            ledger: Arc::new(MemoryLedger::new()),
            print_path: Arc::new(SimulatedPrintPath::completing_into(metering)),
            directory: Some(Arc::new(SimulatedDirectory)),
            alerts: Arc::new(LogAlerts),
        };

        let monitor = Monitor::new(
            connection.id.clone(),
            registry.clone(),
            caps,
            cancel_rx.clone(),
        );
        busy_flags.push(monitor.busy_flag());
        let id = connection.id.clone();
        sessions.push(tokio::spawn(async move {
            if let Err(err) = monitor.run().await {
                error!(?err, connection = %id, "monitor session ended with transport failure");
            }
        }));
    }

    if sessions.is_empty() {
        warn!("no runnable connections configured; exiting");
        return Ok(());
    }

    info!(monitors = sessions.len(), "printbridge running");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested; waiting for in-flight document work");

    cancel_tx.send(true).ok();
    poller::await_idle(&busy_flags).await;
    for session in sessions {
        session.abort();
    }
    info!("shutdown complete");
    Ok(())
}
