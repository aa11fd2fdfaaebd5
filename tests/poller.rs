mod common;

use std::sync::Arc;
use std::sync::Once;

use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use common::{connection, document, teacher_entry, Harness};
use printbridge::capabilities::{Capabilities, LogAlerts};
use printbridge::error::SourceError;
use printbridge::print::models::PrintStatus;
use printbridge::print::poller::Monitor;
use printbridge::print::registry::ConnectionRegistry;
use printbridge::print::simulation::{
    SimulatedDirectory, SimulatedJobSource, SimulatedMetering, SimulatedPrintPath,
};
use printbridge::store::MemoryLedger;

fn init_env() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        std::env::set_var("PB_HEARTBEAT_SECS", "1");
        std::env::set_var("PB_RECONCILE_EVERY", "1");
    });
}

#[tokio::test(start_paused = true)]
async fn rate_limited_cycle_continues_and_processes_next_heartbeat() {
    init_env();
    let harness = Harness::new();
    harness.seed_local_user("rivera").await;
    harness
        .source
        .queue_fetch(Err(SourceError::RateLimited))
        .await;
    harness
        .source
        .queue_fetch(Ok(vec![document(
            "41",
            "essay",
            "rivera",
            vec![teacher_entry("rivera", 1)],
        )]))
        .await;

    let registry = Arc::new(ConnectionRegistry::new());
    registry.upsert(connection("c1"));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let monitor = Monitor::new(
        "c1".to_string(),
        registry.clone(),
        harness.caps.clone(),
        cancel_rx,
    );
    let handle = tokio::spawn(monitor.run());

    sleep(Duration::from_secs(3)).await;
    cancel_tx.send(true).unwrap();
    let result = handle.await.unwrap();
    assert!(result.is_ok());

    let reports = harness.source.reports().await;
    assert!(reports
        .iter()
        .any(|report| report.0 == "41" && report.1 == PrintStatus::PendingExt));
}

#[tokio::test(start_paused = true)]
async fn connectivity_failure_aborts_the_session() {
    init_env();
    let harness = Harness::new();
    harness
        .source
        .queue_fetch(Err(SourceError::Connectivity("portal unreachable".to_string())))
        .await;

    let registry = Arc::new(ConnectionRegistry::new());
    registry.upsert(connection("c1"));
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let monitor = Monitor::new(
        "c1".to_string(),
        registry,
        harness.caps.clone(),
        cancel_rx,
    );

    let result = tokio::spawn(monitor.run()).await.unwrap();
    assert!(result.is_err());
    assert!(harness.source.reports().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn metering_toggle_change_ends_the_session() {
    init_env();
    let harness = Harness::new();

    let registry = Arc::new(ConnectionRegistry::new());
    registry.upsert(connection("c1"));
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let monitor = Monitor::new(
        "c1".to_string(),
        registry.clone(),
        harness.caps.clone(),
        cancel_rx,
    );
    let handle = tokio::spawn(monitor.run());

    sleep(Duration::from_millis(500)).await;
    let mut toggled = connection("c1");
    toggled.metering = false;
    registry.upsert(toggled);

    sleep(Duration::from_secs(2)).await;
    assert!(handle.is_finished());
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn disabled_connection_ends_the_session() {
    init_env();
    let harness = Harness::new();

    let registry = Arc::new(ConnectionRegistry::new());
    registry.upsert(connection("c1"));
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let monitor = Monitor::new(
        "c1".to_string(),
        registry.clone(),
        harness.caps.clone(),
        cancel_rx,
    );
    let handle = tokio::spawn(monitor.run());

    sleep(Duration::from_millis(500)).await;
    let mut disabled = connection("c1");
    disabled.enabled = false;
    registry.upsert(disabled);

    sleep(Duration::from_secs(2)).await;
    assert!(handle.is_finished());
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn simulation_round_trip_completes_and_charges() {
    init_env();
    let mut conn = connection("sim");
    conn.simulation = true;
    let registry = Arc::new(ConnectionRegistry::new());
    registry.upsert(conn);

    let metering = Arc::new(SimulatedMetering::new());
    let source = Arc::new(SimulatedJobSource::new());
    let caps = Capabilities {
        source: source.clone(),
        metering: metering.clone(),
        ledger: Arc::new(MemoryLedger::new()),
        print_path: Arc::new(SimulatedPrintPath::completing_into(metering.clone())),
        directory: Some(Arc::new(SimulatedDirectory)),
        alerts: Arc::new(LogAlerts),
    };
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let monitor = Monitor::new("sim".to_string(), registry, caps, cancel_rx);
    let handle = tokio::spawn(monitor.run());

    sleep(Duration::from_secs(4)).await;
    cancel_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let reports = source.reports().await;
    assert!(reports
        .iter()
        .any(|report| report.0 == "101" && report.1 == PrintStatus::PendingExt));
    assert!(reports
        .iter()
        .any(|report| report.0 == "101" && report.1 == PrintStatus::Completed));
    assert!(reports
        .iter()
        .any(|report| report.0 == "102" && report.1 == PrintStatus::Completed));

    // 3 copies at 0.05 for document 101 split 1:2, 5 copies for document 102.
    assert_eq!(metering.balance("alice").await, dec!(-0.05));
    assert_eq!(metering.balance("bob").await, dec!(-0.10));
    assert_eq!(metering.balance("rivera").await, dec!(-0.25));
    assert_eq!(metering.shared_balance("print", "jobs").await, dec!(-0.40));
}
