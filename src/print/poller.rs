use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::capabilities::{Capabilities, JobSource};
use crate::config;
use crate::error::SourceError;
use crate::print::processor::DocumentProcessor;
use crate::print::reconciliation::UsageReconciler;
use crate::print::registry::ConnectionRegistry;
use crate::print::reporter::StatusReporter;

/// key: job-ticket-poller -> one monitor session per connection
///
/// Fetches pending documents on a fixed heartbeat and drives the processor
/// strictly sequentially. Cancellation is cooperative: the flag is read only
/// between heartbeats and between documents, never mid-document. A transport
/// failure ends the session; the caller reconnects with a fresh monitor.
pub struct Monitor {
    connection_id: String,
    registry: Arc<ConnectionRegistry>,
    caps: Capabilities,
    processor: DocumentProcessor,
    reconciler: UsageReconciler,
    busy: Arc<AtomicBool>,
    cancel: watch::Receiver<bool>,
}

impl Monitor {
    pub fn new(
        connection_id: String,
        registry: Arc<ConnectionRegistry>,
        caps: Capabilities,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let reporter = Arc::new(StatusReporter::new(caps.source.clone()));
        let processor = DocumentProcessor::new(caps.clone(), reporter.clone());
        let reconciler = UsageReconciler::new(caps.clone(), reporter);
        Self {
            connection_id,
            registry,
            caps,
            processor,
            reconciler,
            busy: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    /// Processing-in-progress marker polled by shutdown before connections
    /// are released.
    pub fn busy_flag(&self) -> Arc<AtomicBool> {
        self.busy.clone()
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub async fn run(self) -> Result<()> {
        let Some(initial) = self.registry.get(&self.connection_id) else {
            warn!(connection = %self.connection_id, "connection missing from registry");
            return Ok(());
        };
        let metering_at_start = initial.metering;
        info!(
            connection = %self.connection_id,
            simulation = initial.simulation,
            "monitor session started"
        );

        let started = time::Instant::now();
        let mut ticker = time::interval(Duration::from_secs(*config::HEARTBEAT_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut beats: u64 = 0;

        loop {
            ticker.tick().await;

            if self.cancelled() {
                info!(connection = %self.connection_id, "monitor cancelled");
                return Ok(());
            }
            let bound = *config::SESSION_MAX_SECS;
            if bound > 0 && started.elapsed() >= Duration::from_secs(bound) {
                info!(connection = %self.connection_id, "session duration bound reached");
                return Ok(());
            }

            let Some(connection) = self.registry.get(&self.connection_id) else {
                info!(connection = %self.connection_id, "connection removed; monitor exits");
                return Ok(());
            };
            if !connection.enabled {
                info!(connection = %self.connection_id, "connection disabled; monitor exits");
                return Ok(());
            }
            if connection.metering != metering_at_start {
                // Capability wiring depends on the toggle; adapting live is
                // not supported.
                warn!(
                    connection = %self.connection_id,
                    "metering integration toggle changed; monitor restart required"
                );
                return Ok(());
            }

            match self.caps.source.fetch_pending(&connection).await {
                Ok(documents) => {
                    let _busy = BusyGuard::hold(&self.busy);
                    for document in &documents {
                        if self.cancelled() {
                            info!("cancellation honored between documents");
                            return Ok(());
                        }
                        self.processor.process(&connection, document).await?;
                    }
                }
                Err(SourceError::RateLimited) => {
                    warn!(connection = %self.connection_id, "job source rate limited; retrying next heartbeat");
                }
                Err(err) => return Err(err.into()),
            }

            beats += 1;
            if beats % *config::RECONCILE_EVERY == 0 {
                let _busy = BusyGuard::hold(&self.busy);
                self.reconciler.run_pass(&connection).await?;
            }
        }
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn hold(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag.clone())
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Polls the processing-in-progress flags with bounded sleeps until every
/// monitor is between documents.
pub async fn await_idle(flags: &[Arc<AtomicBool>]) {
    for flag in flags {
        while flag.load(Ordering::SeqCst) {
            time::sleep(Duration::from_millis(*config::SHUTDOWN_POLL_MS)).await;
        }
    }
}
