use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::capabilities::JobSource;
use crate::error::SourceError;
use crate::print::models::{Connection, PrintStatus};

/// key: status-reporter -> idempotent feedback channel to the job source
///
/// The upstream channel tolerates repeats, but identical reports are still
/// suppressed so reconciliation passes over an unchanged snapshot stay free
/// of side effects.
pub struct StatusReporter {
    source: Arc<dyn JobSource>,
    reported: DashMap<String, (PrintStatus, String)>,
}

impl StatusReporter {
    pub fn new(source: Arc<dyn JobSource>) -> Self {
        Self {
            source,
            reported: DashMap::new(),
        }
    }

    pub async fn report(
        &self,
        connection: &Connection,
        document_id: &str,
        status: PrintStatus,
        comment: &str,
    ) -> Result<(), SourceError> {
        let key = format!("{}/{}", connection.id, document_id);
        if let Some(previous) = self.reported.get(&key) {
            if previous.0 == status && previous.1 == comment {
                debug!(document_id, status = status.as_str(), "status already reported");
                return Ok(());
            }
        }

        self.source
            .report_status(connection, document_id, status, comment)
            .await?;
        self.reported
            .insert(key, (status, comment.to_string()));
        Ok(())
    }
}
