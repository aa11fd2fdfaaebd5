use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::capabilities::{Capabilities, JobSource, Ledger, LedgerTx, Metering, PrintPath};
use crate::config;
use crate::content;
use crate::error::Rejection;
use crate::print::allocation;
use crate::print::models::{
    Connection, Document, JobRecord, LocalUser, PrintRequest, PrintStatus, ProcessInfo,
    RecordKind, SupplierInfo,
};
use crate::print::naming;
use crate::print::reporter::StatusReporter;

/// Pipeline control: a rejection becomes a status+comment for the document,
/// a fatal error aborts the whole polling session.
enum Halt {
    Rejected(Rejection),
    Fatal(anyhow::Error),
}

impl Halt {
    fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Halt::Fatal(err.into())
    }
}

enum Plan {
    Direct { printer: String },
    Hold,
}

/// key: document-processor -> per-document intake pipeline
///
/// Resolve requester, allocate copies, download and validate content, record
/// durably, then submit or hold. Every business failure is caught here and
/// reported upstream as a status+comment; only transport failures escape.
pub struct DocumentProcessor {
    caps: Capabilities,
    reporter: Arc<StatusReporter>,
}

impl DocumentProcessor {
    pub fn new(caps: Capabilities, reporter: Arc<StatusReporter>) -> Self {
        Self { caps, reporter }
    }

    pub async fn process(&self, connection: &Connection, document: &Document) -> Result<()> {
        info!(
            connection = %connection.id,
            document = %document.id,
            title = %document.title,
            "processing document"
        );

        let (status, comment) = match self.run(connection, document).await {
            Ok(outcome) => outcome,
            Err(Halt::Rejected(rejection)) => {
                warn!(document = %document.id, %rejection, "document rejected");
                (rejection.status(), rejection.comment())
            }
            Err(Halt::Fatal(err)) => return Err(err),
        };

        // Reporting upstream is always the last action of the pipeline.
        self.reporter
            .report(connection, &document.id, status, &comment)
            .await
            .context("reporting interim document status")?;
        Ok(())
    }

    async fn run(
        &self,
        connection: &Connection,
        document: &Document,
    ) -> Result<(PrintStatus, String), Halt> {
        let username = document.requester.username.trim().to_string();

        let local_user = self.resolve_local(&username).await?;
        let metering_known = if connection.metering {
            self.caps
                .metering
                .find_user(connection, &username)
                .await
                .map_err(Halt::fatal)?
                .is_some()
        } else {
            true
        };
        if local_user.is_none() || !metering_known {
            return Err(Halt::Rejected(Rejection::UserUnknown {
                local: local_user.is_none(),
                metering: !metering_known,
            }));
        }

        let allocation = allocation::collect(&document.billing, connection.charge_to_students);
        if allocation.total_copies == 0 {
            return Err(Halt::Rejected(Rejection::NoCopies));
        }

        let download = self
            .caps
            .source
            .download(connection, &username, document)
            .await
            .map_err(Halt::fatal)?;
        let bytes = tokio::fs::read(download.path())
            .await
            .map_err(Halt::fatal)?;
        content::inspect_bytes(&bytes).map_err(Halt::Rejected)?;

        let plan = if connection.has_direct_target() {
            let printer = select_printer(connection, &document.process).ok_or_else(|| {
                Halt::Rejected(Rejection::PrinterIncompatible(
                    "no printer variant matches the requested capabilities".to_string(),
                ))
            })?;
            let supported = self
                .caps
                .print_path
                .supports_media(&printer, &document.process.paper_size)
                .await
                .map_err(Halt::fatal)?;
            if !supported {
                return Err(Halt::Rejected(Rejection::PrinterIncompatible(format!(
                    "printer {printer} has no media source for {}",
                    document.process.paper_size
                ))));
            }
            Plan::Direct { printer }
        } else {
            Plan::Hold
        };

        // Durable intake first: a crash after this commit can no longer lose
        // the job, only leave it for reconciliation to settle.
        let job_id = Uuid::new_v4();
        let initial_status = match (&plan, connection.metering) {
            (Plan::Direct { .. }, true) => PrintStatus::PendingExt,
            _ => PrintStatus::Pending,
        };
        let payload = json!({
            "copies": allocation.total_copies,
            "mediaSize": document.process.paper_size,
            "duplex": document.process.duplex,
            "color": document.process.color,
            "pages": document.process.pages,
            "users": allocation.user_class,
            "skipped": allocation.skipped_copies,
            "comment": document.comment,
        });
        let record = JobRecord {
            id: job_id,
            connection_id: connection.id.clone(),
            kind: RecordKind::Source,
            owner: username.clone(),
            title: document.title.clone(),
            supplier: Some(SupplierInfo {
                supplier: config::SUPPLIER_TAG.clone(),
                external_id: document.id.clone(),
                status: initial_status,
                payload: Some(payload),
                received_at: Utc::now(),
            }),
            linked: None,
            created_at: Utc::now(),
        };
        let transactions = if connection.metering {
            allocation::provisional_transactions(
                &allocation,
                connection.charge_to_students,
                &connection.shared_parent,
                job_id,
            )
        } else {
            Vec::new()
        };

        {
            let advisory = self.caps.ledger.advisory();
            let _write = advisory.write().await;
            let mut unit = self.caps.ledger.begin().await.map_err(Halt::fatal)?;
            unit.insert_job(&record).await.map_err(Halt::fatal)?;
            if !transactions.is_empty() {
                unit.insert_transactions(&transactions)
                    .await
                    .map_err(Halt::fatal)?;
            }
            unit.commit().await.map_err(Halt::fatal)?;
        }

        let outcome = match plan {
            Plan::Direct { printer } => {
                let job_name = naming::encode_job_name(
                    &document.title,
                    &connection.id,
                    &document.id,
                    *config::JOB_NAME_WIDTH,
                );
                let request = PrintRequest {
                    printer,
                    file: download.path().to_path_buf(),
                    copies: allocation.total_copies,
                    media: document.process.paper_size.clone(),
                    duplex: document.process.duplex,
                    color: document.process.color,
                    job_name,
                    page_range: format!("1-{}", document.process.pages),
                };
                self.caps
                    .print_path
                    .submit(&request)
                    .await
                    .map_err(Halt::fatal)?;

                if connection.metering {
                    (
                        PrintStatus::PendingExt,
                        "submitted; awaiting metering outcome".to_string(),
                    )
                } else {
                    self.finalize_unmetered(&record).await?;
                    (PrintStatus::Completed, "printed".to_string())
                }
            }
            Plan::Hold => {
                let hold_dir = Path::new(config::HOLD_DIR.as_str()).join(&connection.id);
                tokio::fs::create_dir_all(&hold_dir)
                    .await
                    .map_err(Halt::fatal)?;
                let file_name = format!("{}.prn", naming::fold_ascii(&document.id));
                tokio::fs::copy(download.path(), hold_dir.join(file_name))
                    .await
                    .map_err(Halt::fatal)?;
                (PrintStatus::Pending, "stored for local release".to_string())
            }
        };

        // `download` drops here; the temp file is removed on every path.
        Ok(outcome)
    }

    /// Without metering there is no outcome to wait for: the submission
    /// itself completes the job.
    async fn finalize_unmetered(&self, record: &JobRecord) -> Result<(), Halt> {
        let mut finished = record.clone();
        if let Some(supplier) = finished.supplier.as_mut() {
            supplier.status = PrintStatus::Completed;
            supplier.payload = None;
        }

        let advisory = self.caps.ledger.advisory();
        let _write = advisory.write().await;
        let mut unit = self.caps.ledger.begin().await.map_err(Halt::fatal)?;
        unit.lock(record.id).await.map_err(Halt::fatal)?;
        unit.update_job(&finished).await.map_err(Halt::fatal)?;
        unit.commit().await.map_err(Halt::fatal)?;
        Ok(())
    }

    async fn resolve_local(&self, username: &str) -> Result<Option<LocalUser>, Halt> {
        if username.is_empty() || config::RESERVED_USERS.contains(&username.to_ascii_lowercase())
        {
            warn!(username, "reserved or empty requester refused");
            return Ok(None);
        }
        if let Some(user) = self
            .caps
            .ledger
            .find_user(username)
            .await
            .map_err(Halt::fatal)?
        {
            return Ok(Some(user));
        }

        let Some(directory) = &self.caps.directory else {
            return Ok(None);
        };
        let Some(entry) = directory.lookup(username).await.map_err(Halt::fatal)? else {
            return Ok(None);
        };

        let user = LocalUser {
            username: entry.username,
            display_name: entry.display_name,
            role: entry.role,
        };
        let advisory = self.caps.ledger.advisory();
        let _write = advisory.write().await;
        let mut unit = self.caps.ledger.begin().await.map_err(Halt::fatal)?;
        unit.insert_user(&user).await.map_err(Halt::fatal)?;
        unit.commit().await.map_err(Halt::fatal)?;
        info!(username, "provisioned requester from directory");
        Ok(Some(user))
    }
}

/// Capability-based printer choice: duplex variant when duplex is requested
/// and configured, grayscale variant for non-color jobs when it differs from
/// the color printer, combined variant when both apply. No silent paper
/// substitution happens here; media support is checked separately.
pub fn select_printer(connection: &Connection, process: &ProcessInfo) -> Option<String> {
    let grayscale = !process.color;

    if process.duplex && grayscale {
        if let Some(printer) = &connection.printer_grayscale_duplex {
            return Some(printer.clone());
        }
    }
    if process.duplex {
        if let Some(printer) = &connection.printer_duplex {
            return Some(printer.clone());
        }
    }
    if grayscale {
        if let Some(printer) = connection
            .printer_grayscale
            .as_ref()
            .filter(|printer| connection.printer.as_ref() != Some(*printer))
        {
            return Some(printer.clone());
        }
    }
    connection.printer.clone()
}
