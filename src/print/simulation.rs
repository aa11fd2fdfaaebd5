use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::info;

use crate::capabilities::{DirectorySource, JobSource, Metering, PrintPath};
use crate::error::{MeterError, PrintError, SourceError, StoreError};
use crate::print::models::{
    BillingEntry, Connection, DirectoryUser, Document, MeterIdentity, PrintRequest, PrintStatus,
    ProcessInfo, Requester, UsageLogEntry,
};

const CANNED_PDF: &[u8] =
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF\n";

/// key: simulated-job-source -> canned portal for demos and tests
///
/// Satisfies the same capability contract as the production transport:
/// deterministic pending batches, canned PDF content, recorded status
/// reports.
#[derive(Default)]
pub struct SimulatedJobSource {
    batches: Mutex<Vec<Vec<Document>>>,
    reports: Mutex<Vec<(String, PrintStatus, String)>>,
}

impl SimulatedJobSource {
    pub fn new() -> Self {
        Self::with_batches(vec![demo_batch()])
    }

    /// Batches are handed out once each, in order; later fetches are empty.
    pub fn with_batches(batches: Vec<Vec<Document>>) -> Self {
        let mut stack = batches;
        stack.reverse();
        Self {
            batches: Mutex::new(stack),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub async fn reports(&self) -> Vec<(String, PrintStatus, String)> {
        self.reports.lock().await.clone()
    }
}

#[async_trait]
impl JobSource for SimulatedJobSource {
    async fn fetch_pending(&self, _connection: &Connection) -> Result<Vec<Document>, SourceError> {
        Ok(self.batches.lock().await.pop().unwrap_or_default())
    }

    async fn download(
        &self,
        _connection: &Connection,
        _username: &str,
        _document: &Document,
    ) -> Result<NamedTempFile, SourceError> {
        let mut file =
            NamedTempFile::new().map_err(|err| SourceError::Protocol(err.to_string()))?;
        file.write_all(CANNED_PDF)
            .and_then(|()| file.flush())
            .map_err(|err| SourceError::Protocol(err.to_string()))?;
        Ok(file)
    }

    async fn report_status(
        &self,
        _connection: &Connection,
        document_id: &str,
        status: PrintStatus,
        comment: &str,
    ) -> Result<(), SourceError> {
        info!(document_id, status = status.as_str(), comment, "simulated status report");
        self.reports
            .lock()
            .await
            .push((document_id.to_string(), status, comment.to_string()));
        Ok(())
    }
}

pub fn demo_batch() -> Vec<Document> {
    vec![
        Document {
            id: "101".to_string(),
            title: "Klassenarbeit Übungsblatt".to_string(),
            comment: Some("second period".to_string()),
            requester: Requester {
                username: "rivera".to_string(),
                role: "TEACHER".to_string(),
            },
            process: ProcessInfo {
                paper_size: "A4".to_string(),
                duplex: true,
                color: false,
                pages: 2,
            },
            billing: vec![
                BillingEntry {
                    username: "alice".to_string(),
                    role: "STUDENT".to_string(),
                    class: Some("1A".to_string()),
                    copies: 1,
                    extra: 0,
                },
                BillingEntry {
                    username: "bob".to_string(),
                    role: "STUDENT".to_string(),
                    class: Some("1A".to_string()),
                    copies: 1,
                    extra: 1,
                },
            ],
        },
        Document {
            id: "102".to_string(),
            title: "staff meeting agenda".to_string(),
            comment: None,
            requester: Requester {
                username: "rivera".to_string(),
                role: "TEACHER".to_string(),
            },
            process: ProcessInfo {
                paper_size: "A4".to_string(),
                duplex: false,
                color: true,
                pages: 1,
            },
            billing: vec![BillingEntry {
                username: "rivera".to_string(),
                role: "TEACHER".to_string(),
                class: None,
                copies: 5,
                extra: 0,
            }],
        },
    ]
}

/// In-memory metering stand-in: balances, shared accounts and a scriptable
/// usage log.
#[derive(Default)]
pub struct SimulatedMetering {
    accounts: Mutex<HashMap<String, Decimal>>,
    shared: Mutex<HashMap<String, Decimal>>,
    usage: Mutex<Vec<UsageLogEntry>>,
}

impl SimulatedMetering {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_usage(&self, entry: UsageLogEntry) {
        self.usage.lock().await.push(entry);
    }

    pub async fn balance(&self, username: &str) -> Decimal {
        self.accounts
            .lock()
            .await
            .get(username)
            .copied()
            .unwrap_or_default()
    }

    pub async fn shared_balance(&self, parent: &str, name: &str) -> Decimal {
        self.shared
            .lock()
            .await
            .get(&format!("{parent}/{name}"))
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Metering for SimulatedMetering {
    async fn find_user(
        &self,
        _connection: &Connection,
        username: &str,
    ) -> Result<Option<MeterIdentity>, MeterError> {
        Ok((!username.is_empty()).then(|| MeterIdentity {
            username: username.to_string(),
        }))
    }

    async fn usage_log(
        &self,
        _connection: &Connection,
        document_names: &[String],
    ) -> Result<Vec<UsageLogEntry>, MeterError> {
        let usage = self.usage.lock().await;
        Ok(usage
            .iter()
            .filter(|entry| document_names.contains(&entry.document_name))
            .cloned()
            .collect())
    }

    async fn adjust_account(
        &self,
        _connection: &Connection,
        username: &str,
        delta: Decimal,
        comment: &str,
    ) -> Result<Decimal, MeterError> {
        let mut accounts = self.accounts.lock().await;
        let balance = accounts.entry(username.to_string()).or_default();
        *balance += delta;
        info!(username, %delta, comment, "simulated account adjustment");
        Ok(*balance)
    }

    async fn adjust_shared_account(
        &self,
        _connection: &Connection,
        parent: &str,
        name: &str,
        delta: Decimal,
        comment: &str,
    ) -> Result<(), MeterError> {
        let mut shared = self.shared.lock().await;
        *shared.entry(format!("{parent}/{name}")).or_default() += delta;
        info!(parent, name, %delta, comment, "simulated shared-account adjustment");
        Ok(())
    }
}

/// Accepts every submission and every media size. When wired to a
/// `SimulatedMetering` it immediately writes a printed usage-log entry, which
/// closes the loop for end-to-end simulation runs.
#[derive(Default)]
pub struct SimulatedPrintPath {
    metering: Option<Arc<SimulatedMetering>>,
    cost_per_copy: Decimal,
    submissions: Mutex<Vec<PrintRequest>>,
}

impl SimulatedPrintPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completing_into(metering: Arc<SimulatedMetering>) -> Self {
        Self {
            metering: Some(metering),
            cost_per_copy: Decimal::new(5, 2),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub async fn submissions(&self) -> Vec<PrintRequest> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl PrintPath for SimulatedPrintPath {
    async fn supports_media(&self, _printer: &str, _paper_size: &str) -> Result<bool, PrintError> {
        Ok(true)
    }

    async fn submit(&self, request: &PrintRequest) -> Result<(), PrintError> {
        info!(
            printer = %request.printer,
            job_name = %request.job_name,
            copies = request.copies,
            "simulated print submission"
        );
        if let Some(metering) = &self.metering {
            metering
                .push_usage(UsageLogEntry {
                    document_name: request.job_name.clone(),
                    printed: true,
                    denied_reason: None,
                    usage_cost: self.cost_per_copy * Decimal::from(request.copies),
                })
                .await;
        }
        self.submissions.lock().await.push(request.clone());
        Ok(())
    }
}

/// Directory stand-in that provisions any plausible account name.
pub struct SimulatedDirectory;

#[async_trait]
impl DirectorySource for SimulatedDirectory {
    async fn lookup(&self, username: &str) -> Result<Option<DirectoryUser>, StoreError> {
        Ok((!username.is_empty()).then(|| DirectoryUser {
            username: username.to_string(),
            display_name: username.to_string(),
            role: "MEMBER".to_string(),
        }))
    }
}
