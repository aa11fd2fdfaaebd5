#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use uuid::Uuid;

use printbridge::capabilities::{
    AlertSink, Capabilities, DirectorySource, JobSource, Ledger, LedgerTx, Metering, PrintPath,
};
use printbridge::error::{MeterError, PrintError, SourceError, StoreError};
use printbridge::print::models::{
    AccountRef, AccountTransaction, BillingEntry, Connection, DirectoryUser, Document, JobRecord,
    LocalUser, MeterIdentity, PrintRequest, PrintStatus, ProcessInfo, RecordKind, Requester,
    SupplierInfo, UsageLogEntry,
};
use printbridge::store::MemoryLedger;

pub fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n".to_vec()
}

pub struct ScriptedJobSource {
    fetches: Mutex<VecDeque<Result<Vec<Document>, SourceError>>>,
    content: Mutex<Vec<u8>>,
    reports: Mutex<Vec<(String, PrintStatus, String)>>,
}

impl ScriptedJobSource {
    pub fn new() -> Self {
        Self {
            fetches: Mutex::new(VecDeque::new()),
            content: Mutex::new(pdf_bytes()),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub async fn queue_fetch(&self, result: Result<Vec<Document>, SourceError>) {
        self.fetches.lock().await.push_back(result);
    }

    pub async fn set_content(&self, bytes: Vec<u8>) {
        *self.content.lock().await = bytes;
    }

    pub async fn reports(&self) -> Vec<(String, PrintStatus, String)> {
        self.reports.lock().await.clone()
    }
}

#[async_trait]
impl JobSource for ScriptedJobSource {
    async fn fetch_pending(&self, _connection: &Connection) -> Result<Vec<Document>, SourceError> {
        self.fetches
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn download(
        &self,
        _connection: &Connection,
        _username: &str,
        _document: &Document,
    ) -> Result<NamedTempFile, SourceError> {
        let mut file =
            NamedTempFile::new().map_err(|err| SourceError::Protocol(err.to_string()))?;
        let bytes = self.content.lock().await.clone();
        file.write_all(&bytes)
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
        self.reports
            .lock()
            .await
            .push((document_id.to_string(), status, comment.to_string()));
        Ok(())
    }
}

pub struct MockMetering {
    accept_all_users: bool,
    users: HashSet<String>,
    usage: Mutex<Vec<UsageLogEntry>>,
    personal: Mutex<Vec<(String, Decimal, String)>>,
    shared: Mutex<Vec<(String, String, Decimal, String)>>,
    balances: Mutex<HashMap<String, Decimal>>,
}

impl MockMetering {
    pub fn accepting_everyone() -> Self {
        Self {
            accept_all_users: true,
            users: HashSet::new(),
            usage: Mutex::new(Vec::new()),
            personal: Mutex::new(Vec::new()),
            shared: Mutex::new(Vec::new()),
            balances: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_users(users: &[&str]) -> Self {
        let mut metering = Self::accepting_everyone();
        metering.accept_all_users = false;
        metering.users = users.iter().map(|user| (*user).to_string()).collect();
        metering
    }

    pub async fn push_usage(&self, entry: UsageLogEntry) {
        self.usage.lock().await.push(entry);
    }

    pub async fn personal_adjustments(&self) -> Vec<(String, Decimal, String)> {
        self.personal.lock().await.clone()
    }

    pub async fn shared_adjustments(&self) -> Vec<(String, String, Decimal, String)> {
        self.shared.lock().await.clone()
    }
}

#[async_trait]
impl Metering for MockMetering {
    async fn find_user(
        &self,
        _connection: &Connection,
        username: &str,
    ) -> Result<Option<MeterIdentity>, MeterError> {
        let known = self.accept_all_users || self.users.contains(username);
        Ok(known.then(|| MeterIdentity {
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
        let mut balances = self.balances.lock().await;
        let balance = balances.entry(username.to_string()).or_default();
        *balance += delta;
        self.personal
            .lock()
            .await
            .push((username.to_string(), delta, comment.to_string()));
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
        self.shared.lock().await.push((
            parent.to_string(),
            name.to_string(),
            delta,
            comment.to_string(),
        ));
        Ok(())
    }
}

pub struct MockPrintPath {
    media_supported: bool,
    submissions: Mutex<Vec<PrintRequest>>,
}

impl MockPrintPath {
    pub fn new(media_supported: bool) -> Self {
        Self {
            media_supported,
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub async fn submissions(&self) -> Vec<PrintRequest> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl PrintPath for MockPrintPath {
    async fn supports_media(&self, _printer: &str, _paper_size: &str) -> Result<bool, PrintError> {
        Ok(self.media_supported)
    }

    async fn submit(&self, request: &PrintRequest) -> Result<(), PrintError> {
        self.submissions.lock().await.push(request.clone());
        Ok(())
    }
}

pub struct MockDirectory {
    entries: HashMap<String, DirectoryUser>,
}

impl MockDirectory {
    pub fn with_members(usernames: &[&str]) -> Self {
        let entries = usernames
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    DirectoryUser {
                        username: (*name).to_string(),
                        display_name: (*name).to_string(),
                        role: "MEMBER".to_string(),
                    },
                )
            })
            .collect();
        Self { entries }
    }
}

#[async_trait]
impl DirectorySource for MockDirectory {
    async fn lookup(&self, username: &str) -> Result<Option<DirectoryUser>, StoreError> {
        Ok(self.entries.get(username).cloned())
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingAlerts {
    pub async fn alerts(&self) -> Vec<(String, String)> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn alert(&self, subject: &str, body: &str) {
        self.alerts
            .lock()
            .await
            .push((subject.to_string(), body.to_string()));
    }
}

pub struct Harness {
    pub caps: Capabilities,
    pub source: Arc<ScriptedJobSource>,
    pub metering: Arc<MockMetering>,
    pub print: Arc<MockPrintPath>,
    pub ledger: Arc<MemoryLedger>,
    pub alerts: Arc<RecordingAlerts>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(MockMetering::accepting_everyone(), MockPrintPath::new(true), None)
    }

    pub fn build(
        metering: MockMetering,
        print: MockPrintPath,
        directory: Option<Arc<dyn DirectorySource>>,
    ) -> Self {
        let source = Arc::new(ScriptedJobSource::new());
        let metering = Arc::new(metering);
        let print = Arc::new(print);
        let ledger = Arc::new(MemoryLedger::new());
        let alerts = Arc::new(RecordingAlerts::default());
        let caps = Capabilities {
            source: source.clone(),
            metering: metering.clone(),
            ledger: ledger.clone(),
            print_path: print.clone(),
            directory,
            alerts: alerts.clone(),
        };
        Self {
            caps,
            source,
            metering,
            print,
            ledger,
            alerts,
        }
    }

    pub async fn seed_local_user(&self, username: &str) {
        self.ledger
            .seed_user(LocalUser {
                username: username.to_string(),
                display_name: username.to_string(),
                role: "MEMBER".to_string(),
            })
            .await;
    }
}

pub fn connection(id: &str) -> Connection {
    Connection {
        id: id.to_string(),
        endpoint: "https://portal.test".to_string(),
        credential: "token".to_string(),
        printer: Some("mono".to_string()),
        printer_duplex: Some("mono-duplex".to_string()),
        printer_grayscale: None,
        printer_grayscale_duplex: None,
        charge_to_students: true,
        simulation: false,
        enabled: true,
        metering: true,
        shared_parent: "print".to_string(),
    }
}

pub fn student_entry(username: &str, class: &str, copies: i64, extra: i64) -> BillingEntry {
    BillingEntry {
        username: username.to_string(),
        role: "STUDENT".to_string(),
        class: Some(class.to_string()),
        copies,
        extra,
    }
}

pub fn teacher_entry(username: &str, copies: i64) -> BillingEntry {
    BillingEntry {
        username: username.to_string(),
        role: "TEACHER".to_string(),
        class: None,
        copies,
        extra: 0,
    }
}

pub fn document(id: &str, title: &str, requester: &str, billing: Vec<BillingEntry>) -> Document {
    Document {
        id: id.to_string(),
        title: title.to_string(),
        comment: None,
        requester: Requester {
            username: requester.to_string(),
            role: "TEACHER".to_string(),
        },
        process: ProcessInfo {
            paper_size: "A4".to_string(),
            duplex: false,
            color: false,
            pages: 2,
        },
        billing,
    }
}

/// Seeds a source record in PENDING_EXT with the payload shape the processor
/// writes at intake, plus provisional transactions for the given accounts.
pub async fn seed_pending_job(
    ledger: &MemoryLedger,
    connection_id: &str,
    external_id: &str,
    title: &str,
    owner: &str,
    received_at: DateTime<Utc>,
    users: serde_json::Value,
    accounts: Vec<(AccountRef, i64)>,
) -> Uuid {
    let job_id = Uuid::new_v4();
    let total: i64 = accounts.iter().map(|(_, weight)| weight).sum();
    let record = JobRecord {
        id: job_id,
        connection_id: connection_id.to_string(),
        kind: RecordKind::Source,
        owner: owner.to_string(),
        title: title.to_string(),
        supplier: Some(SupplierInfo {
            supplier: "portal".to_string(),
            external_id: external_id.to_string(),
            status: PrintStatus::PendingExt,
            payload: Some(json!({
                "copies": total,
                "mediaSize": "A4",
                "duplex": false,
                "color": false,
                "pages": 2,
                "users": users,
                "skipped": 0,
                "comment": "",
            })),
            received_at,
        }),
        linked: None,
        created_at: received_at,
    };
    let transactions: Vec<AccountTransaction> = accounts
        .into_iter()
        .map(|(account, weight)| AccountTransaction {
            id: Uuid::new_v4(),
            weight,
            amount: Decimal::ZERO,
            balance_after: None,
            account,
            job_id,
        })
        .collect();

    let mut unit = ledger.begin().await.unwrap();
    unit.insert_job(&record).await.unwrap();
    unit.insert_transactions(&transactions).await.unwrap();
    unit.commit().await.unwrap();
    job_id
}
