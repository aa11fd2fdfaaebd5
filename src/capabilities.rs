use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{MeterError, PrintError, SourceError, StoreError};
use crate::print::models::{
    AccountTransaction, Connection, DirectoryUser, Document, JobRecord, LocalUser, MeterIdentity,
    PrintRequest, PrintStatus, UsageLogEntry,
};

/// key: job-source-capability -> fetch/download/report against the external portal
///
/// The production wire transport lives outside this crate; the engine only
/// consumes this interface. `print::simulation` provides a canned
/// implementation satisfying the same contract.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_pending(&self, connection: &Connection) -> Result<Vec<Document>, SourceError>;

    /// Downloads the document content into a temp file. Dropping the handle
    /// removes the file, which is the final-cleanup guarantee the processor
    /// relies on.
    async fn download(
        &self,
        connection: &Connection,
        username: &str,
        document: &Document,
    ) -> Result<NamedTempFile, SourceError>;

    async fn report_status(
        &self,
        connection: &Connection,
        document_id: &str,
        status: PrintStatus,
        comment: &str,
    ) -> Result<(), SourceError>;
}

/// key: metering-capability -> usage log and balance adjustments
#[async_trait]
pub trait Metering: Send + Sync {
    async fn find_user(
        &self,
        connection: &Connection,
        username: &str,
    ) -> Result<Option<MeterIdentity>, MeterError>;

    /// Batch lookup by encoded job name; entries for unknown names are
    /// simply absent from the result.
    async fn usage_log(
        &self,
        connection: &Connection,
        document_names: &[String],
    ) -> Result<Vec<UsageLogEntry>, MeterError>;

    /// Applies a balance delta to a personal account and returns the balance
    /// after the adjustment.
    async fn adjust_account(
        &self,
        connection: &Connection,
        username: &str,
        delta: Decimal,
        comment: &str,
    ) -> Result<Decimal, MeterError>;

    async fn adjust_shared_account(
        &self,
        connection: &Connection,
        parent: &str,
        name: &str,
        delta: Decimal,
        comment: &str,
    ) -> Result<(), MeterError>;
}

/// key: ledger-capability -> local accounting store (DAO layer out of scope)
///
/// All mutations go through a unit of work obtained from `begin`; dropping
/// the unit without calling `commit` rolls every staged change back.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Coarse advisory read/write lock shared with maintenance operations.
    /// Bulk read-only work takes the read side; every state transition takes
    /// the write side before opening its unit of work.
    fn advisory(&self) -> Arc<RwLock<()>>;

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    async fn find_user(&self, username: &str) -> Result<Option<LocalUser>, StoreError>;

    async fn job(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// Source records still waiting on the metering outcome.
    async fn pending_external(&self, connection_id: &str) -> Result<Vec<JobRecord>, StoreError>;

    async fn transactions_for(&self, job_id: Uuid) -> Result<Vec<AccountTransaction>, StoreError>;
}

#[async_trait]
pub trait LedgerTx: Send {
    /// Pessimistic row lock on a job record for the lifetime of the unit.
    async fn lock(&mut self, job_id: Uuid) -> Result<(), StoreError>;

    async fn insert_user(&mut self, user: &LocalUser) -> Result<(), StoreError>;

    async fn insert_job(&mut self, record: &JobRecord) -> Result<(), StoreError>;

    async fn update_job(&mut self, record: &JobRecord) -> Result<(), StoreError>;

    async fn insert_transactions(
        &mut self,
        transactions: &[AccountTransaction],
    ) -> Result<(), StoreError>;

    async fn update_transaction(
        &mut self,
        transaction: &AccountTransaction,
    ) -> Result<(), StoreError>;

    /// Reassigns every transaction of `from` to `to`. Ownership transfer,
    /// not a copy.
    async fn move_transactions(&mut self, from: Uuid, to: Uuid) -> Result<(), StoreError>;

    async fn delete_transactions(&mut self, job_id: Uuid) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Directory lookup used for lazy provisioning of unknown requesters.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn lookup(&self, username: &str) -> Result<Option<DirectoryUser>, StoreError>;
}

/// key: proxy-print-capability -> physical submission path
#[async_trait]
pub trait PrintPath: Send + Sync {
    /// Whether the named printer can feed the requested paper size from any
    /// media source. Absence is a hard failure upstream; the engine never
    /// substitutes paper silently.
    async fn supports_media(&self, printer: &str, paper_size: &str) -> Result<bool, PrintError>;

    async fn submit(&self, request: &PrintRequest) -> Result<(), PrintError>;
}

/// Carrier for administrative alerts raised by the reconciler.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, subject: &str, body: &str);
}

/// Default alert sink: a structured error record in the log stream.
pub struct LogAlerts;

#[async_trait]
impl AlertSink for LogAlerts {
    async fn alert(&self, subject: &str, body: &str) {
        tracing::error!(subject, body, "administrative alert");
    }
}

/// Everything the engine consumes, injected at construction. No ambient
/// singletons.
#[derive(Clone)]
pub struct Capabilities {
    pub source: Arc<dyn JobSource>,
    pub metering: Arc<dyn Metering>,
    pub ledger: Arc<dyn Ledger>,
    pub print_path: Arc<dyn PrintPath>,
    pub directory: Option<Arc<dyn DirectorySource>>,
    pub alerts: Arc<dyn AlertSink>,
}
