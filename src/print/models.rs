use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// key: connection-model -> per-tenant configuration
///
/// One entry per external job-source tenant. Printer variants are optional;
/// a connection without any printer configured routes documents to the hold
/// directory instead of submitting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub endpoint: String,
    pub credential: String,
    #[serde(default)]
    pub printer: Option<String>,
    #[serde(default)]
    pub printer_duplex: Option<String>,
    #[serde(default)]
    pub printer_grayscale: Option<String>,
    #[serde(default)]
    pub printer_grayscale_duplex: Option<String>,
    #[serde(default)]
    pub charge_to_students: bool,
    #[serde(default)]
    pub simulation: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub metering: bool,
    #[serde(default = "default_shared_parent")]
    pub shared_parent: String,
}

fn default_true() -> bool {
    true
}

fn default_shared_parent() -> String {
    "print".to_string()
}

impl Connection {
    pub fn has_direct_target(&self) -> bool {
        self.printer.is_some()
            || self.printer_duplex.is_some()
            || self.printer_grayscale.is_some()
            || self.printer_grayscale_duplex.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    /// Parses the raw role string of a billing entry; anything outside the
    /// two known roles is treated as unrecognized and skipped upstream.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Some(Role::Student),
            "TEACHER" => Some(Role::Teacher),
            _ => None,
        }
    }
}

/// One (user, role, class, copies) line inside a document's billing info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEntry {
    pub username: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub copies: i64,
    #[serde(default)]
    pub extra: i64,
}

impl BillingEntry {
    pub fn effective_copies(&self) -> i64 {
        self.copies + self.extra
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requester {
    pub username: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub paper_size: String,
    #[serde(default)]
    pub duplex: bool,
    #[serde(default)]
    pub color: bool,
    #[serde(default = "default_pages")]
    pub pages: u32,
}

fn default_pages() -> u32 {
    1
}

/// key: document-model -> external print-job descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub requester: Requester,
    pub process: ProcessInfo,
    #[serde(default)]
    pub billing: Vec<BillingEntry>,
}

/// Copy-weighted allocation derived from a document's billing entries.
/// Never persisted; the weight denominator for monetary splitting is
/// `total_copies`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    pub class_copies: BTreeMap<String, i64>,
    pub user_copies: BTreeMap<String, i64>,
    pub user_class: BTreeMap<String, String>,
    pub total_copies: i64,
    pub skipped_copies: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrintStatus {
    Pending,
    PendingExt,
    Completed,
    Cancelled,
    Expired,
    Error,
}

impl PrintStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PrintStatus::Completed
                | PrintStatus::Cancelled
                | PrintStatus::Expired
                | PrintStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrintStatus::Pending => "PENDING",
            PrintStatus::PendingExt => "PENDING_EXT",
            PrintStatus::Completed => "COMPLETED",
            PrintStatus::Cancelled => "CANCELLED",
            PrintStatus::Expired => "EXPIRED",
            PrintStatus::Error => "ERROR",
        }
    }
}

/// key: supplier-info -> persisted external-job correlation state
///
/// `payload` carries the opaque submission snapshot (copies, media, duplex,
/// color) and is nulled once the job reaches a terminal state; it is never
/// stored alongside the final print record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierInfo {
    pub supplier: String,
    pub external_id: String,
    pub status: PrintStatus,
    pub payload: Option<Value>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// Intake log row, created before any content is moved or printed.
    Source,
    /// Print-output log row, created on completion and linked 1:1.
    Target,
}

/// Local ledger row pairing the intake log with the print-output log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub connection_id: String,
    pub kind: RecordKind,
    pub owner: String,
    pub title: String,
    pub supplier: Option<SupplierInfo>,
    pub linked: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn status(&self) -> Option<PrintStatus> {
        self.supplier.as_ref().map(|info| info.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountRef {
    Personal { username: String },
    Shared { parent: String, name: String },
}

/// key: account-transaction -> provisional-then-final cost share
///
/// Created with a zero amount against the source job record; on completion
/// the share is filled in and the row is moved to the target record
/// (ownership transfer, not a copy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTransaction {
    pub id: Uuid,
    pub weight: i64,
    pub amount: Decimal,
    pub balance_after: Option<Decimal>,
    pub account: AccountRef,
    pub job_id: Uuid,
}

/// Read-only row of the usage-metering log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub document_name: String,
    pub printed: bool,
    #[serde(default)]
    pub denied_reason: Option<String>,
    pub usage_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    pub username: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub username: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterIdentity {
    pub username: String,
}

/// Submission handed to the proxy-print path. The page range always covers
/// the whole document; no paper or finish splitting happens in this engine.
#[derive(Debug, Clone)]
pub struct PrintRequest {
    pub printer: String,
    pub file: PathBuf,
    pub copies: i64,
    pub media: String,
    pub duplex: bool,
    pub color: bool,
    pub job_name: String,
    pub page_range: String,
}
