use thiserror::Error;

use crate::print::models::PrintStatus;

/// Transport failures of the external job source. `RateLimited` is transient
/// and retried on the next heartbeat; `Connectivity` aborts the session and
/// leaves the reconnect to the caller.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("job source rate limit hit")]
    RateLimited,
    #[error("job source unreachable: {0}")]
    Connectivity(String),
    #[error("job source protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum MeterError {
    #[error("metering system unreachable: {0}")]
    Connectivity(String),
    #[error("metering system rejected request: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
#[error("proxy print failed: {0}")]
pub struct PrintError(pub String);

#[derive(Debug, Error)]
#[error("ledger store failure: {0}")]
pub struct StoreError(pub String);

/// key: document-rejection -> business failure of a single document
///
/// Converted to a status+comment pair at the single reporting boundary; a
/// rejection never aborts the polling session and never creates billing side
/// effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("requester unknown")]
    UserUnknown { local: bool, metering: bool },
    #[error("no copies specified")]
    NoCopies,
    #[error("unsupported document type: {0}")]
    UnsupportedType(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("document is encrypted")]
    EncryptedDocument,
    #[error("no compatible printer: {0}")]
    PrinterIncompatible(String),
}

impl Rejection {
    pub fn status(&self) -> PrintStatus {
        match self {
            Rejection::UserUnknown { .. }
            | Rejection::NoCopies
            | Rejection::PrinterIncompatible(_) => PrintStatus::Error,
            Rejection::UnsupportedType(_)
            | Rejection::InvalidDocument(_)
            | Rejection::EncryptedDocument => PrintStatus::Cancelled,
        }
    }

    /// Upstream feedback text. Distinguishes the three unknown-requester
    /// cases so operators can tell which system is missing the account.
    pub fn comment(&self) -> String {
        match self {
            Rejection::UserUnknown {
                local: true,
                metering: true,
            } => "requester unknown in accounting and in metering".to_string(),
            Rejection::UserUnknown { local: true, .. } => {
                "requester unknown in accounting".to_string()
            }
            Rejection::UserUnknown { .. } => "requester unknown in metering".to_string(),
            Rejection::NoCopies => "no copies specified in billing info".to_string(),
            Rejection::UnsupportedType(kind) => {
                format!("unsupported document type: {kind}")
            }
            Rejection::InvalidDocument(reason) => format!("document not printable: {reason}"),
            Rejection::EncryptedDocument => "document is encrypted and cannot be printed".to_string(),
            Rejection::PrinterIncompatible(reason) => {
                format!("no compatible printer: {reason}")
            }
        }
    }
}
