use crate::domain::types::EventKey;
use thiserror::Error;

/// Why the validator refused an event
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),

    #[error("timestamp {timestamp} older than {max_sec}s before now ({now})")]
    PastTimestamp { timestamp: i64, now: i64, max_sec: i64 },

    #[error("timestamp {timestamp} more than {max_sec}s after now ({now})")]
    FutureTimestamp { timestamp: i64, now: i64, max_sec: i64 },

    #[error("speed {speed_kph:.1} km/h exceeds {max_kph:.1} km/h")]
    InvalidSpeed { speed_kph: f64, max_kph: f64 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate event {0}")]
    Duplicate(EventKey),

    #[error("event not found {0}")]
    NotFound(EventKey),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("journal write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("rule evaluation failed: {0}")]
    Evaluation(String),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned an unusable response: {0}")]
    BadResponse(String),
}

/// A failed enrichment job; logged and dropped by the worker
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery queue full")]
    QueueFull,

    #[error("delivery channel closed")]
    Closed,

    #[error("no recipients")]
    NoRecipients,
}

/// Failures that are fatal to one ingested event
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("event rejected: {0}")]
    Rejected(RejectReason),

    #[error("event not stored: {0}")]
    Store(#[from] StoreError),
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
