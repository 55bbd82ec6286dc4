//! Error taxonomy for the ingestion pipeline

use thiserror::Error;

/// Inbound record could not be turned into an observation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

/// History store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transient infrastructure failure, eligible for redelivery
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Permanent data problem, retrying will not help
    #[error("Storage rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Alert delivery failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    #[error("Alert delivery timed out")]
    Timeout,
}

/// Failures that abort a whole batch
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Invalid batch envelope: {0}")]
    InvalidEnvelope(String),
}

/// Ingestion stream failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Ingestion stream closed")]
    Closed,
}
