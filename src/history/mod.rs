//! History Store - time-ordered observation storage
//!
//! The consumer only ever asks two things of history: "which observation was
//! current at instant T" and "record this one". Adapters keep observations
//! ordered by `(id, timestamp)` so both are bounded index operations.

mod csv_store;
mod memory;

pub use csv_store::CsvHistoryStore;
pub use memory::MemoryHistoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::errors::StoreError;
use crate::types::Observation;

/// Storage capability used by the batch consumer and the reader API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Observation for `id` with the greatest timestamp <= `cutoff`
    async fn find_latest_at_or_before(
        &self,
        id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Observation>, StoreError>;

    /// Insert, overwriting an existing `(id, timestamp)` entry
    async fn put(&self, obs: &Observation) -> Result<(), StoreError>;

    /// Ascending observations for `id` with timestamp >= `floor`
    async fn find_since(
        &self,
        id: &str,
        floor: DateTime<Utc>,
    ) -> Result<Vec<Observation>, StoreError>;
}

/// Key checks shared by the adapters
pub(crate) fn validate_key(obs: &Observation) -> Result<(), StoreError> {
    if obs.id.trim().is_empty() {
        return Err(StoreError::Rejected("empty partition key".to_string()));
    }
    if obs.price <= Decimal::ZERO {
        return Err(StoreError::Rejected(format!(
            "non-positive price {} for {}",
            obs.price,
            obs.timestamp_key()
        )));
    }
    Ok(())
}
