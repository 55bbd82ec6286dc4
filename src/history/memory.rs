//! In-memory history index

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{validate_key, HistoryStore};
use crate::errors::StoreError;
use crate::types::Observation;

type Partition = BTreeMap<DateTime<Utc>, Observation>;

/// Per-id ordered map behind an async lock. Also serves as the index of
/// [`super::CsvHistoryStore`].
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from already-validated observations; later entries win
    /// on key collision
    pub fn from_observations(observations: impl IntoIterator<Item = Observation>) -> Self {
        let mut partitions: HashMap<String, Partition> = HashMap::new();
        for obs in observations {
            partitions
                .entry(obs.id.clone())
                .or_default()
                .insert(obs.timestamp, obs);
        }
        Self {
            partitions: RwLock::new(partitions),
        }
    }

    /// Number of stored observations across all ids
    pub async fn len(&self) -> usize {
        self.partitions
            .read()
            .await
            .values()
            .map(|p| p.len())
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert without validation; used when replaying trusted journals
    pub(crate) async fn insert(&self, obs: Observation) {
        let mut partitions = self.partitions.write().await;
        partitions
            .entry(obs.id.clone())
            .or_default()
            .insert(obs.timestamp, obs);
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn find_latest_at_or_before(
        &self,
        id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Observation>, StoreError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(id)
            .and_then(|p| p.range(..=cutoff).next_back())
            .map(|(_, obs)| obs.clone()))
    }

    async fn put(&self, obs: &Observation) -> Result<(), StoreError> {
        validate_key(obs)?;
        self.insert(obs.clone()).await;
        Ok(())
    }

    async fn find_since(
        &self,
        id: &str,
        floor: DateTime<Utc>,
    ) -> Result<Vec<Observation>, StoreError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(id)
            .map(|p| p.range(floor..).map(|(_, obs)| obs.clone()).collect())
            .unwrap_or_default())
    }
}
