//! CSV-journaled history store
//!
//! Every accepted observation is appended to `<data_dir>/<table>.csv` before
//! it becomes visible in the in-memory index. On open the journal is replayed
//! into the index; repeated rows for one `(id, timestamp)` collapse onto a
//! single entry, so redelivered observations leave the same queryable state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{info, warn};

use super::{validate_key, HistoryStore, MemoryHistoryStore};
use crate::codec::parse_timestamp;
use crate::errors::StoreError;
use crate::types::Observation;

/// Journal row. Price is kept as text so it round-trips exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryRow {
    id: String,
    timestamp: String,
    price: String,
    source: String,
}

impl From<&Observation> for HistoryRow {
    fn from(obs: &Observation) -> Self {
        Self {
            id: obs.id.clone(),
            timestamp: obs.timestamp_key(),
            price: obs.price.to_string(),
            source: obs.source.clone(),
        }
    }
}

impl HistoryRow {
    fn into_observation(self) -> Result<Observation> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        let price = Decimal::from_str(&self.price)
            .with_context(|| format!("Invalid price {:?}", self.price))?;
        Ok(Observation {
            id: self.id,
            timestamp,
            price,
            source: self.source,
        })
    }
}

/// Append side of the journal. Each row is encoded in full before any byte
/// reaches the file, so a failed append leaves nothing buffered for the next
/// one to flush.
struct Journal<W> {
    out: W,
    needs_header: bool,
}

impl<W: Write> Journal<W> {
    fn new(out: W, needs_header: bool) -> Self {
        Self { out, needs_header }
    }

    fn append(&mut self, row: &HistoryRow) -> Result<(), StoreError> {
        let mut encoder = WriterBuilder::new()
            .has_headers(self.needs_header)
            .from_writer(Vec::new());
        encoder
            .serialize(row)
            .map_err(|e| StoreError::Rejected(format!("journal encode failed: {}", e)))?;
        let bytes = encoder
            .into_inner()
            .map_err(|e| StoreError::Rejected(format!("journal encode failed: {}", e)))?;

        self.out
            .write_all(&bytes)
            .and_then(|_| self.out.flush())
            .map_err(|e| StoreError::Unavailable(format!("journal write failed: {}", e)))?;
        self.needs_header = false;
        Ok(())
    }
}

/// Durable store: memory index + append-only CSV journal
pub struct CsvHistoryStore {
    path: PathBuf,
    index: MemoryHistoryStore,
    journal: AsyncRwLock<Journal<fs::File>>,
}

impl CsvHistoryStore {
    /// Open (or create) the journal for `table_name` under `data_dir`
    pub fn open(data_dir: &str, table_name: &str) -> Result<Self> {
        let table_name = table_name.trim();
        if table_name.is_empty()
            || table_name.contains(['/', '\\'])
            || table_name.starts_with('.')
        {
            anyhow::bail!("Invalid table name {:?}", table_name);
        }

        let dir = PathBuf::from(data_dir);
        fs::create_dir_all(&dir).context("Failed to create data directory")?;
        let path = dir.join(format!("{}.csv", table_name));

        let observations = Self::replay(&path)?;
        let replayed = observations.len();
        let index = MemoryHistoryStore::from_observations(observations);
        let journal = Self::open_journal(&path)?;

        info!(
            table = %table_name,
            path = %path.display(),
            replayed,
            "History journal opened"
        );

        Ok(Self {
            path,
            index,
            journal: AsyncRwLock::new(journal),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct observations currently indexed
    pub async fn len(&self) -> usize {
        self.index.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.index.is_empty().await
    }

    fn open_journal(path: &Path) -> Result<Journal<fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open history journal")?;

        Ok(Journal::new(file, !file_has_data))
    }

    fn replay(path: &Path) -> Result<Vec<Observation>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(path).context("Failed to open history journal")?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut observations = Vec::new();
        let mut corrupt = 0usize;
        for result in reader.deserialize::<HistoryRow>() {
            match result
                .map_err(anyhow::Error::from)
                .and_then(HistoryRow::into_observation)
            {
                Ok(obs) => observations.push(obs),
                Err(e) => {
                    corrupt += 1;
                    warn!(path = %path.display(), error = %e, "Skipping corrupt journal row");
                }
            }
        }

        if corrupt > 0 {
            warn!(path = %path.display(), corrupt, "History journal had unreadable rows");
        }
        Ok(observations)
    }
}

#[async_trait]
impl HistoryStore for CsvHistoryStore {
    async fn find_latest_at_or_before(
        &self,
        id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Observation>, StoreError> {
        self.index.find_latest_at_or_before(id, cutoff).await
    }

    async fn put(&self, obs: &Observation) -> Result<(), StoreError> {
        validate_key(obs)?;

        self.journal.write().await.append(&HistoryRow::from(obs))?;

        self.index.insert(obs.clone()).await;
        Ok(())
    }

    async fn find_since(
        &self,
        id: &str,
        floor: DateTime<Utc>,
    ) -> Result<Vec<Observation>, StoreError> {
        self.index.find_since(id, floor).await
    }
}
