//! In-process ingestion stream
//!
//! Producers enqueue encoded records; the consumer side drains them in
//! batches of up to `max_records`, waiting at most `linger` after the first
//! record of a batch arrives.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, Receiver, Sender};
use tokio::time::{timeout_at, Instant};

use crate::errors::StreamError;
use crate::types::IngestRecord;

/// Publishing side of the ingestion transport
#[async_trait]
pub trait IngestionStream: Send + Sync {
    async fn enqueue(&self, partition_key: &str, data: String) -> Result<(), StreamError>;
}

/// Bounded channel transport
#[derive(Debug, Clone)]
pub struct ChannelStream {
    tx: Sender<IngestRecord>,
}

/// Create a connected (publisher, batch receiver) pair
pub fn channel(capacity: usize) -> (ChannelStream, BatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelStream { tx }, BatchReceiver { rx })
}

#[async_trait]
impl IngestionStream for ChannelStream {
    async fn enqueue(&self, partition_key: &str, data: String) -> Result<(), StreamError> {
        tracing::trace!(partition_key = %partition_key, "Enqueueing record");
        self.tx
            .send(IngestRecord::new(data))
            .await
            .map_err(|_| StreamError::Closed)
    }
}

/// Consuming side: groups records into batches
#[derive(Debug)]
pub struct BatchReceiver {
    rx: Receiver<IngestRecord>,
}

impl BatchReceiver {
    /// Wait for the next batch. `None` once every publisher is gone and the
    /// channel is drained.
    pub async fn next_batch(
        &mut self,
        max_records: usize,
        linger: Duration,
    ) -> Option<Vec<IngestRecord>> {
        let max_records = max_records.max(1);
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        let deadline = Instant::now() + linger;

        while batch.len() < max_records {
            match self.rx.try_recv() {
                Ok(record) => batch.push(record),
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => match timeout_at(deadline, self.rx.recv()).await {
                    Ok(Some(record)) => batch.push(record),
                    Ok(None) | Err(_) => break,
                },
            }
        }

        Some(batch)
    }
}
