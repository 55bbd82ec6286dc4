//! Batch Consumer - windowed price-drop pipeline
//!
//! For every record of a batch:
//! decode -> lookup reference -> evaluate -> alert (optional) -> persist.
//!
//! Items are isolated from each other: any per-item failure ends that item in
//! [`ItemOutcome::Skipped`] and the rest of the batch carries on. Only an
//! envelope that cannot be enumerated fails the whole invocation.
//!
//! Items run through a bounded pool. Two items for the same asset in one
//! batch may or may not see each other's write during the reference lookup;
//! lookups only read already committed history, so either result is a valid
//! (eventually consistent) view. With `max_concurrency = 1` items run in
//! batch order.

use futures_util::stream::{self, StreamExt};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::alerts::{crash_alert, AlertSink};
use crate::codec::ObservationCodec;
use crate::detector::DropDetector;
use crate::errors::{BatchError, NotificationError, StoreError};
use crate::history::HistoryStore;
use crate::types::{
    AlertOutcome, BatchSummary, DropEvaluation, IngestRecord, ItemError, ItemOutcome, ItemStage,
    Observation,
};

const MAX_CONCURRENCY: usize = 64;

/// Pool size and per-batch deadline
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub max_concurrency: usize,
    pub batch_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            batch_timeout: Duration::from_secs(25),
        }
    }
}

/// Orchestrates detection for batches of ingestion records. Store and sink
/// are process-wide handles reused across batches.
pub struct BatchConsumer {
    codec: ObservationCodec,
    detector: DropDetector,
    store: Arc<dyn HistoryStore>,
    sink: Arc<dyn AlertSink>,
    settings: ConsumerSettings,
}

impl BatchConsumer {
    pub fn new(
        codec: ObservationCodec,
        detector: DropDetector,
        store: Arc<dyn HistoryStore>,
        sink: Arc<dyn AlertSink>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            codec,
            detector,
            store,
            sink,
            settings: ConsumerSettings {
                max_concurrency: settings.max_concurrency.clamp(1, MAX_CONCURRENCY),
                ..settings
            },
        }
    }

    pub fn detector(&self) -> &DropDetector {
        &self.detector
    }

    /// Parse a transport envelope and process it. Fails only when the
    /// envelope itself is unreadable.
    pub async fn process_event(&self, event: &[u8]) -> Result<BatchSummary, BatchError> {
        let records = parse_event(event)?;
        Ok(self.process_batch(&records).await)
    }

    /// Process every record and return the aggregate counts
    pub async fn process_batch(&self, records: &[IngestRecord]) -> BatchSummary {
        let outcomes = self.process_batch_detailed(records).await;

        let mut summary = BatchSummary::default();
        for outcome in &outcomes {
            summary.record(outcome);
        }

        info!(
            records = records.len(),
            committed = summary.committed,
            skipped = summary.skipped,
            alerts_published = summary.alerts_published,
            alert_failures = summary.alert_failures,
            "Batch processed"
        );
        summary
    }

    /// Per-item outcomes, in batch order
    pub async fn process_batch_detailed(&self, records: &[IngestRecord]) -> Vec<ItemOutcome> {
        let deadline = Instant::now() + self.settings.batch_timeout;

        let pending: Vec<BoxFuture<'_, (usize, ItemOutcome)>> = records
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                self.process_record(record, deadline)
                    .map(move |outcome| (idx, outcome))
                    .boxed()
            })
            .collect();
        let mut outcomes: Vec<(usize, ItemOutcome)> = stream::iter(pending)
            .buffer_unordered(self.settings.max_concurrency)
            .collect()
            .await;

        outcomes.sort_by_key(|(idx, _)| *idx);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn process_record(&self, record: &IngestRecord, deadline: Instant) -> ItemOutcome {
        // 1. Decode
        let current = match self.codec.decode_record(&record.data) {
            Ok(obs) => obs,
            Err(e) => {
                warn!(error = %e, "Skipping malformed record");
                return ItemOutcome::Skipped {
                    stage: ItemStage::Decode,
                    error: ItemError::Codec(e),
                    alert: AlertOutcome::NotTriggered,
                };
            }
        };

        // 2. Reference lookup
        // A cutoff before the earliest representable instant has no reference
        let lookup = match self.detector.cutoff(current.timestamp) {
            Some(cutoff) => timeout_at(
                deadline,
                self.store.find_latest_at_or_before(&current.id, cutoff),
            )
            .await
            .unwrap_or_else(|_| Err(deadline_exceeded())),
            None => Ok(None),
        };

        let reference = match lookup {
            Ok(reference) => reference,
            Err(e) => {
                return skip(&current, ItemStage::Lookup, e, AlertOutcome::NotTriggered);
            }
        };

        // 3. Evaluate
        let evaluation = self.detector.evaluate(current.price, reference.as_ref());
        match evaluation.percent_drop {
            None => info!(
                asset_id = %current.id,
                timestamp = %current.timestamp_key(),
                price = %current.price,
                reason = %evaluation.reason,
                "No comparable reference observation"
            ),
            Some(drop) => debug!(
                asset_id = %current.id,
                timestamp = %current.timestamp_key(),
                price = %current.price,
                percent_drop = %drop.round_dp(4),
                should_alert = evaluation.should_alert,
                "Evaluated price change"
            ),
        }

        // 4. Alert
        let alert = if evaluation.should_alert {
            self.send_alert(&current, &evaluation, deadline).await
        } else {
            AlertOutcome::NotTriggered
        };

        // 5. Persist
        let persisted = timeout_at(deadline, self.store.put(&current))
            .await
            .unwrap_or_else(|_| Err(deadline_exceeded()));
        if let Err(e) = persisted {
            return skip(&current, ItemStage::Persist, e, alert);
        }

        // 6. Committed
        debug!(
            asset_id = %current.id,
            timestamp = %current.timestamp_key(),
            "Observation committed"
        );
        ItemOutcome::Committed {
            observation: current,
            evaluation,
            alert,
        }
    }

    async fn send_alert(
        &self,
        current: &Observation,
        evaluation: &DropEvaluation,
        deadline: Instant,
    ) -> AlertOutcome {
        let Some(message) = crash_alert(current, evaluation, self.detector.window()) else {
            return AlertOutcome::NotTriggered;
        };

        let published = timeout_at(deadline, self.sink.publish(&message.subject, &message.body))
            .await
            .unwrap_or(Err(NotificationError::Timeout));

        match published {
            Ok(()) => {
                info!(
                    asset_id = %current.id,
                    timestamp = %current.timestamp_key(),
                    subject = %message.subject,
                    "Crash alert published"
                );
                AlertOutcome::Published
            }
            Err(e) => {
                warn!(
                    asset_id = %current.id,
                    timestamp = %current.timestamp_key(),
                    sink = self.sink.name(),
                    error = %e,
                    "Crash alert delivery failed"
                );
                AlertOutcome::Failed(e)
            }
        }
    }
}

fn deadline_exceeded() -> StoreError {
    StoreError::Unavailable("batch deadline exceeded".to_string())
}

fn skip(current: &Observation, stage: ItemStage, error: StoreError, alert: AlertOutcome) -> ItemOutcome {
    if error.is_retriable() {
        warn!(
            asset_id = %current.id,
            timestamp = %current.timestamp_key(),
            stage = %stage,
            error = %error,
            "Skipping observation, storage unavailable"
        );
    } else {
        error!(
            asset_id = %current.id,
            timestamp = %current.timestamp_key(),
            stage = %stage,
            error = %error,
            "Skipping observation, storage rejected it"
        );
    }
    ItemOutcome::Skipped {
        stage,
        error: ItemError::Store(error),
        alert,
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Records")]
    records: Vec<serde_json::Value>,
}

/// Enumerate the records of a transport envelope
/// (`{"Records":[{"kinesis":{"data":"<base64>"}}]}`; a flat `{"data": ...}`
/// record is accepted too). A record without data is kept as an empty
/// record so it is skipped as malformed instead of failing the batch.
pub fn parse_event(event: &[u8]) -> Result<Vec<IngestRecord>, BatchError> {
    let envelope: Envelope = serde_json::from_slice(event)
        .map_err(|e| BatchError::InvalidEnvelope(e.to_string()))?;

    Ok(envelope
        .records
        .iter()
        .map(|record| {
            let data = record
                .pointer("/kinesis/data")
                .or_else(|| record.pointer("/data"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            IngestRecord::new(data)
        })
        .collect())
}
