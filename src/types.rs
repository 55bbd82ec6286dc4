//! Core types used throughout PriceWatch
//!
//! Defines the observation value object and the derived evaluation/outcome
//! structures produced by the batch consumer.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{CodecError, NotificationError, StoreError};

/// One price reading for an asset at an instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Tracked asset (e.g. "bitcoin"), partition key for history
    pub id: String,
    /// UTC instant, sort key for history
    pub timestamp: DateTime<Utc>,
    /// Exact decimal price, always > 0
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Provenance label (e.g. "Coinbase")
    pub source: String,
}

impl Observation {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        price: Decimal,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            price,
            source: source.into(),
        }
    }

    /// Canonical RFC 3339 key used for storage (microseconds, `Z` suffix).
    /// Fixed width, so lexicographic order matches time order.
    pub fn timestamp_key(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} = {} ({})",
            self.id,
            self.timestamp_key(),
            self.price,
            self.source
        )
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Why the detector reached its decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationReason {
    /// No usable reference observation at or before the cutoff
    InsufficientHistory,
    /// Drop (or rise) stayed under the threshold
    BelowThreshold,
    /// Drop reached the threshold
    ThresholdBreached,
}

impl fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationReason::InsufficientHistory => write!(f, "insufficient history"),
            EvaluationReason::BelowThreshold => write!(f, "below threshold"),
            EvaluationReason::ThresholdBreached => write!(f, "threshold breached"),
        }
    }
}

/// Result of comparing a current price against its reference point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropEvaluation {
    pub current_price: Decimal,
    pub reference_price: Option<Decimal>,
    pub reference_timestamp: Option<DateTime<Utc>>,
    /// `(reference - current) / reference * 100`; `None` without a reference
    pub percent_drop: Option<Decimal>,
    pub should_alert: bool,
    pub reason: EvaluationReason,
}

/// Ingestion record as delivered by the transport (base64 JSON payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub data: String,
}

impl IngestRecord {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

/// Step of the per-item pipeline where processing stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemStage {
    Decode,
    Lookup,
    Persist,
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStage::Decode => write!(f, "decode"),
            ItemStage::Lookup => write!(f, "lookup"),
            ItemStage::Persist => write!(f, "persist"),
        }
    }
}

/// Error that moved an item to the skipped state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    Codec(CodecError),
    Store(StoreError),
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemError::Codec(e) => write!(f, "{}", e),
            ItemError::Store(e) => write!(f, "{}", e),
        }
    }
}

/// Outcome of the alert step of a committed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    NotTriggered,
    Published,
    Failed(NotificationError),
}

/// Terminal state of one batch item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Committed {
        observation: Observation,
        evaluation: DropEvaluation,
        alert: AlertOutcome,
    },
    Skipped {
        stage: ItemStage,
        error: ItemError,
        /// Alert result when the item failed after the alert step
        alert: AlertOutcome,
    },
}

impl ItemOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, ItemOutcome::Committed { .. })
    }

    pub fn alert(&self) -> &AlertOutcome {
        match self {
            ItemOutcome::Committed { alert, .. } => alert,
            ItemOutcome::Skipped { alert, .. } => alert,
        }
    }
}

/// Aggregate result returned for a whole batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub committed: usize,
    pub skipped: usize,
    pub alerts_published: usize,
    pub alert_failures: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &ItemOutcome) {
        if outcome.is_committed() {
            self.committed += 1;
        } else {
            self.skipped += 1;
        }
        match outcome.alert() {
            AlertOutcome::Published => self.alerts_published += 1,
            AlertOutcome::Failed(_) => self.alert_failures += 1,
            AlertOutcome::NotTriggered => {}
        }
    }

    /// Fold another batch's counts into this one
    pub fn merge(&mut self, other: &BatchSummary) {
        self.committed += other.committed;
        self.skipped += other.skipped;
        self.alerts_published += other.alerts_published;
        self.alert_failures += other.alert_failures;
    }

    pub fn total(&self) -> usize {
        self.committed + self.skipped
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "committed={} skipped={} alerts={} alert_failures={}",
            self.committed, self.skipped, self.alerts_published, self.alert_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn timestamp_key_is_fixed_width_utc() {
        let obs = Observation::new(
            "bitcoin",
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            dec!(50000),
            "Coinbase",
        );
        assert_eq!(obs.timestamp_key(), "2024-01-02T03:04:05.000000Z");
    }

    #[test]
    fn summary_counts_alert_failures_on_skipped_items() {
        let mut summary = BatchSummary::default();
        summary.record(&ItemOutcome::Skipped {
            stage: ItemStage::Persist,
            error: ItemError::Store(StoreError::Unavailable("down".to_string())),
            alert: AlertOutcome::Failed(NotificationError::Timeout),
        });
        summary.record(&ItemOutcome::Skipped {
            stage: ItemStage::Decode,
            error: ItemError::Codec(CodecError::MalformedRecord("bad".to_string())),
            alert: AlertOutcome::NotTriggered,
        });

        assert_eq!(summary.committed, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.alert_failures, 1);
        assert_eq!(summary.total(), 2);
    }

    #[test]
    fn merge_adds_every_counter() {
        let mut totals = BatchSummary {
            committed: 2,
            skipped: 1,
            alerts_published: 1,
            alert_failures: 0,
        };
        totals.merge(&BatchSummary {
            committed: 3,
            skipped: 0,
            alerts_published: 0,
            alert_failures: 2,
        });

        assert_eq!(
            totals,
            BatchSummary {
                committed: 5,
                skipped: 1,
                alerts_published: 1,
                alert_failures: 2,
            }
        );
    }

    #[test]
    fn ingest_record_prints_as_data_object() {
        let line = serde_json::to_string(&IngestRecord::new("eyJpZCI6MX0=")).unwrap();
        assert_eq!(line, r#"{"data":"eyJpZCI6MX0="}"#);
    }

    #[test]
    fn observation_serializes_price_as_number() {
        let obs = Observation::new(
            "bitcoin",
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            dec!(47000.5),
            "Coinbase",
        );
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["price"], serde_json::json!(47000.5));
        assert_eq!(json["id"], "bitcoin");
    }
}
