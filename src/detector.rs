//! Drop Detector - windowed price-drop decision
//!
//! Pure and deterministic: given the current price and the observation that
//! was current one lookback window ago, decide whether the fall is large
//! enough to alert on. No I/O happens here.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::types::{DropEvaluation, EvaluationReason, Observation};

/// Threshold + window pair applied to every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropDetector {
    threshold_percent: Decimal,
    window: Duration,
}

impl DropDetector {
    pub fn new(threshold_percent: Decimal, window: Duration) -> Result<Self> {
        if threshold_percent < Decimal::ZERO {
            bail!(
                "Drop threshold must be >= 0, got {}",
                threshold_percent
            );
        }
        if window <= Duration::zero() {
            bail!("Lookback window must be positive");
        }
        Ok(Self {
            threshold_percent,
            window,
        })
    }

    pub fn threshold_percent(&self) -> Decimal {
        self.threshold_percent
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Reference lookups use the latest observation at or before this instant.
    /// `None` when the window reaches past the earliest representable time.
    pub fn cutoff(&self, current_ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        current_ts.checked_sub_signed(self.window)
    }

    /// Evaluate a tick against its (optional) reference observation
    pub fn evaluate(
        &self,
        current_price: Decimal,
        reference: Option<&Observation>,
    ) -> DropEvaluation {
        let reference = match reference {
            // A non-positive reference cannot anchor a percentage
            Some(r) if r.price > Decimal::ZERO => r,
            _ => {
                return DropEvaluation {
                    current_price,
                    reference_price: None,
                    reference_timestamp: None,
                    percent_drop: None,
                    should_alert: false,
                    reason: EvaluationReason::InsufficientHistory,
                }
            }
        };

        // Overflow only happens on an enormous rise from a dust-sized reference
        let drop = percent_drop(reference.price, current_price);
        let should_alert = drop.is_some_and(|d| d >= self.threshold_percent);

        DropEvaluation {
            current_price,
            reference_price: Some(reference.price),
            reference_timestamp: Some(reference.timestamp),
            percent_drop: drop,
            should_alert,
            reason: if should_alert {
                EvaluationReason::ThresholdBreached
            } else {
                EvaluationReason::BelowThreshold
            },
        }
    }
}

/// `(reference - current) / reference * 100`, or `None` on overflow.
/// Caller guarantees `reference > 0`.
pub fn percent_drop(reference: Decimal, current: Decimal) -> Option<Decimal> {
    reference
        .checked_sub(current)?
        .checked_div(reference)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

/// Human form of a window, e.g. `10h`, `90m`, `1d`
pub fn format_window(window: Duration) -> String {
    let secs = window.num_seconds();
    if secs > 0 && secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
