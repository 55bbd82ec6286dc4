//! Crash alert wording

use chrono::Duration;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::detector::format_window;
use crate::types::{format_timestamp, DropEvaluation, Observation};

/// Subject/body pair handed to an [`super::AlertSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

/// Build the crash alert for a committed evaluation. `None` when the
/// evaluation carries no reference (nothing to compare against).
pub fn crash_alert(
    current: &Observation,
    evaluation: &DropEvaluation,
    window: Duration,
) -> Option<AlertMessage> {
    let reference_price = evaluation.reference_price?;
    let drop = evaluation.percent_drop?;
    let window = format_window(window);

    let subject = format!(
        "🚨 {} CRASH ALERT: -{}% in {}",
        current.id.to_uppercase(),
        format_percent(drop),
        window
    );

    let mut body = format!(
        "WARNING: {} dropped {}% within the last {}.\n\n\
         Current Price: {} ({})\n\
         Reference Price: {}",
        current.id,
        format_percent(drop),
        window,
        format_usd(evaluation.current_price),
        format_timestamp(&current.timestamp),
        format_usd(reference_price),
    );
    if let Some(ts) = evaluation.reference_timestamp {
        body.push_str(&format!(" ({})", format_timestamp(&ts)));
    }
    body.push_str(&format!(
        "\nSource: {}\n\ncurrent={} old={} drop={}%\n",
        current.source,
        evaluation.current_price.normalize(),
        reference_price.normalize(),
        format_percent(drop)
    ));

    Some(AlertMessage { subject, body })
}

fn format_percent(value: Decimal) -> String {
    format!(
        "{:.2}",
        value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}

/// `$1,234,567.89` style rendering
pub fn format_usd(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if rounded < Decimal::ZERO { "-" } else { "" };
    format!("{}${}.{}", sign, grouped, frac_part)
}
