//! Value parsers for configuration strings

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration};

/// Parse a lookback window: `<n>s`, `<n>m`, `<n>h`, `<n>d`, or a bare
/// number of hours
pub fn parse_window(raw: &str) -> Result<Duration> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw.is_empty() {
        bail!("Empty window");
    }

    let (digits, unit_secs) = match raw.char_indices().last() {
        Some((idx, 's')) => (&raw[..idx], 1),
        Some((idx, 'm')) => (&raw[..idx], 60),
        Some((idx, 'h')) => (&raw[..idx], 3600),
        Some((idx, 'd')) => (&raw[..idx], 86_400),
        _ => (raw.as_str(), 3600),
    };

    let amount: i64 = digits
        .trim()
        .parse()
        .with_context(|| format!("Invalid window {:?}", raw))?;
    if amount <= 0 {
        bail!("Window must be positive, got {:?}", raw);
    }

    let window = amount
        .checked_mul(unit_secs)
        .and_then(Duration::try_seconds)
        .with_context(|| format!("Window {:?} is out of range", raw))?;

    // Must be subtractable from present-day timestamps
    let reaches_back = DateTime::from_timestamp(0, 0)
        .and_then(|epoch| epoch.checked_sub_signed(window))
        .is_some();
    if !reaches_back {
        bail!("Window {:?} is out of range", raw);
    }
    Ok(window)
}
