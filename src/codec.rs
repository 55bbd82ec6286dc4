//! Observation codec
//!
//! Turns transport records (base64 wrapped JSON) into typed observations and
//! back. Decoding never yields a partially filled observation.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::CodecError;
use crate::types::{format_timestamp, Observation};

/// Payload as it appears on the wire. Every field is optional here so that
/// presence is checked explicitly instead of by serde.
#[derive(Debug, Deserialize)]
struct RawObservation {
    id: Option<String>,
    price: Option<serde_json::Value>,
    timestamp: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireObservation<'a> {
    id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
    timestamp: String,
    source: &'a str,
}

/// Stateless decoder/encoder holding the provenance label applied when the
/// producer did not send one
#[derive(Debug, Clone)]
pub struct ObservationCodec {
    default_source: String,
}

impl ObservationCodec {
    pub fn new(default_source: impl Into<String>) -> Self {
        Self {
            default_source: default_source.into(),
        }
    }

    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    /// Decode a transport record (base64 text of a JSON object)
    pub fn decode_record(&self, data: &str) -> Result<Observation, CodecError> {
        let bytes = general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| malformed(format!("invalid base64: {}", e)))?;
        self.decode_payload(&bytes)
    }

    /// Decode an already unwrapped JSON payload
    pub fn decode_payload(&self, bytes: &[u8]) -> Result<Observation, CodecError> {
        let text =
            std::str::from_utf8(bytes).map_err(|e| malformed(format!("invalid utf-8: {}", e)))?;
        let raw: RawObservation =
            serde_json::from_str(text).map_err(|e| malformed(format!("invalid json: {}", e)))?;

        let id = raw
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("missing field `id`"))?;

        let price = raw
            .price
            .ok_or_else(|| malformed("missing field `price`"))
            .and_then(|v| parse_price(&v))?;

        let timestamp = raw
            .timestamp
            .ok_or_else(|| malformed("missing field `timestamp`"))
            .and_then(|s| parse_timestamp(&s))?;

        let source = raw
            .source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.default_source.clone());

        Ok(Observation {
            id,
            timestamp,
            price,
            source,
        })
    }

    /// Encode an observation into its transport form
    pub fn encode_record(&self, obs: &Observation) -> Result<String, CodecError> {
        let wire = WireObservation {
            id: &obs.id,
            price: obs.price,
            timestamp: format_timestamp(&obs.timestamp),
            source: &obs.source,
        };
        let json = serde_json::to_vec(&wire)
            .map_err(|e| malformed(format!("cannot encode observation: {}", e)))?;
        Ok(general_purpose::STANDARD.encode(json))
    }
}

fn malformed(msg: impl Into<String>) -> CodecError {
    CodecError::MalformedRecord(msg.into())
}

/// Accepts JSON numbers and numeric strings; rejects anything <= 0
pub fn parse_price(value: &serde_json::Value) -> Result<Decimal, CodecError> {
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        other => return Err(malformed(format!("price is not numeric: {}", other))),
    };

    let price = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| malformed(format!("price is not numeric: {:?}", text)))?;

    if price <= Decimal::ZERO {
        return Err(malformed(format!("price must be positive, got {}", price)));
    }
    Ok(price.normalize())
}

/// ISO-8601 with an explicit offset, or naive (read as UTC)
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CodecError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(malformed(format!("invalid timestamp: {:?}", raw)))
}
