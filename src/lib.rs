//! PriceWatch Library
//!
//! Streaming price-drop detection: decode observations off an ingestion
//! stream, compare each against stored history, persist it and raise a
//! crash alert when the drop crosses the configured threshold.

pub mod alerts;
pub mod app;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod detector;
pub mod errors;
pub mod fetcher;
pub mod history;
pub mod logging;
pub mod stream;
pub mod types;

#[cfg(feature = "reader-api")]
pub mod reader;
