//! Configuration management for PriceWatch
//!
//! Loads defaults, optional `config/default` + `config/local` files, then
//! `PRICEWATCH__*` environment overrides. The deployment variables
//! `TABLE_NAME`, `TOPIC_ARN`, `PRICE_DROP_THRESHOLD_PERCENT`,
//! `LOOKBACK_WINDOW` and `DEFAULT_SOURCE_LABEL` win over everything else.

mod types;

pub use types::parse_window;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::consumer::ConsumerSettings;
use crate::detector::{format_window, DropDetector};

/// Plain environment variables mapped onto config keys
const PLAIN_ENV_OVERRIDES: [(&str, &str); 5] = [
    ("TABLE_NAME", "store.table_name"),
    ("TOPIC_ARN", "alerts.topic"),
    ("PRICE_DROP_THRESHOLD_PERCENT", "detector.threshold_percent"),
    ("LOOKBACK_WINDOW", "detector.lookback_window"),
    ("DEFAULT_SOURCE_LABEL", "consumer.default_source"),
];

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub alerts: AlertsConfig,
    pub detector: DetectorConfig,
    pub consumer: ConsumerConfig,
    pub fetcher: FetcherConfig,
    pub reader: ReaderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// History table identifier (journal file stem)
    pub table_name: String,
    /// Data directory
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Sink identifier; http(s) URLs select the webhook sink
    pub topic: String,
    /// Webhook request timeout in milliseconds
    pub webhook_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Minimum drop, in percent, that raises an alert
    pub threshold_percent: Decimal,
    /// Lookback window (`10h`, `90m`, `1d`; bare numbers are hours)
    pub lookback_window: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Provenance label for records that carry none
    pub default_source: String,
    /// Items processed concurrently within a batch
    pub max_concurrency: usize,
    /// Deadline for a whole batch in milliseconds
    pub batch_timeout_ms: u64,
    /// Maximum records per batch
    pub batch_size: usize,
    /// How long to wait for a batch to fill, in milliseconds
    pub batch_linger_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    pub enabled: bool,
    /// Asset id written on fetched observations
    pub asset_id: String,
    /// Coinbase product (e.g. BTC-USD)
    pub product: String,
    pub base_url: String,
    /// Poll interval in seconds
    pub interval_secs: u64,
    /// HTTP timeout in milliseconds
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    pub enabled: bool,
    pub port: u16,
    /// Range returned when a query names none
    pub default_hours: i64,
    pub max_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human format
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from files and the process environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();
        Self::from_env(std::env::vars())
    }

    /// Load configuration from files and the given environment variables
    pub fn from_env(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let vars: config::Map<String, String> = vars.into_iter().collect();

        let mut builder = Config::builder()
            // Store defaults
            .set_default("store.table_name", "crypto-prices")?
            .set_default("store.data_dir", "./data")?
            // Alert defaults
            .set_default("alerts.topic", "log")?
            .set_default("alerts.webhook_timeout_ms", 5000)?
            // Detector defaults
            .set_default("detector.threshold_percent", "5.0")?
            .set_default("detector.lookback_window", "10h")?
            // Consumer defaults
            .set_default("consumer.default_source", "Coinbase")?
            .set_default("consumer.max_concurrency", 8)?
            .set_default("consumer.batch_timeout_ms", 25_000)?
            .set_default("consumer.batch_size", 100)?
            .set_default("consumer.batch_linger_ms", 1000)?
            // Fetcher defaults
            .set_default("fetcher.enabled", true)?
            .set_default("fetcher.asset_id", "bitcoin")?
            .set_default("fetcher.product", "BTC-USD")?
            .set_default("fetcher.base_url", crate::fetcher::COINBASE_API_URL)?
            .set_default("fetcher.interval_secs", 60)?
            .set_default("fetcher.timeout_ms", 10_000)?
            // Reader defaults
            .set_default("reader.enabled", true)?
            .set_default("reader.port", 8080)?
            .set_default("reader.default_hours", 24)?
            .set_default("reader.max_hours", 24 * 30)?
            // Logging defaults
            .set_default("logging.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEWATCH__*)
            .add_source(
                Environment::with_prefix("PRICEWATCH")
                    .separator("__")
                    .source(Some(vars.clone())),
            );

        for (var, key) in PLAIN_ENV_OVERRIDES {
            let value = vars
                .get(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            builder = builder.set_override_option(key, value)?;
        }

        let config = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<()> {
        self.drop_detector()?;
        if self.store.table_name.trim().is_empty() {
            anyhow::bail!("TABLE_NAME must not be empty");
        }
        if self.reader.default_hours < 1 || self.reader.default_hours > self.reader.max_hours {
            anyhow::bail!(
                "reader.default_hours must be between 1 and reader.max_hours ({})",
                self.reader.max_hours
            );
        }
        Ok(())
    }

    /// Detector built from the threshold and lookback window
    pub fn drop_detector(&self) -> Result<DropDetector> {
        let window = parse_window(&self.detector.lookback_window)
            .context("Invalid LOOKBACK_WINDOW")?;
        DropDetector::new(self.detector.threshold_percent, window)
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            max_concurrency: self.consumer.max_concurrency,
            batch_timeout: Duration::from_millis(self.consumer.batch_timeout_ms),
        }
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        let window = parse_window(&self.detector.lookback_window)
            .map(format_window)
            .unwrap_or_else(|_| self.detector.lookback_window.clone());
        format!(
            "table={} threshold={}% window={} concurrency={} fetcher={} reader={}",
            self.store.table_name,
            self.detector.threshold_percent,
            window,
            self.consumer.max_concurrency,
            self.fetcher.enabled,
            self.reader.enabled
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
