//! Price fetcher - Coinbase spot poller
//!
//! One request per tick, one observation published per successful request.
//! No retries: a failed poll is logged and the next tick tries again.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::codec::{parse_price, ObservationCodec};
use crate::stream::IngestionStream;
use crate::types::Observation;

pub const COINBASE_API_URL: &str = "https://api.coinbase.com";

#[derive(Debug, Deserialize)]
struct SpotResponse {
    data: SpotData,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    amount: serde_json::Value,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

/// Parse a `/v2/prices/<product>/spot` body into a price
pub fn parse_spot_response(body: &str) -> Result<Decimal> {
    let response: SpotResponse =
        serde_json::from_str(body).context("Unexpected Coinbase spot response shape")?;
    if let (Some(base), Some(currency)) = (&response.data.base, &response.data.currency) {
        tracing::trace!(base = %base, currency = %currency, "Spot quote");
    }
    Ok(parse_price(&response.data.amount)?)
}

/// REST client for the Coinbase spot price endpoint
#[derive(Debug, Clone)]
pub struct CoinbaseSpotClient {
    client: Client,
    base_url: String,
    product: String,
}

impl CoinbaseSpotClient {
    pub fn new(base_url: &str, product: &str, timeout: Duration) -> Result<Self> {
        if product.trim().is_empty() {
            bail!("Coinbase product must not be empty");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            product: product.trim().to_uppercase(),
        })
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub async fn spot_price(&self) -> Result<Decimal> {
        let url = format!("{}/v2/prices/{}/spot", self.base_url, self.product);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        let body = response.text().await.context("Failed to read spot body")?;
        if !status.is_success() {
            bail!("Coinbase returned {}: {}", status, body);
        }
        parse_spot_response(&body)
    }
}

/// Polls a spot price and publishes observations onto the ingestion stream
pub struct PriceFetcher {
    client: CoinbaseSpotClient,
    codec: ObservationCodec,
    stream: Arc<dyn IngestionStream>,
    asset_id: String,
}

impl PriceFetcher {
    pub fn new(
        client: CoinbaseSpotClient,
        codec: ObservationCodec,
        stream: Arc<dyn IngestionStream>,
        asset_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            codec,
            stream,
            asset_id: asset_id.into(),
        }
    }

    /// Build the observation for a freshly fetched price
    pub fn observation(&self, price: Decimal, at: DateTime<Utc>) -> Observation {
        Observation::new(
            self.asset_id.clone(),
            at,
            price,
            self.codec.default_source(),
        )
    }

    /// Fetch once and publish. Returns the published observation.
    pub async fn run_once(&self) -> Result<Observation> {
        let price = self.client.spot_price().await?;
        let obs = self.observation(price, Utc::now());
        info!(
            asset_id = %obs.id,
            product = %self.client.product(),
            price = %obs.price,
            "Price fetched"
        );

        let data = self.codec.encode_record(&obs)?;
        self.stream
            .enqueue(&obs.id, data)
            .await
            .context("Failed to publish observation")?;
        Ok(obs)
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(asset_id = %self.asset_id, error = %e, "Price fetch failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(asset_id = %self.asset_id, "Price fetcher stopped");
    }
}
