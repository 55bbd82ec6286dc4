//! Application wiring
//!
//! Builds the process-wide store and sink handles once, then runs the
//! fetcher, the batch consumer loop and the reader API side by side.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::alerts::{sink_for_topic, AlertSink};
use crate::codec::ObservationCodec;
use crate::config::AppConfig;
use crate::consumer::BatchConsumer;
use crate::fetcher::{CoinbaseSpotClient, PriceFetcher};
use crate::history::{CsvHistoryStore, HistoryStore};
use crate::stream::{self, BatchReceiver};
use crate::types::BatchSummary;

const STREAM_CAPACITY: usize = 1024;

pub struct App {
    pub config: AppConfig,
    pub store: Arc<dyn HistoryStore>,
    pub sink: Arc<dyn AlertSink>,
    pub consumer: Arc<BatchConsumer>,
}

impl App {
    pub fn build(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn HistoryStore> = Arc::new(
            CsvHistoryStore::open(&config.store.data_dir, &config.store.table_name)
                .context("Failed to open history store")?,
        );
        let sink = sink_for_topic(
            &config.alerts.topic,
            Duration::from_millis(config.alerts.webhook_timeout_ms),
        )?;
        Self::with_handles(config, store, sink)
    }

    /// Wire the app around existing store/sink handles
    pub fn with_handles(
        config: AppConfig,
        store: Arc<dyn HistoryStore>,
        sink: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        let consumer = Arc::new(BatchConsumer::new(
            ObservationCodec::new(config.consumer.default_source.clone()),
            config.drop_detector()?,
            store.clone(),
            sink.clone(),
            config.consumer_settings(),
        ));

        Ok(Self {
            config,
            store,
            sink,
            consumer,
        })
    }

    pub fn codec(&self) -> ObservationCodec {
        ObservationCodec::new(self.config.consumer.default_source.clone())
    }

    pub fn fetcher(&self, stream: Arc<dyn stream::IngestionStream>) -> Result<PriceFetcher> {
        let cfg = &self.config.fetcher;
        let client = CoinbaseSpotClient::new(
            &cfg.base_url,
            &cfg.product,
            Duration::from_millis(cfg.timeout_ms),
        )?;
        Ok(PriceFetcher::new(client, self.codec(), stream, cfg.asset_id.clone()))
    }

    #[cfg(feature = "reader-api")]
    pub fn reader_state(&self) -> crate::reader::ReaderState {
        crate::reader::ReaderState {
            store: self.store.clone(),
            default_id: self.config.fetcher.asset_id.clone(),
            default_hours: self.config.reader.default_hours,
            max_hours: self.config.reader.max_hours,
        }
    }

    /// Run fetcher + consumer (+ reader) until ctrl-c
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (publisher, receiver) = stream::channel(STREAM_CAPACITY);

        let mut tasks = Vec::new();

        if self.config.fetcher.enabled {
            let fetcher = self.fetcher(Arc::new(publisher))?;
            let interval = Duration::from_secs(self.config.fetcher.interval_secs.max(1));
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move { fetcher.run(interval, rx).await }));
        } else {
            info!("Price fetcher disabled");
            drop(publisher);
        }

        #[cfg(feature = "reader-api")]
        if self.config.reader.enabled {
            let state = self.reader_state();
            let port = self.config.reader.port;
            tokio::spawn(async move {
                if let Err(e) = crate::reader::start_server(state, port).await {
                    tracing::error!(error = %e, "History reader API stopped");
                }
            });
        }

        let consumer = self.consumer.clone();
        let batch_size = self.config.consumer.batch_size;
        let linger = Duration::from_millis(self.config.consumer.batch_linger_ms);
        let consumer_task = tokio::spawn(async move {
            consume_stream(consumer, receiver, batch_size, linger).await
        });

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);

        for task in tasks {
            let _ = task.await;
        }
        // Fetcher is gone, so the consumer drains what is left and stops
        let totals = consumer_task.await.context("Consumer task panicked")?;
        info!(%totals, "Consumer stopped");
        Ok(())
    }
}

/// Drain the ingestion stream batch by batch until every publisher is gone
pub async fn consume_stream(
    consumer: Arc<BatchConsumer>,
    mut receiver: BatchReceiver,
    batch_size: usize,
    linger: Duration,
) -> BatchSummary {
    let mut totals = BatchSummary::default();
    while let Some(batch) = receiver.next_batch(batch_size, linger).await {
        totals.merge(&consumer.process_batch(&batch).await);
    }
    totals
}
