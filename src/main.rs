//! PriceWatch - price history ingestion and crash alerts
//!
//! Usage:
//!   pricewatch run                  # fetcher + consumer + reader API
//!   pricewatch consume event.json   # process one stream event, print summary
//!   pricewatch fetch                # fetch one spot price and process it
//!   pricewatch serve                # reader API only

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use pricewatch::app::App;
use pricewatch::config::AppConfig;
use pricewatch::logging;
use pricewatch::stream::{self, IngestionStream};

#[derive(Parser, Debug)]
#[command(name = "pricewatch")]
#[command(about = "Record spot prices and alert on sharp drops", version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the fetcher, batch consumer and reader API until ctrl-c
    Run,

    /// Process one stream event file (`{"Records": [...]}`) and print the summary
    Consume {
        /// Path to the event JSON
        event: PathBuf,
    },

    /// Fetch one spot price, print its encoded record and push it through the consumer
    Fetch,

    /// Serve the history reader API only
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load()?;
    logging::init(config.logging.json);

    info!(config = %config, "PriceWatch starting");
    let app = App::build(config)?;

    match args.command {
        Commands::Run => app.run().await?,
        Commands::Consume { event } => consume_file(&app, &event).await?,
        Commands::Fetch => fetch_once(&app).await?,
        Commands::Serve { port } => serve(&app, port).await?,
    }

    Ok(())
}

async fn consume_file(app: &App, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read event file: {}", path.display()))?;
    let summary = app.consumer.process_event(&bytes).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn fetch_once(app: &App) -> Result<()> {
    let (publisher, mut receiver) = stream::channel(1);
    let publisher: Arc<dyn IngestionStream> = Arc::new(publisher);
    let fetcher = app.fetcher(publisher)?;

    let obs = fetcher.run_once().await?;
    drop(fetcher);

    let batch = receiver
        .next_batch(1, std::time::Duration::ZERO)
        .await
        .context("Fetched observation was not published")?;
    for record in &batch {
        println!("{}", serde_json::to_string(record)?);
    }

    let summary = app.consumer.process_batch(&batch).await;
    info!(observation = %obs, %summary, "Fetched observation processed");
    Ok(())
}

#[cfg(feature = "reader-api")]
async fn serve(app: &App, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(app.config.reader.port);
    pricewatch::reader::start_server(app.reader_state(), port).await
}

#[cfg(not(feature = "reader-api"))]
async fn serve(_app: &App, _port: Option<u16>) -> Result<()> {
    anyhow::bail!("pricewatch was built without the reader-api feature")
}
