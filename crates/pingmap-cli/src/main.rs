use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pingmap_core::{AppConfig, MAX_PRECISION};
use pingmap_db::StoreBackend;
use pingmap_engine::{EngineConfig, PingMapService};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pingmap-cli")]
#[command(about = "Ping reliability map command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Merge a JSON file of probes into the configured store.
    Ingest {
        /// Array of probes or `{ "pings": [...] }`.
        file: PathBuf,
    },
    /// Print one page of persisted cells.
    Cells {
        #[arg(long)]
        limit: Option<usize>,
        /// `nextCursor` from the previous page.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Print the bucket id for a coordinate without touching storage.
    Bucket {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        #[arg(long)]
        precision: Option<usize>,
    },
    /// Delete every persisted cell.
    Clear {
        /// Required; there is no undo.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = pingmap_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Bucket {
            lat,
            lon,
            precision,
        }) => {
            let id = bucket_for(lat, lon, precision.unwrap_or(config.geohash_precision))?;
            println!("{}", serde_json::json!({ "bucket": id }));
        }
        Some(Commands::Ingest { file }) => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let body: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            let service = connect(&config).await?;
            let summary = service.ingest(body).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Some(Commands::Cells { limit, cursor }) => {
            let service = connect(&config).await?;
            let page = service.list_cells(cursor.as_deref(), limit).await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Some(Commands::Clear { yes }) => {
            anyhow::ensure!(yes, "refusing to clear every cell without --yes");
            let service = connect(&config).await?;
            let report = service.clear_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        None => println!("pingmap-cli: run with --help to list commands"),
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<PingMapService<StoreBackend>> {
    let store = StoreBackend::connect(config).await?;
    tracing::info!(store = store.name(), "cell store ready");
    let service = PingMapService::new(store, EngineConfig::from_app_config(config));
    service.health().await.context("cell store health check failed")?;
    Ok(service)
}

fn bucket_for(lat: f64, lon: f64, precision: usize) -> anyhow::Result<String> {
    anyhow::ensure!(
        (-90.0..=90.0).contains(&lat),
        "latitude {lat} is outside -90..=90"
    );
    anyhow::ensure!(
        (-180.0..=180.0).contains(&lon),
        "longitude {lon} is outside -180..=180"
    );
    anyhow::ensure!(
        (1..=MAX_PRECISION).contains(&precision),
        "precision must be between 1 and {MAX_PRECISION}"
    );
    Ok(pingmap_core::bucket(lat, lon, precision).to_string())
}
