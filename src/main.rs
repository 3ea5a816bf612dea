//! sales-mosaic
//!
//! Usage:
//!   sales-mosaic mosaic [--force]
//!   sales-mosaic sales [--force] [--resume]
//!   sales-mosaic all [--force]
//!   sales-mosaic tile --mosaic images/full_20211001T120000.jpg --id 42 --out 42.png

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sales_mosaic::dataset::SalesStore;
use sales_mosaic::mosaic::{extract_tile, open_mosaic, CoordinateLookup};
use sales_mosaic::opensea::OpenSeaClient;
use sales_mosaic::{MosaicJob, PipelineConfig, SalesJob};

#[derive(Parser, Debug)]
#[command(name = "sales-mosaic")]
#[command(about = "Collect NFT sales, build the collection mosaic, and join them")]
struct Cli {
    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch sale events and rebuild the sales tables
    Sales {
        /// Refetch even if sales are already stored
        #[arg(long)]
        force: bool,

        /// Continue from the last checkpointed offset
        #[arg(long)]
        resume: bool,
    },

    /// Download thumbnails and build the mosaic + coordinate lookup
    Mosaic {
        /// Rebuild even if a lookup already exists
        #[arg(long)]
        force: bool,
    },

    /// Mosaic, then sales
    All {
        #[arg(long)]
        force: bool,
    },

    /// Crop one item's tile out of a finished mosaic
    Tile {
        /// Mosaic image
        #[arg(short, long)]
        mosaic: PathBuf,

        /// Item identifier (token id)
        #[arg(short, long)]
        id: u64,

        /// Output image path
        #[arg(short, long)]
        out: PathBuf,

        /// Lookup file (defaults to the configured lookup path)
        #[arg(short, long)]
        lookup: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;

    match cli.command {
        Commands::Sales { force, resume } => {
            let report = run_sales(&config, force, resume).await?;
            print_report(cli.json, &report)?;
        }
        Commands::Mosaic { force } => {
            let report = run_mosaic(&config, force).await?;
            print_report(cli.json, &report)?;
        }
        Commands::All { force } => {
            let mosaic = run_mosaic(&config, force).await?;
            print_report(cli.json, &mosaic)?;
            let sales = run_sales(&config, force, false).await?;
            print_report(cli.json, &sales)?;
        }
        Commands::Tile {
            mosaic,
            id,
            out,
            lookup,
        } => {
            let lookup_path = lookup.unwrap_or_else(|| config.lookup_path.clone());
            write_tile(&mosaic, &lookup_path, id, &out)?;
        }
    }

    Ok(())
}

fn client(config: &PipelineConfig) -> Result<OpenSeaClient> {
    OpenSeaClient::new(
        &config.base_url,
        Duration::from_secs(config.request_timeout_secs),
    )
}

async fn run_sales(config: &PipelineConfig, force: bool, resume: bool) -> Result<sales_mosaic::SalesReport> {
    let client = client(config)?;
    let store = SalesStore::new(&config.database_path)?;
    info!(db = %config.database_path.display(), "Opened sales store");
    SalesJob::new(config, &client, &store).run(force, resume).await
}

async fn run_mosaic(config: &PipelineConfig, force: bool) -> Result<sales_mosaic::MosaicReport> {
    let client = client(config)?;
    MosaicJob::new(config, &client).run(force).await
}

fn write_tile(mosaic: &Path, lookup_path: &Path, id: u64, out: &Path) -> Result<()> {
    let lookup = CoordinateLookup::load(lookup_path)?;
    let bbox = lookup
        .get(id)
        .ok_or_else(|| anyhow!("item {} is not on the mosaic", id))?;
    let image = open_mosaic(mosaic)?;
    let tile = extract_tile(&image, bbox)?;
    tile.save(out)
        .with_context(|| format!("Failed to save {}", out.display()))?;
    info!(id, out = %out.display(), "Saved tile");
    Ok(())
}

fn print_report<T: Serialize + std::fmt::Debug>(json: bool, report: &T) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{:#?}", report);
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sales_mosaic=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate root
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
