//! Command-line sync driver.
//!
//! Reads serial numbers from a file (or takes a single `--serial`), builds
//! the engine over environment-backed credentials, and streams progress to
//! the console. The relational inventory and record store are external
//! collaborators; this binary stands in with a file-backed inventory and
//! the in-memory store, which makes it a dry-run and diagnostics tool.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleetcare_core::{EnvCredentials, InventoryFilter, StaticInventory};
use fleetcare_engine::{ProgressSink, StaticResellerDirectory, SyncEngine};
use fleetcare_store::MemoryStore;

#[derive(Debug, Parser)]
#[command(
    name = "fleetcare-sync",
    about = "Sync device coverage records from the vendor API"
)]
struct Cli {
    /// Sync a single serial number instead of a fleet list.
    #[arg(long, conflicts_with = "serials_file")]
    serial: Option<String>,

    /// File with one serial number per line.
    #[arg(long)]
    serials_file: Option<PathBuf>,

    /// Only process devices without stored records.
    #[arg(long)]
    incremental: bool,

    /// Optional reseller map file, one `ID=Name` pair per line.
    #[arg(long)]
    resellers_file: Option<PathBuf>,
}

/// Prints progress lines the way the admin UI expects to scrape them.
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn emit(&self, message: &str, is_error: bool) {
        if is_error {
            eprintln!("{message}");
        } else {
            println!("{message}");
        }
    }
}

fn read_serials(path: &PathBuf) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read serials file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

fn read_resellers(path: &PathBuf) -> anyhow::Result<StaticResellerDirectory> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read resellers file {}", path.display()))?;
    Ok(StaticResellerDirectory::from_pairs(
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                line.split_once('=')
                    .map(|(id, name)| (id.trim().to_string(), name.trim().to_string()))
            }),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let serials = match (&cli.serial, &cli.serials_file) {
        (Some(serial), _) => vec![serial.clone()],
        (None, Some(path)) => read_serials(path)?,
        (None, None) => bail!("provide --serial or --serials-file"),
    };
    if serials.is_empty() {
        bail!("no serial numbers to process");
    }

    let mut engine = SyncEngine::new(
        Arc::new(EnvCredentials),
        Arc::new(StaticInventory::new(serials.clone())),
        Arc::new(MemoryStore::new()),
    )
    .map_err(|err| anyhow::anyhow!("failed to build sync engine: {err}"))?
    .with_progress(Arc::new(ConsoleSink));

    if let Some(path) = &cli.resellers_file {
        engine = engine.with_resellers(Arc::new(read_resellers(path)?));
    }

    // Ctrl-C flips the abort flag; the run stops at the next device.
    let abort = engine.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.store(true, Ordering::Relaxed);
        }
    });

    if let Some(serial) = &cli.serial {
        let result = engine.sync_one(serial).await;
        println!("{}", result.message);
        if !result.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    let filter = if cli.incremental {
        InventoryFilter::MissingRecordsOnly
    } else {
        InventoryFilter::All
    };

    info!(devices = serials.len(), "starting fleet sync");
    let summary = engine.run(filter).await;

    println!("================================================");
    println!("Sync Complete");
    println!("================================================");
    println!("Total devices: {}", summary.total);
    println!("Synced: {}", summary.synced);
    println!("Skipped: {}", summary.skipped);
    println!("Errors: {}", summary.errors);

    if summary.errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
