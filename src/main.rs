//! wxgate - cached, rate-limited weather lookups
//!
//! Resolves one query per run and prints the vendor payload to stdout.
//! Diagnostics go to stderr; set `RUST_LOG` to change their verbosity.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wxgate::cache::{CacheStore, FileStore, KeyValueStore, SnapshotWriter};
use wxgate::cli::{Cli, Command, Invocation};
use wxgate::clock::SystemClock;
use wxgate::fetch::HttpFetcher;
use wxgate::{RequestOrchestrator, ResponseSource};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn run(invocation: Invocation) -> Result<(), Box<dyn std::error::Error>> {
    let store = match invocation.cache_dir {
        Some(dir) => FileStore::with_dir(dir),
        None => FileStore::new().ok_or("could not determine a cache directory; pass --cache-dir")?,
    };
    store
        .ping()
        .map_err(|e| format!("cache store at {} is unavailable: {}", store.dir().display(), e))?;
    tracing::debug!(dir = %store.dir().display(), "cache store ready");

    let cache = CacheStore::new(Arc::new(store), Arc::new(SystemClock))
        .with_snapshots(SnapshotWriter::new(invocation.snapshot_dir));

    if let Command::ListCached(prefix) = &invocation.command {
        let mut stdout = io::stdout().lock();
        for key in cache.keys(prefix)? {
            writeln!(stdout, "{}", key)?;
        }
        return Ok(());
    }

    let orchestrator =
        RequestOrchestrator::new(invocation.config, cache, Arc::new(HttpFetcher::new()))?;

    if let Command::Fetch(query) = &invocation.command {
        let response = orchestrator.handle(query).await?;
        if let Some(e) = &response.persist_error {
            eprintln!("Warning: response was not saved: {}", e);
        }
        if response.source == ResponseSource::Cache {
            tracing::info!(key = %response.key, fetched_at = %response.fetched_at, "cached response");
        }
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", response.payload)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let invocation = match Invocation::from_cli(&cli) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    match run(invocation).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
