#![forbid(unsafe_code)]

use bx_storage::{ExecutionConfig, SqliteStore, StoreError, SystemClock};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Background maintenance for the execution store: bounds the result cache
/// and requeues jobs whose executor stopped heartbeating.
#[derive(Debug, Parser)]
#[command(name = "bx_janitor", version)]
struct Args {
    /// Directory holding the execution database.
    #[arg(long, env = "BX_STORAGE_DIR")]
    storage_dir: PathBuf,

    /// Overrides BX_CACHE_MAX_BYTES.
    #[arg(long)]
    max_cache_bytes: Option<i64>,

    /// Milliseconds between sweeps.
    #[arg(long, env = "BX_JANITOR_INTERVAL_MS", default_value_t = 60_000)]
    interval_ms: u64,

    /// Run a single sweep and exit.
    #[arg(long)]
    once: bool,
}

fn sweep(store: &mut SqliteStore, max_cache_bytes: i64) -> Result<(), StoreError> {
    let evicted = store.cache_evict(max_cache_bytes)?;
    let stalled = store.reset_stalled()?;
    info!(
        evicted,
        reset = stalled.reset_ids.len(),
        failed = stalled.failed_ids.len(),
        canceled = stalled.canceled_ids.len(),
        "janitor sweep finished"
    );
    Ok(())
}

fn run(args: Args) -> Result<(), StoreError> {
    let mut config = ExecutionConfig::from_env()?;
    if let Some(max_cache_bytes) = args.max_cache_bytes {
        config.cache_max_bytes = max_cache_bytes;
    }
    let max_cache_bytes = config.cache_max_bytes;
    let mut store = SqliteStore::open_with(&args.storage_dir, config, Arc::new(SystemClock))?;
    info!(storage_dir = %args.storage_dir.display(), max_cache_bytes, once = args.once, "janitor started");

    loop {
        if let Err(err) = sweep(&mut store, max_cache_bytes) {
            if args.once {
                return Err(err);
            }
            error!(error = %err, "janitor sweep failed");
        }
        if args.once {
            return Ok(());
        }
        sleep(Duration::from_millis(args.interval_ms.max(1)));
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "janitor stopped");
            ExitCode::FAILURE
        }
    }
}
