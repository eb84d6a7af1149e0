#![forbid(unsafe_code)]

mod cache;
mod cancel;
mod clock;
mod collaborators;
mod completion;
mod config;
mod entities;
mod error;
mod observation;
mod queue;
mod support;
mod types;

pub use cancel::DrainSignal;
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{AllowAllRepos, RepoAuthorizer};
pub use completion::ExecutionWorkerStore;
pub use config::{DEFAULT_CACHE_SCHEMA_VERSION, ExecutionConfig};
pub use error::StoreError;
pub use observation::{OperationStats, Operations};
pub use queue::WorkerStore;
pub use types::*;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DB_FILE_NAME: &str = "batchexec.db";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    config: ExecutionConfig,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(storage_dir, ExecutionConfig::default(), Arc::new(SystemClock))
    }

    pub fn open_with(
        storage_dir: impl AsRef<Path>,
        config: ExecutionConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let storage_dir = storage_dir.as_ref();
        std::fs::create_dir_all(storage_dir)?;

        let db_path = storage_dir.join(DB_FILE_NAME);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        support::schema::install_schema(&conn)?;

        Ok(Self {
            conn,
            config,
            clock,
        })
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
