#![forbid(unsafe_code)]

use super::StoreError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{Level, debug, span};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationStats {
    pub succeeded: u64,
    pub failed: u64,
}

/// Named store operations: every invocation runs inside a tracing span and is
/// counted by outcome. Cloning shares the counters.
#[derive(Clone, Debug, Default)]
pub struct Operations {
    stats: Arc<Mutex<BTreeMap<&'static str, OperationStats>>>,
}

impl Operations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe<T>(
        &self,
        name: &'static str,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let span = span!(Level::DEBUG, "store_operation", op = name);
        let _entered = span.enter();
        let started = Instant::now();

        let result = f();

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(_) => debug!(op = name, elapsed_ms, "operation succeeded"),
            Err(err) => debug!(op = name, elapsed_ms, error = %err, "operation failed"),
        }
        self.record(name, result.is_ok());
        result
    }

    pub fn stats(&self, name: &str) -> OperationStats {
        let stats = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        stats.get(name).copied().unwrap_or_default()
    }

    fn record(&self, name: &'static str, ok: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = stats.entry(name).or_default();
        if ok {
            entry.succeeded += 1;
        } else {
            entry.failed += 1;
        }
    }
}
