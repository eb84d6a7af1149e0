#![forbid(unsafe_code)]

use super::support::sql_placeholders;
use super::{CancelFilter, CancelResult, SqliteStore, StoreError};
use bx_core::model::CANCELED_FAILURE_MESSAGE;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::info;

/// Wakes drain waiters whenever a job reaches a terminal state in this
/// process. Waiters also re-check on a timer to see completions made by
/// other processes.
#[derive(Debug, Default)]
pub struct DrainSignal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl DrainSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Blocks until the generation moves past `seen` or `timeout` elapses.
    /// Returns whether it moved.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> bool {
        let guard = self.generation.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (guard, _timeout) = self
            .changed
            .wait_timeout_while(guard, timeout, |generation| *generation == seen)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard != seen
    }
}

/// `(sql predicate over execution_jobs, bound values)` for a filter.
fn filter_sql(filter: &CancelFilter) -> (String, Vec<Value>) {
    match filter {
        CancelFilter::Ids(ids) => (
            format!("id IN ({})", sql_placeholders(1, ids.len())),
            ids.iter().map(|id| Value::Integer(*id)).collect(),
        ),
        CancelFilter::BatchSpec(batch_spec_id) => (
            "workspace_id IN (SELECT w.id FROM workspaces w WHERE w.batch_spec_id=?1)".to_string(),
            vec![Value::Integer(*batch_spec_id)],
        ),
    }
}

fn is_empty_filter(filter: &CancelFilter) -> bool {
    matches!(filter, CancelFilter::Ids(ids) if ids.is_empty())
}

impl SqliteStore {
    /// Queued and errored jobs are canceled outright; processing jobs are only
    /// flagged and keep running until their executor notices.
    pub fn cancel_execution_jobs(&mut self, filter: &CancelFilter) -> Result<CancelResult, StoreError> {
        if is_empty_filter(filter) {
            return Ok(CancelResult::default());
        }
        let now_ms = self.now_ms();
        let (predicate, bound) = filter_sql(filter);
        let next = bound.len() + 1;

        let tx = self.conn.transaction()?;
        let canceled_ids = {
            let mut stmt = tx.prepare(&format!(
                r#"
                UPDATE execution_jobs
                SET state='canceled', cancel=1, failure_message=?{msg}, finished_at_ms=?{now}, updated_at_ms=?{now}
                WHERE {predicate} AND state IN ('queued', 'errored')
                RETURNING id
                "#,
                msg = next,
                now = next + 1,
            ))?;
            let mut values = bound.clone();
            values.push(Value::Text(CANCELED_FAILURE_MESSAGE.to_string()));
            values.push(Value::Integer(now_ms));
            let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, i64>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };
        let flagged_ids = {
            let mut stmt = tx.prepare(&format!(
                r#"
                UPDATE execution_jobs
                SET cancel=1, updated_at_ms=?{now}
                WHERE {predicate} AND state='processing'
                RETURNING id
                "#,
                now = next,
            ))?;
            let mut values = bound;
            values.push(Value::Integer(now_ms));
            let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, i64>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };
        tx.commit()?;

        let mut result = CancelResult {
            canceled_ids,
            flagged_ids,
        };
        result.canceled_ids.sort_unstable();
        result.flagged_ids.sort_unstable();
        info!(
            canceled = result.canceled_ids.len(),
            flagged = result.flagged_ids.len(),
            "canceled execution jobs"
        );
        Ok(result)
    }

    /// Matching jobs still held by an executor.
    pub fn count_processing(&self, filter: &CancelFilter) -> Result<i64, StoreError> {
        if is_empty_filter(filter) {
            return Ok(0);
        }
        let (predicate, bound) = filter_sql(filter);
        Ok(self.conn.query_row(
            &format!("SELECT COUNT(*) FROM execution_jobs WHERE {predicate} AND state='processing'"),
            params_from_iter(bound),
            |row| row.get(0),
        )?)
    }
}
