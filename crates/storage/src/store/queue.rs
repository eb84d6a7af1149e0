#![forbid(unsafe_code)]

use super::entities::{batch_spec_tx, workspace_tx};
use super::support::{RANKED_QUEUE_SQL, next_counter_tx, sql_placeholders};
use super::{
    ExecutionJobRow, HeartbeatResult, MarkFinalOptions, RankedJob, ResetStalledResult, SqliteStore,
    StoreError, duration_ms,
};
use bx_core::execution::ExecutionLogEntry;
use bx_core::model::{CANCELED_FAILURE_MESSAGE, JobState};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter};
use tracing::{debug, info, warn};

pub(in crate::store) const JOB_COLUMNS: &str = "id, workspace_id, user_id, state, cancel, failure_message, num_resets, num_failures, process_after_ms, started_at_ms, finished_at_ms, last_heartbeat_at_ms, worker_hostname, created_at_ms, updated_at_ms";

const DEQUEUE_SEQ_COUNTER: &str = "dequeue_seq";
const RESET_LIMIT_FAILURE_MESSAGE: &str = "job exceeded maximum number of resets";

/// The queue surface an executor talks to. Terminal transitions return
/// `Ok(false)` when the job is not processing or is held by another worker.
pub trait WorkerStore {
    fn dequeue(&mut self, worker_hostname: &str) -> Result<Option<ExecutionJobRow>, StoreError>;

    fn add_execution_log_entry(
        &mut self,
        job_id: i64,
        entry: &ExecutionLogEntry,
        options: &MarkFinalOptions,
    ) -> Result<i64, StoreError>;

    fn update_execution_log_entry(
        &mut self,
        job_id: i64,
        seq: i64,
        entry: &ExecutionLogEntry,
        options: &MarkFinalOptions,
    ) -> Result<bool, StoreError>;

    fn heartbeat(&mut self, worker_hostname: &str, ids: &[i64]) -> Result<HeartbeatResult, StoreError>;

    fn mark_complete(&mut self, id: i64, options: &MarkFinalOptions) -> Result<bool, StoreError>;

    fn mark_failed(
        &mut self,
        id: i64,
        failure_message: &str,
        options: &MarkFinalOptions,
    ) -> Result<bool, StoreError>;

    fn mark_errored(
        &mut self,
        id: i64,
        failure_message: &str,
        options: &MarkFinalOptions,
    ) -> Result<bool, StoreError>;
}

pub(in crate::store) fn read_job_row(row: &rusqlite::Row<'_>) -> Result<ExecutionJobRow, rusqlite::Error> {
    let raw_state: String = row.get(3)?;
    let state = JobState::parse(&raw_state)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(3, "state".to_string(), Type::Text))?;
    Ok(ExecutionJobRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        user_id: row.get(2)?,
        state,
        cancel: row.get(4)?,
        failure_message: row.get(5)?,
        num_resets: row.get(6)?,
        num_failures: row.get(7)?,
        process_after_ms: row.get(8)?,
        started_at_ms: row.get(9)?,
        finished_at_ms: row.get(10)?,
        last_heartbeat_at_ms: row.get(11)?,
        worker_hostname: row.get(12)?,
        created_at_ms: row.get(13)?,
        updated_at_ms: row.get(14)?,
    })
}

pub(in crate::store) fn execution_job_tx(conn: &Connection, id: i64) -> Result<Option<ExecutionJobRow>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM execution_jobs WHERE id=?1"),
            params![id],
            read_job_row,
        )
        .optional()?)
}

pub(in crate::store) fn execution_logs_tx(conn: &Connection, job_id: i64) -> Result<Vec<ExecutionLogEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT key, command_json, start_time_ms, exit_code, out, duration_ms \
         FROM execution_log_entries WHERE job_id=?1 ORDER BY seq ASC",
    )?;
    let mut rows = stmt.query(params![job_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let command_json: String = row.get(1)?;
        out.push(ExecutionLogEntry {
            key: row.get(0)?,
            command: serde_json::from_str(&command_json)?,
            start_time_ms: row.get(2)?,
            exit_code: row.get(3)?,
            out: row.get(4)?,
            duration_ms: row.get(5)?,
        });
    }
    Ok(out)
}

fn is_held_by_tx(conn: &Connection, job_id: i64, worker_hostname: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM execution_jobs WHERE id=?1 AND state='processing' AND worker_hostname=?2",
            params![job_id, worker_hostname],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(in crate::store) fn mark_complete_tx(
    tx: &Transaction<'_>,
    id: i64,
    options: &MarkFinalOptions,
    now_ms: i64,
) -> Result<bool, StoreError> {
    let changed = tx.execute(
        r#"
        UPDATE execution_jobs
        SET state='completed', finished_at_ms=?3, updated_at_ms=?3
        WHERE id=?1 AND state='processing' AND worker_hostname=?2
        "#,
        params![id, options.worker_hostname, now_ms],
    )?;
    Ok(changed == 1)
}

pub(in crate::store) fn mark_failed_tx(
    tx: &Transaction<'_>,
    id: i64,
    failure_message: &str,
    options: &MarkFinalOptions,
    now_ms: i64,
) -> Result<bool, StoreError> {
    let changed = tx.execute(
        r#"
        UPDATE execution_jobs
        SET state='failed', failure_message=?3, finished_at_ms=?4, updated_at_ms=?4
        WHERE id=?1 AND state='processing' AND worker_hostname=?2
        "#,
        params![id, options.worker_hostname, failure_message, now_ms],
    )?;
    Ok(changed == 1)
}

/// Counts the failure; below `max_num_retries` the job waits `retry_delay`
/// in `errored` and is dequeued again, otherwise it fails for good. A job
/// flagged for cancellation is canceled instead of being retried.
pub(in crate::store) fn mark_errored_tx(
    tx: &Transaction<'_>,
    id: i64,
    failure_message: &str,
    options: &MarkFinalOptions,
    now_ms: i64,
    max_num_retries: i64,
    retry_delay_ms: i64,
) -> Result<bool, StoreError> {
    let changed = tx.execute(
        r#"
        UPDATE execution_jobs
        SET num_failures = num_failures + 1,
            state = CASE
              WHEN cancel = 1 THEN 'canceled'
              WHEN num_failures + 1 < ?5 THEN 'errored'
              ELSE 'failed'
            END,
            process_after_ms = CASE WHEN cancel = 0 AND num_failures + 1 < ?5 THEN ?4 + ?6 ELSE NULL END,
            failure_message = CASE WHEN cancel = 1 THEN ?7 ELSE ?3 END,
            finished_at_ms=?4,
            updated_at_ms=?4
        WHERE id=?1 AND state='processing' AND worker_hostname=?2
        "#,
        params![
            id,
            options.worker_hostname,
            failure_message,
            now_ms,
            max_num_retries,
            retry_delay_ms,
            CANCELED_FAILURE_MESSAGE
        ],
    )?;
    Ok(changed == 1)
}

impl SqliteStore {
    pub fn enqueue_execution_job(&mut self, workspace_id: i64) -> Result<ExecutionJobRow, StoreError> {
        let now_ms = self.now_ms();
        let tx = self.conn.transaction()?;
        let workspace = workspace_tx(&tx, workspace_id)?.ok_or(StoreError::NotFound {
            entity: "workspace",
            id: workspace_id,
        })?;
        let batch_spec = batch_spec_tx(&tx, workspace.batch_spec_id)?.ok_or(StoreError::NotFound {
            entity: "batch spec",
            id: workspace.batch_spec_id,
        })?;

        tx.execute(
            r#"
            INSERT INTO execution_jobs(workspace_id, user_id, state, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, 'queued', ?3, ?3)
            "#,
            params![workspace_id, batch_spec.user_id, now_ms],
        )?;
        let id = tx.last_insert_rowid();
        let job = execution_job_tx(&tx, id)?.ok_or(StoreError::NotFound {
            entity: "execution job",
            id,
        })?;
        tx.commit()?;

        debug!(job_id = id, workspace_id, user_id = batch_spec.user_id, "enqueued execution job");
        Ok(job)
    }

    /// Reads from the base table, never from the ranked queue.
    pub fn execution_job(&self, id: i64) -> Result<Option<ExecutionJobRow>, StoreError> {
        execution_job_tx(&self.conn, id)
    }

    pub fn execution_logs(&self, job_id: i64) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        execution_logs_tx(&self.conn, job_id)
    }

    /// Jobs dequeueable right now, in round-robin order.
    pub fn ranked_queue(&self) -> Result<Vec<RankedJob>, StoreError> {
        let now_ms = self.now_ms();
        let mut stmt = self.conn.prepare(RANKED_QUEUE_SQL)?;
        let rows = stmt.query_map(params![now_ms], |row| {
            Ok(RankedJob {
                id: row.get(0)?,
                user_id: row.get(1)?,
                place_in_user_queue: row.get(2)?,
                place_in_global_queue: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Requeues processing jobs whose heartbeat is older than the stalled max
    /// age. Jobs over the reset limit fail; jobs flagged for cancellation are
    /// canceled instead of requeued.
    pub fn reset_stalled(&mut self) -> Result<ResetStalledResult, StoreError> {
        let now_ms = self.now_ms();
        let cutoff_ms = now_ms.saturating_sub(duration_ms(self.config.stalled_max_age));
        let max_num_resets = self.config.max_num_resets;

        let tx = self.conn.transaction()?;
        let stalled: Vec<(i64, i64, bool)> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, num_resets, cancel FROM execution_jobs
                WHERE state='processing' AND COALESCE(last_heartbeat_at_ms, started_at_ms, 0) < ?1
                ORDER BY id ASC
                "#,
            )?;
            let rows = stmt.query_map(params![cutoff_ms], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        let mut result = ResetStalledResult::default();
        for (id, num_resets, cancel) in stalled {
            if cancel {
                tx.execute(
                    r#"
                    UPDATE execution_jobs
                    SET state='canceled', failure_message=?2, finished_at_ms=?3, updated_at_ms=?3
                    WHERE id=?1
                    "#,
                    params![id, CANCELED_FAILURE_MESSAGE, now_ms],
                )?;
                result.canceled_ids.push(id);
            } else if num_resets < max_num_resets {
                tx.execute(
                    r#"
                    UPDATE execution_jobs
                    SET state='queued', num_resets=num_resets + 1, worker_hostname='',
                        started_at_ms=NULL, last_heartbeat_at_ms=NULL, updated_at_ms=?2
                    WHERE id=?1
                    "#,
                    params![id, now_ms],
                )?;
                result.reset_ids.push(id);
            } else {
                tx.execute(
                    r#"
                    UPDATE execution_jobs
                    SET state='failed', failure_message=?2, finished_at_ms=?3, updated_at_ms=?3
                    WHERE id=?1
                    "#,
                    params![id, RESET_LIMIT_FAILURE_MESSAGE, now_ms],
                )?;
                result.failed_ids.push(id);
            }
        }
        tx.commit()?;

        if !result.is_empty() {
            warn!(
                reset = result.reset_ids.len(),
                failed = result.failed_ids.len(),
                canceled = result.canceled_ids.len(),
                "reset stalled execution jobs"
            );
        }
        Ok(result)
    }
}

impl WorkerStore for SqliteStore {
    fn dequeue(&mut self, worker_hostname: &str) -> Result<Option<ExecutionJobRow>, StoreError> {
        if worker_hostname.trim().is_empty() {
            return Err(StoreError::InvalidInput("worker hostname must not be empty"));
        }
        let now_ms = self.now_ms();
        // Write lock up front: concurrent workers serialize here.
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<(i64, i64)> = tx
            .query_row(
                &format!("{RANKED_QUEUE_SQL} LIMIT 1"),
                params![now_ms],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((id, user_id)) = candidate else {
            return Ok(None);
        };

        let changed = tx.execute(
            r#"
            UPDATE execution_jobs
            SET state='processing', worker_hostname=?2, started_at_ms=?3, last_heartbeat_at_ms=?3,
                finished_at_ms=NULL, failure_message=NULL, process_after_ms=NULL, updated_at_ms=?3
            WHERE id=?1 AND state IN ('queued', 'errored') AND cancel=0
            "#,
            params![id, worker_hostname, now_ms],
        )?;
        if changed != 1 {
            return Ok(None);
        }

        let seq = next_counter_tx(&tx, DEQUEUE_SEQ_COUNTER)?;
        tx.execute(
            r#"
            INSERT INTO last_dequeues(user_id, latest_dequeue_seq, latest_dequeue_at_ms) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
              latest_dequeue_seq=excluded.latest_dequeue_seq,
              latest_dequeue_at_ms=excluded.latest_dequeue_at_ms
            "#,
            params![user_id, seq, now_ms],
        )?;

        let job = execution_job_tx(&tx, id)?.ok_or(StoreError::NotFound {
            entity: "execution job",
            id,
        })?;
        tx.commit()?;

        info!(job_id = id, user_id, worker_hostname, "dequeued execution job");
        Ok(Some(job))
    }

    fn add_execution_log_entry(
        &mut self,
        job_id: i64,
        entry: &ExecutionLogEntry,
        options: &MarkFinalOptions,
    ) -> Result<i64, StoreError> {
        let tx = self.conn.transaction()?;
        if !is_held_by_tx(&tx, job_id, &options.worker_hostname)? {
            return Err(StoreError::InvalidInput(
                "execution log entry rejected: job is not processing on this worker",
            ));
        }
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM execution_log_entries WHERE job_id=?1",
            params![job_id],
            |row| row.get(0),
        )?;
        tx.execute(
            r#"
            INSERT INTO execution_log_entries(job_id, seq, key, command_json, start_time_ms, exit_code, out, duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                job_id,
                seq,
                entry.key,
                serde_json::to_string(&entry.command)?,
                entry.start_time_ms,
                entry.exit_code,
                entry.out,
                entry.duration_ms
            ],
        )?;
        tx.commit()?;

        debug!(job_id, seq, key = %entry.key, "added execution log entry");
        Ok(seq)
    }

    fn update_execution_log_entry(
        &mut self,
        job_id: i64,
        seq: i64,
        entry: &ExecutionLogEntry,
        options: &MarkFinalOptions,
    ) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        if !is_held_by_tx(&tx, job_id, &options.worker_hostname)? {
            return Ok(false);
        }
        let changed = tx.execute(
            r#"
            UPDATE execution_log_entries
            SET key=?3, command_json=?4, start_time_ms=?5, exit_code=?6, out=?7, duration_ms=?8
            WHERE job_id=?1 AND seq=?2
            "#,
            params![
                job_id,
                seq,
                entry.key,
                serde_json::to_string(&entry.command)?,
                entry.start_time_ms,
                entry.exit_code,
                entry.out,
                entry.duration_ms
            ],
        )?;
        tx.commit()?;
        Ok(changed == 1)
    }

    fn heartbeat(&mut self, worker_hostname: &str, ids: &[i64]) -> Result<HeartbeatResult, StoreError> {
        if ids.is_empty() {
            return Ok(HeartbeatResult::default());
        }
        let now_ms = self.now_ms();
        let held_filter = format!(
            "state='processing' AND worker_hostname=?1 AND id IN ({})",
            sql_placeholders(3, ids.len())
        );
        let mut bound: Vec<rusqlite::types::Value> = vec![worker_hostname.to_string().into(), now_ms.into()];
        bound.extend(ids.iter().map(|id| rusqlite::types::Value::Integer(*id)));

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("UPDATE execution_jobs SET last_heartbeat_at_ms=?2 WHERE {held_filter}"),
            params_from_iter(bound.iter()),
        )?;

        let mut result = HeartbeatResult::default();
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT id, cancel FROM execution_jobs WHERE {held_filter} AND last_heartbeat_at_ms=?2 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params_from_iter(bound.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
            })?;
            for row in rows {
                let (id, cancel) = row?;
                result.known_ids.push(id);
                if cancel {
                    result.cancel_ids.push(id);
                }
            }
        }
        tx.commit()?;
        Ok(result)
    }

    fn mark_complete(&mut self, id: i64, options: &MarkFinalOptions) -> Result<bool, StoreError> {
        let now_ms = self.now_ms();
        let tx = self.conn.transaction()?;
        let updated = mark_complete_tx(&tx, id, options, now_ms)?;
        tx.commit()?;
        Ok(updated)
    }

    fn mark_failed(
        &mut self,
        id: i64,
        failure_message: &str,
        options: &MarkFinalOptions,
    ) -> Result<bool, StoreError> {
        let now_ms = self.now_ms();
        let tx = self.conn.transaction()?;
        let updated = mark_failed_tx(&tx, id, failure_message, options, now_ms)?;
        tx.commit()?;
        Ok(updated)
    }

    fn mark_errored(
        &mut self,
        id: i64,
        failure_message: &str,
        options: &MarkFinalOptions,
    ) -> Result<bool, StoreError> {
        let now_ms = self.now_ms();
        let (max_num_retries, retry_delay_ms) = (self.config.max_num_retries, duration_ms(self.config.retry_delay));
        let tx = self.conn.transaction()?;
        let updated = mark_errored_tx(&tx, id, failure_message, options, now_ms, max_num_retries, retry_delay_ms)?;
        tx.commit()?;
        Ok(updated)
    }
}
