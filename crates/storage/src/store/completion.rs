#![forbid(unsafe_code)]

use super::cache::cache_put_tx;
use super::entities::{
    batch_spec_tx, insert_changeset_spec_tx, repo_tx, set_workspace_changeset_spec_ids_tx, workspace_tx,
};
use super::queue::{execution_job_tx, execution_logs_tx, mark_complete_tx, mark_errored_tx, mark_failed_tx};
use super::{
    BatchSpecRow, CancelFilter, CancelReport, DrainOutcome, DrainSignal, ExecutionJobRow, HeartbeatResult,
    MarkFinalOptions, Operations, RepoAuthorizer, RepoRow, SqliteStore, StoreError, WorkerStore, WorkspaceRow,
    duration_ms,
};
use bx_core::changeset::{
    BatchSpecDocument, ChangesetBuildInput, ChangesetSpecBuilder, ChangesetSpecIds, RepoDescriptor,
};
use bx_core::execution::{ExecutionLogEntry, latest_step_result, parse_step_results};
use rusqlite::{Connection, TransactionBehavior};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const OP_MARK_COMPLETE: &str = "mark_complete";
const OP_MARK_FAILED: &str = "mark_failed";
const OP_MARK_ERRORED: &str = "mark_errored";
const OP_CANCEL: &str = "cancel_execution_jobs";

#[derive(Clone, Copy, Debug)]
enum Terminal<'a> {
    Complete,
    Failed(&'a str),
    Errored(&'a str),
}

struct CompletionContext {
    job: ExecutionJobRow,
    workspace: WorkspaceRow,
    batch_spec: BatchSpecRow,
    repo: RepoRow,
}

fn load_context_tx(conn: &Connection, id: i64) -> Result<CompletionContext, StoreError> {
    let job = execution_job_tx(conn, id)?.ok_or(StoreError::NotFound {
        entity: "execution job",
        id,
    })?;
    let workspace = workspace_tx(conn, job.workspace_id)?.ok_or(StoreError::NotFound {
        entity: "workspace",
        id: job.workspace_id,
    })?;
    let batch_spec = batch_spec_tx(conn, workspace.batch_spec_id)?.ok_or(StoreError::NotFound {
        entity: "batch spec",
        id: workspace.batch_spec_id,
    })?;
    let repo = repo_tx(conn, workspace.repo_id)?.ok_or(StoreError::NotFound {
        entity: "repo",
        id: workspace.repo_id,
    })?;
    Ok(CompletionContext {
        job,
        workspace,
        batch_spec,
        repo,
    })
}

/// Wraps the base queue so every terminal transition also records the job's
/// step results in the cache and, on success, derives changeset specs. All of
/// it commits in one transaction together with the state change; if anything
/// fails the job is marked failed instead.
pub struct ExecutionWorkerStore<A: RepoAuthorizer, B: ChangesetSpecBuilder> {
    store: SqliteStore,
    authorizer: A,
    builder: B,
    operations: Operations,
    signal: Arc<DrainSignal>,
}

impl<A: RepoAuthorizer, B: ChangesetSpecBuilder> ExecutionWorkerStore<A, B> {
    pub fn new(
        store: SqliteStore,
        authorizer: A,
        builder: B,
        operations: Operations,
        signal: Arc<DrainSignal>,
    ) -> Self {
        Self {
            store,
            authorizer,
            builder,
            operations,
            signal,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SqliteStore {
        &mut self.store
    }

    pub fn operations(&self) -> &Operations {
        &self.operations
    }

    pub fn signal(&self) -> &Arc<DrainSignal> {
        &self.signal
    }

    /// Cancels matching jobs, then blocks until none of them is processing or
    /// the drain deadline passes. Running out of time is reported, not failed.
    pub fn cancel_execution_jobs(&mut self, filter: &CancelFilter) -> Result<CancelReport, StoreError> {
        let operations = self.operations.clone();
        operations.observe(OP_CANCEL, || {
            let result = self.store.cancel_execution_jobs(filter)?;
            if !result.canceled_ids.is_empty() {
                self.signal.notify();
            }
            let drain = self.wait_for_drain(filter)?;
            Ok(CancelReport { result, drain })
        })
    }

    pub fn wait_for_drain(&self, filter: &CancelFilter) -> Result<DrainOutcome, StoreError> {
        let config = self.store.config();
        let deadline = Instant::now() + config.cancel_drain_deadline;
        loop {
            let seen = self.signal.generation();
            let still_processing = self.store.count_processing(filter)?;
            if still_processing == 0 {
                return Ok(DrainOutcome::Drained);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    still_processing,
                    deadline_ms = duration_ms(config.cancel_drain_deadline),
                    "gave up waiting for canceled jobs to stop"
                );
                return Ok(DrainOutcome::TimedOut { still_processing });
            }
            let wait = (deadline - now).min(config.cancel_recheck_interval);
            self.signal.wait_for_change(seen, wait);
        }
    }

    fn finalize(&mut self, op: &'static str, id: i64, outcome: Terminal<'_>, options: &MarkFinalOptions) -> Result<bool, StoreError> {
        let operations = self.operations.clone();
        operations.observe(op, || {
            match self.finalize_tx(id, outcome, options) {
                Ok(true) => {
                    info!(job_id = id, op, "finalized execution job");
                    self.signal.notify();
                    Ok(true)
                }
                Ok(false) => {
                    debug!(job_id = id, op, worker_hostname = %options.worker_hostname, "job not held by worker");
                    Ok(false)
                }
                // Loaded before any write, so there is nothing to fall back from.
                Err(err @ StoreError::NotFound { .. }) => Err(err),
                Err(err) => {
                    let message = format!("failed to finalize execution: {err}");
                    warn!(job_id = id, op, error = %err, "finalizing execution failed, marking job failed");
                    match self.store.mark_failed(id, &message, options) {
                        Ok(true) => self.signal.notify(),
                        Ok(false) => warn!(job_id = id, "job was not processing, fallback left it untouched"),
                        Err(fallback_err) => {
                            error!(job_id = id, error = %fallback_err, "marking job failed after finalize error failed")
                        }
                    }
                    Err(err)
                }
            }
        })
    }

    fn finalize_tx(&mut self, id: i64, outcome: Terminal<'_>, options: &MarkFinalOptions) -> Result<bool, StoreError> {
        let now_ms = self.store.now_ms();
        let config = &self.store.config;
        let tx = self.store.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let context = load_context_tx(&tx, id)?;
        let user_id = context.batch_spec.user_id;

        let entries = execution_logs_tx(&tx, context.job.id)?;
        let results = parse_step_results(&entries, &config.step_log_conventions)?;
        for result in &results {
            let value = result.after_step.to_cache_value()?;
            cache_put_tx(&tx, user_id, &result.content_key, &value, config.cache_schema_version, now_ms)?;
        }
        debug!(job_id = context.job.id, cached = results.len(), "cached step results");

        let updated = match outcome {
            Terminal::Complete => {
                let latest = latest_step_result(&results).ok_or(StoreError::NoStepResults)?;
                if !self.authorizer.can_access(user_id, context.repo.id)? {
                    return Err(StoreError::AuthorizationLost {
                        user_id,
                        repo_id: context.repo.id,
                    });
                }

                let document = BatchSpecDocument::from_yaml(&context.batch_spec.raw_spec)?;
                let repo = RepoDescriptor {
                    id: context.repo.id,
                    name: context.repo.name.clone(),
                    base_ref: context.workspace.branch.clone(),
                    base_rev: context.workspace.commit.clone(),
                };
                let specs = self.builder.build(ChangesetBuildInput {
                    batch_spec: &document,
                    repo: &repo,
                    latest: &latest.after_step,
                    workspace_path: &context.workspace.path,
                })?;

                let mut ids = ChangesetSpecIds::new();
                for spec in &specs {
                    ids.insert(insert_changeset_spec_tx(&tx, context.batch_spec.id, user_id, spec, now_ms)?);
                }
                set_workspace_changeset_spec_ids_tx(&tx, context.workspace.id, &ids, now_ms)?;

                mark_complete_tx(&tx, context.job.id, options, now_ms)?
            }
            Terminal::Failed(message) => mark_failed_tx(&tx, context.job.id, message, options, now_ms)?,
            Terminal::Errored(message) => mark_errored_tx(
                &tx,
                context.job.id,
                message,
                options,
                now_ms,
                config.max_num_retries,
                duration_ms(config.retry_delay),
            )?,
        };

        if !updated {
            // Dropping the transaction rolls back the cache and changeset writes.
            return Ok(false);
        }
        tx.commit()?;
        Ok(true)
    }
}

impl<A: RepoAuthorizer, B: ChangesetSpecBuilder> WorkerStore for ExecutionWorkerStore<A, B> {
    fn dequeue(&mut self, worker_hostname: &str) -> Result<Option<ExecutionJobRow>, StoreError> {
        self.store.dequeue(worker_hostname)
    }

    fn add_execution_log_entry(
        &mut self,
        job_id: i64,
        entry: &ExecutionLogEntry,
        options: &MarkFinalOptions,
    ) -> Result<i64, StoreError> {
        self.store.add_execution_log_entry(job_id, entry, options)
    }

    fn update_execution_log_entry(
        &mut self,
        job_id: i64,
        seq: i64,
        entry: &ExecutionLogEntry,
        options: &MarkFinalOptions,
    ) -> Result<bool, StoreError> {
        self.store.update_execution_log_entry(job_id, seq, entry, options)
    }

    fn heartbeat(&mut self, worker_hostname: &str, ids: &[i64]) -> Result<HeartbeatResult, StoreError> {
        self.store.heartbeat(worker_hostname, ids)
    }

    fn mark_complete(&mut self, id: i64, options: &MarkFinalOptions) -> Result<bool, StoreError> {
        self.finalize(OP_MARK_COMPLETE, id, Terminal::Complete, options)
    }

    fn mark_failed(
        &mut self,
        id: i64,
        failure_message: &str,
        options: &MarkFinalOptions,
    ) -> Result<bool, StoreError> {
        self.finalize(OP_MARK_FAILED, id, Terminal::Failed(failure_message), options)
    }

    fn mark_errored(
        &mut self,
        id: i64,
        failure_message: &str,
        options: &MarkFinalOptions,
    ) -> Result<bool, StoreError> {
        self.finalize(OP_MARK_ERRORED, id, Terminal::Errored(failure_message), options)
    }
}
