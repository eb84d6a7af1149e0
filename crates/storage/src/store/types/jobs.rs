#![forbid(unsafe_code)]

use bx_core::model::JobState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionJobRow {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: i64,
    pub state: JobState,
    pub cancel: bool,
    pub failure_message: Option<String>,
    pub num_resets: i64,
    pub num_failures: i64,
    pub process_after_ms: Option<i64>,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
    pub last_heartbeat_at_ms: Option<i64>,
    pub worker_hostname: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// A dequeue candidate with its round-robin position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedJob {
    pub id: i64,
    pub user_id: i64,
    pub place_in_user_queue: i64,
    pub place_in_global_queue: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkFinalOptions {
    /// Terminal transitions only apply to jobs held by this worker.
    pub worker_hostname: String,
}

impl MarkFinalOptions {
    pub fn for_worker(worker_hostname: impl Into<String>) -> Self {
        Self {
            worker_hostname: worker_hostname.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatResult {
    /// Jobs this worker still holds.
    pub known_ids: Vec<i64>,
    /// Held jobs an operator asked to cancel.
    pub cancel_ids: Vec<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResetStalledResult {
    pub reset_ids: Vec<i64>,
    pub failed_ids: Vec<i64>,
    pub canceled_ids: Vec<i64>,
}

impl ResetStalledResult {
    pub fn is_empty(&self) -> bool {
        self.reset_ids.is_empty() && self.failed_ids.is_empty() && self.canceled_ids.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelFilter {
    Ids(Vec<i64>),
    BatchSpec(i64),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CancelResult {
    /// Queued or errored jobs moved straight to canceled.
    pub canceled_ids: Vec<i64>,
    /// Processing jobs flagged for the executor to stop.
    pub flagged_ids: Vec<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    TimedOut { still_processing: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelReport {
    pub result: CancelResult,
    pub drain: DrainOutcome,
}
