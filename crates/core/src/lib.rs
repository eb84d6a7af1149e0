#![forbid(unsafe_code)]

pub mod changeset;
pub mod execution;

pub mod model {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum JobState {
        Queued,
        Processing,
        Errored,
        Completed,
        Failed,
        Canceled,
    }

    impl JobState {
        pub fn as_str(self) -> &'static str {
            match self {
                JobState::Queued => "queued",
                JobState::Processing => "processing",
                JobState::Errored => "errored",
                JobState::Completed => "completed",
                JobState::Failed => "failed",
                JobState::Canceled => "canceled",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value.trim() {
                "queued" => Some(JobState::Queued),
                "processing" => Some(JobState::Processing),
                "errored" => Some(JobState::Errored),
                "completed" => Some(JobState::Completed),
                "failed" => Some(JobState::Failed),
                "canceled" => Some(JobState::Canceled),
                _ => None,
            }
        }

        /// Terminal states are never picked up again by the queue.
        pub fn is_terminal(self) -> bool {
            matches!(
                self,
                JobState::Completed | JobState::Failed | JobState::Canceled
            )
        }
    }

    impl std::fmt::Display for JobState {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Failure message written on jobs canceled before an executor picked them up.
    pub const CANCELED_FAILURE_MESSAGE: &str = "Canceled";
}
