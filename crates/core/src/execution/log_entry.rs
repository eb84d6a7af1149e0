#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// One chunk of output an executor streamed back for a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub key: String,
    #[serde(default)]
    pub command: Vec<String>,
    pub start_time_ms: i64,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub out: String,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

/// Which log entry keys carry step results.
///
/// Executors changed the naming over time, so the accepted forms are data:
/// the legacy runner wrote a single entry (`step.src.0`, later
/// `step.src.batch-exec`), newer runners write one entry per step and phase
/// (`step.docker.step.3.post`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepLogKeyConvention {
    Exact(String),
    /// `step.<runtime>.step.<index>.<phase>`
    PerStepPhase(String),
}

impl StepLogKeyConvention {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(expected) => key == expected,
            Self::PerStepPhase(phase) => {
                let parts: Vec<&str> = key.split('.').collect();
                parts.len() == 5
                    && parts[0] == "step"
                    && !parts[1].is_empty()
                    && parts[2] == "step"
                    && parts[3].parse::<usize>().is_ok()
                    && parts[4] == phase
            }
        }
    }

    /// Parses `exact:<key>` or `step-phase:<phase>`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(key) = raw.strip_prefix("exact:") {
            let key = key.trim();
            return (!key.is_empty()).then(|| Self::Exact(key.to_string()));
        }
        if let Some(phase) = raw.strip_prefix("step-phase:") {
            let phase = phase.trim();
            return (!phase.is_empty() && !phase.contains('.'))
                .then(|| Self::PerStepPhase(phase.to_string()));
        }
        None
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::Exact("step.src.0".to_string()),
            Self::Exact("step.src.batch-exec".to_string()),
            Self::PerStepPhase("post".to_string()),
        ]
    }
}

pub fn matches_any_convention(key: &str, conventions: &[StepLogKeyConvention]) -> bool {
    conventions.iter().any(|convention| convention.matches(key))
}
