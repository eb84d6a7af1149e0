#![forbid(unsafe_code)]

use super::StoreError;
use bx_core::execution::StepLogKeyConvention;
use std::time::Duration;

pub const DEFAULT_CACHE_SCHEMA_VERSION: i64 = 1;

/// Tunables for the execution queue, result cache and cancellation.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionConfig {
    /// Only cache entries written with this version are visible to lookups.
    pub cache_schema_version: i64,
    pub cache_max_bytes: i64,
    pub stalled_max_age: Duration,
    pub max_num_resets: i64,
    pub max_num_retries: i64,
    pub retry_delay: Duration,
    pub cancel_drain_deadline: Duration,
    pub cancel_recheck_interval: Duration,
    pub step_log_conventions: Vec<StepLogKeyConvention>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            cache_schema_version: DEFAULT_CACHE_SCHEMA_VERSION,
            cache_max_bytes: 1 << 30,
            stalled_max_age: Duration::from_secs(5),
            max_num_resets: 5,
            max_num_retries: 3,
            retry_delay: Duration::from_secs(10),
            cancel_drain_deadline: Duration::from_secs(120),
            cancel_recheck_interval: Duration::from_millis(100),
            step_log_conventions: StepLogKeyConvention::defaults(),
        }
    }
}

impl ExecutionConfig {
    /// Defaults overridden by `BX_*` environment variables.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let mut config = Self::default();

        if let Some(value) = int_var(&lookup, "BX_CACHE_SCHEMA_VERSION")? {
            config.cache_schema_version = value;
        }
        if let Some(value) = int_var(&lookup, "BX_CACHE_MAX_BYTES")? {
            config.cache_max_bytes = value;
        }
        if let Some(value) = millis_var(&lookup, "BX_STALLED_MAX_AGE_MS")? {
            config.stalled_max_age = value;
        }
        if let Some(value) = int_var(&lookup, "BX_MAX_NUM_RESETS")? {
            config.max_num_resets = value;
        }
        if let Some(value) = int_var(&lookup, "BX_MAX_NUM_RETRIES")? {
            config.max_num_retries = value;
        }
        if let Some(value) = millis_var(&lookup, "BX_RETRY_DELAY_MS")? {
            config.retry_delay = value;
        }
        if let Some(value) = millis_var(&lookup, "BX_CANCEL_DRAIN_DEADLINE_MS")? {
            config.cancel_drain_deadline = value;
        }
        if let Some(value) = millis_var(&lookup, "BX_CANCEL_RECHECK_MS")? {
            config.cancel_recheck_interval = value;
        }
        if let Some(raw) = lookup("BX_STEP_LOG_CONVENTIONS") {
            config.step_log_conventions = parse_conventions(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.cache_max_bytes < 0 {
            return Err(StoreError::Config("cache max bytes must not be negative".to_string()));
        }
        if self.max_num_resets < 0 || self.max_num_retries < 0 {
            return Err(StoreError::Config("retry and reset limits must not be negative".to_string()));
        }
        if self.cancel_recheck_interval.is_zero() {
            return Err(StoreError::Config("cancel recheck interval must be positive".to_string()));
        }
        if self.step_log_conventions.is_empty() {
            return Err(StoreError::Config("at least one step log convention is required".to_string()));
        }
        Ok(())
    }
}

fn int_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<i64>, StoreError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<i64>()
        .map(Some)
        .map_err(|err| StoreError::Config(format!("{name}={raw:?}: {err}")))
}

fn millis_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<Duration>, StoreError> {
    match int_var(lookup, name)? {
        None => Ok(None),
        Some(ms) => u64::try_from(ms)
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| StoreError::Config(format!("{name} must not be negative"))),
    }
}

fn parse_conventions(raw: &str) -> Result<Vec<StepLogKeyConvention>, StoreError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            StepLogKeyConvention::parse(part)
                .ok_or_else(|| StoreError::Config(format!("invalid step log convention {part:?}")))
        })
        .collect()
}
