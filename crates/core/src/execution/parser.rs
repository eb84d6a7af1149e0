#![forbid(unsafe_code)]

use super::{AfterStepResult, ExecutionLogEntry, StepLogKeyConvention, StepResult, matches_any_convention};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const CACHE_AFTER_STEP_RESULT: &str = "CACHE_AFTER_STEP_RESULT";

const STDOUT_PREFIX: &str = "stdout: ";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LogParseError {
    #[error("malformed cache event in log entry {entry_key:?}, line {line}: {reason}")]
    MalformedCacheEvent {
        entry_key: String,
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct LogEvent {
    operation: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: JsonValue,
}

#[derive(Debug, Deserialize)]
struct CacheAfterStepMetadata {
    key: String,
    value: AfterStepResult,
}

/// Extracts every cacheable step result from the given log entries, in log
/// order.
///
/// Lines that are not `stdout: {json}` or that carry another operation are
/// skipped: executors interleave several event kinds in the same stream.
pub fn parse_step_results(
    entries: &[ExecutionLogEntry],
    conventions: &[StepLogKeyConvention],
) -> Result<Vec<StepResult>, LogParseError> {
    let mut out = Vec::new();
    for entry in entries {
        if !matches_any_convention(&entry.key, conventions) {
            continue;
        }
        for (index, line) in entry.out.lines().enumerate() {
            if let Some(result) = parse_line(&entry.key, index + 1, line)? {
                out.push(result);
            }
        }
    }
    Ok(out)
}

fn parse_line(entry_key: &str, line_no: usize, line: &str) -> Result<Option<StepResult>, LogParseError> {
    let Some(payload) = line.trim_end_matches('\r').strip_prefix(STDOUT_PREFIX) else {
        return Ok(None);
    };
    let payload = payload.trim();
    if !payload.starts_with('{') {
        return Ok(None);
    }

    let malformed = |reason: String| LogParseError::MalformedCacheEvent {
        entry_key: entry_key.to_string(),
        line: line_no,
        reason,
    };

    let event: LogEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        // A truncated or corrupt line that still names the operation was meant
        // to be a cache event.
        Err(err) if payload.contains(CACHE_AFTER_STEP_RESULT) => return Err(malformed(err.to_string())),
        Err(_) => return Ok(None),
    };
    if event.operation != CACHE_AFTER_STEP_RESULT {
        return Ok(None);
    }
    if event
        .status
        .as_deref()
        .is_some_and(|status| status != "SUCCESS")
    {
        return Ok(None);
    }

    let metadata: CacheAfterStepMetadata =
        serde_json::from_value(event.metadata).map_err(|err| malformed(err.to_string()))?;
    let content_key = metadata.key.trim();
    if content_key.is_empty() {
        return Err(malformed("cache key must not be empty".to_string()));
    }

    Ok(Some(StepResult {
        content_key: content_key.to_string(),
        after_step: metadata.value,
        emitted_at_ms: event.timestamp.as_deref().and_then(parse_timestamp_ms),
    }))
}

fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let parsed = OffsetDateTime::parse(raw, &Rfc3339).ok()?;
    i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000).ok()
}
