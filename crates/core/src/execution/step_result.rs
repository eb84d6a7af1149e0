#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::borrow::Cow;

/// The state of a workspace after one step ran, as emitted by the executor and
/// stored verbatim as a cache value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AfterStepResult {
    pub step_index: usize,
    #[serde(default, with = "base64_bytes")]
    pub diff: Vec<u8>,
    #[serde(default)]
    pub outputs: JsonMap<String, JsonValue>,
    #[serde(default)]
    pub previous_step_result: Option<JsonValue>,
}

impl AfterStepResult {
    pub fn diff_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.diff)
    }

    pub fn has_diff(&self) -> bool {
        !self.diff.is_empty()
    }

    pub fn to_cache_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_cache_value(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

/// A step result extracted from the logs together with the content key it
/// should be cached under.
#[derive(Clone, Debug, PartialEq)]
pub struct StepResult {
    pub content_key: String,
    pub after_step: AfterStepResult,
    pub emitted_at_ms: Option<i64>,
}

impl StepResult {
    pub fn step_index(&self) -> usize {
        self.after_step.step_index
    }
}

/// Picks the result of the last step that ran; ties keep the later log line.
pub fn latest_step_result(results: &[StepResult]) -> Option<&StepResult> {
    results
        .iter()
        .enumerate()
        .max_by_key(|(position, result)| (result.step_index(), *position))
        .map(|(_, result)| result)
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(serde::de::Error::custom),
        }
    }
}
