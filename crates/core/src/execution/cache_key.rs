#![forbid(unsafe_code)]

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use sha2::{Digest, Sha256};

const KEY_DIGEST_BYTES: usize = 16;

/// Content address of a step: a digest over everything that influences the
/// step's outcome, suffixed with the step index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StepCacheKey(String);

impl StepCacheKey {
    pub fn compute<T: Serialize + ?Sized>(inputs: &T, step_index: usize) -> Result<Self, serde_json::Error> {
        let canonical = serde_json::to_vec(inputs)?;
        let digest = Sha256::digest(&canonical);
        let prefix = URL_SAFE_NO_PAD.encode(&digest[..KEY_DIGEST_BYTES]);
        Ok(Self(format!("{prefix}-step-{step_index}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Step index encoded in a key of the form `<digest>-step-<n>`.
    pub fn step_index_of(key: &str) -> Option<usize> {
        let (_, index) = key.rsplit_once("-step-")?;
        index.parse().ok()
    }
}

impl std::fmt::Display for StepCacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
