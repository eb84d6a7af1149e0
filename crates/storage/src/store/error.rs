#![forbid(unsafe_code)]

use bx_core::changeset::ChangesetBuildError;
use bx_core::execution::LogParseError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("batch spec: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("config: {0}")]
    Config(String),
    #[error(transparent)]
    MalformedCacheEvent(#[from] LogParseError),
    #[error("no step results found in execution logs")]
    NoStepResults,
    #[error("user {user_id} lost access to repository {repo_id}")]
    AuthorizationLost { user_id: i64, repo_id: i64 },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("failed to build changeset specs: {0}")]
    ArtifactConstruction(#[from] ChangesetBuildError),
}
