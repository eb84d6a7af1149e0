#![forbid(unsafe_code)]

use bx_core::changeset::ChangesetSpecIds;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoRow {
    pub id: i64,
    pub name: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchSpecRow {
    pub id: i64,
    pub user_id: i64,
    pub raw_spec: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct CreateBatchSpecRequest {
    pub user_id: i64,
    pub raw_spec: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkspaceRow {
    pub id: i64,
    pub batch_spec_id: i64,
    pub repo_id: i64,
    pub branch: String,
    pub commit: String,
    pub path: String,
    pub changeset_spec_ids: ChangesetSpecIds,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct CreateWorkspaceRequest {
    pub batch_spec_id: i64,
    pub repo_id: i64,
    pub branch: String,
    pub commit: String,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangesetSpecRow {
    pub id: i64,
    pub batch_spec_id: i64,
    pub repo_id: i64,
    pub user_id: i64,
    pub title: String,
    pub body: String,
    pub head_ref: String,
    pub base_ref: String,
    pub base_rev: String,
    pub commit_message: String,
    pub commit_author_name: Option<String>,
    pub commit_author_email: Option<String>,
    pub diff: String,
    pub published: Option<String>,
    pub created_at_ms: i64,
}
