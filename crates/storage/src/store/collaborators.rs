#![forbid(unsafe_code)]

use super::StoreError;

/// Decides whether a user may still read a repository. Consulted again at
/// completion time because access can be revoked while a job runs.
pub trait RepoAuthorizer: Send + Sync {
    fn can_access(&self, user_id: i64, repo_id: i64) -> Result<bool, StoreError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAllRepos;

impl RepoAuthorizer for AllowAllRepos {
    fn can_access(&self, _user_id: i64, _repo_id: i64) -> Result<bool, StoreError> {
        Ok(true)
    }
}
