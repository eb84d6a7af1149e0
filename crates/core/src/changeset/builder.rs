#![forbid(unsafe_code)]

use super::template::{BatchSpecDocument, CommitAuthor, RepoDescriptor, TemplateContext};
use crate::execution::AfterStepResult;

#[derive(Debug, thiserror::Error)]
pub enum ChangesetBuildError {
    #[error("batch spec {name:?} has no changesetTemplate")]
    MissingTemplate { name: String },
    #[error("step {step_index} produced a diff that is not valid UTF-8")]
    InvalidDiff { step_index: usize },
    #[error("{0}")]
    Rejected(String),
}

/// A changeset spec derived from a workspace's final step, before it is
/// persisted and assigned an id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawChangesetSpec {
    pub repo_id: i64,
    pub title: String,
    pub body: String,
    pub head_ref: String,
    pub base_ref: String,
    pub base_rev: String,
    pub commit_message: String,
    pub commit_author: Option<CommitAuthor>,
    pub diff: String,
    pub published: Option<String>,
}

pub struct ChangesetBuildInput<'a> {
    pub batch_spec: &'a BatchSpecDocument,
    pub repo: &'a RepoDescriptor,
    pub latest: &'a AfterStepResult,
    pub workspace_path: &'a str,
}

/// Turns the final state of a workspace into changeset specs. Must be pure:
/// it runs inside the completion transaction.
pub trait ChangesetSpecBuilder: Send + Sync {
    fn build(&self, input: ChangesetBuildInput<'_>) -> Result<Vec<RawChangesetSpec>, ChangesetBuildError>;
}

/// Builds at most one changeset spec per workspace from the batch spec's
/// `changesetTemplate`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateChangesetSpecBuilder;

impl ChangesetSpecBuilder for TemplateChangesetSpecBuilder {
    fn build(&self, input: ChangesetBuildInput<'_>) -> Result<Vec<RawChangesetSpec>, ChangesetBuildError> {
        // Nothing changed in the repository: nothing to publish.
        if !input.latest.has_diff() {
            return Ok(Vec::new());
        }

        let Some(template) = input.batch_spec.changeset_template.as_ref() else {
            return Err(ChangesetBuildError::MissingTemplate {
                name: input.batch_spec.name.clone(),
            });
        };
        let diff = String::from_utf8(input.latest.diff.clone()).map_err(|_| {
            ChangesetBuildError::InvalidDiff {
                step_index: input.latest.step_index,
            }
        })?;

        let context = TemplateContext {
            batch_change_name: &input.batch_spec.name,
            repository_name: &input.repo.name,
            workspace_path: input.workspace_path,
            outputs: &input.latest.outputs,
        };

        let branch = context.render(&template.branch);
        let branch = branch.trim().trim_start_matches("refs/heads/");
        if branch.is_empty() {
            return Err(ChangesetBuildError::Rejected(
                "changesetTemplate.branch rendered empty".to_string(),
            ));
        }

        Ok(vec![RawChangesetSpec {
            repo_id: input.repo.id,
            title: context.render(&template.title),
            body: context.render(&template.body),
            head_ref: format!("refs/heads/{branch}"),
            base_ref: input.repo.base_ref.clone(),
            base_rev: input.repo.base_rev.clone(),
            commit_message: context.render(&template.commit.message),
            commit_author: template.commit.author.clone(),
            diff,
            published: template.published.as_ref().map(|p| p.as_column()),
        }])
    }
}
