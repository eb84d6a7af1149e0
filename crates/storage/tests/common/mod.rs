#![allow(dead_code)]

use bx_core::changeset::{ChangesetSpecBuilder, TemplateChangesetSpecBuilder};
use bx_core::execution::ExecutionLogEntry;
use bx_storage::{
    AllowAllRepos, BatchSpecRow, CreateBatchSpecRequest, CreateWorkspaceRequest, DrainSignal, ExecutionConfig,
    ExecutionWorkerStore, ManualClock, Operations, RepoAuthorizer, RepoRow, SqliteStore, WorkspaceRow,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const START_MS: i64 = 1_700_000_000_000;

pub const BATCH_SPEC_YAML: &str = r#"
name: hello-world
description: Add Hello World to READMEs
changesetTemplate:
  title: Hello World for ${{ repository.name }}
  body: My first batch change!
  branch: hello-world
  commit:
    message: Append Hello World to all README.md files
"#;

/// base64 of "diff --git README.md README.md\n+step one\n"
pub const STEP_ONE_DIFF: &str = "ZGlmZiAtLWdpdCBSRUFETUUubWQgUkVBRE1FLm1kCitzdGVwIG9uZQo=";
/// base64 of "diff --git README.md README.md\n+step two\n"
pub const STEP_TWO_DIFF: &str = "ZGlmZiAtLWdpdCBSRUFETUUubWQgUkVBRE1FLm1kCitzdGVwIHR3bwo=";

pub struct Fixture {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            clock: Arc::new(ManualClock::new(START_MS)),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn open(&self) -> SqliteStore {
        self.open_with(ExecutionConfig::default())
    }

    pub fn open_with(&self, config: ExecutionConfig) -> SqliteStore {
        SqliteStore::open_with(self.path(), config, self.clock.clone()).expect("open store")
    }

    pub fn worker_store_with<A: RepoAuthorizer, B: ChangesetSpecBuilder>(
        &self,
        config: ExecutionConfig,
        authorizer: A,
        builder: B,
        signal: Arc<DrainSignal>,
    ) -> ExecutionWorkerStore<A, B> {
        ExecutionWorkerStore::new(self.open_with(config), authorizer, builder, Operations::new(), signal)
    }

    pub fn worker_store(&self) -> ExecutionWorkerStore<AllowAllRepos, TemplateChangesetSpecBuilder> {
        self.worker_store_with(
            ExecutionConfig::default(),
            AllowAllRepos,
            TemplateChangesetSpecBuilder,
            Arc::new(DrainSignal::new()),
        )
    }
}

pub struct Seeded {
    pub batch_spec: BatchSpecRow,
    pub repo: RepoRow,
    pub workspace: WorkspaceRow,
}

pub fn seed_workspace(store: &mut SqliteStore, user_id: i64, repo_name: &str) -> Seeded {
    let batch_spec = store
        .create_batch_spec(CreateBatchSpecRequest {
            user_id,
            raw_spec: BATCH_SPEC_YAML.to_string(),
        })
        .expect("create batch spec");
    let repo = store.create_repo(repo_name).expect("create repo");
    let workspace = add_workspace(store, &batch_spec, &repo);
    Seeded {
        batch_spec,
        repo,
        workspace,
    }
}

pub fn add_workspace(store: &mut SqliteStore, batch_spec: &BatchSpecRow, repo: &RepoRow) -> WorkspaceRow {
    store
        .create_workspace(CreateWorkspaceRequest {
            batch_spec_id: batch_spec.id,
            repo_id: repo.id,
            branch: "refs/heads/main".to_string(),
            commit: "d34db33f".to_string(),
            path: String::new(),
        })
        .expect("create workspace")
}

pub fn cache_line(key: &str, step_index: usize, diff: &str) -> String {
    format!(
        r#"stdout: {{"operation":"CACHE_AFTER_STEP_RESULT","timestamp":"2021-11-04T12:43:19.551Z","status":"SUCCESS","metadata":{{"key":"{key}","value":{{"stepIndex":{step_index},"diff":"{diff}","outputs":{{}},"previousStepResult":{{"Files":null,"Stdout":null,"Stderr":null}}}}}}}}"#
    )
}

pub fn log_entry(key: &str, lines: &[String]) -> ExecutionLogEntry {
    ExecutionLogEntry {
        key: key.to_string(),
        command: vec!["src".to_string(), "batch".to_string(), "exec".to_string()],
        start_time_ms: START_MS,
        exit_code: Some(0),
        out: lines.join("\n"),
        duration_ms: Some(1_000),
    }
}

/// A log entry carrying results for steps 0 and 1.
pub fn two_step_log() -> ExecutionLogEntry {
    log_entry(
        "step.src.batch-exec",
        &[
            "stderr: HH:MM:SS.000 preparing workspace".to_string(),
            cache_line("JkC7Q0OOCZZ3Acv79QfwSA-step-0", 0, STEP_ONE_DIFF),
            cache_line("0ydsSXJ77syIPdwNrsGlzQ-step-1", 1, STEP_TWO_DIFF),
        ],
    )
}
