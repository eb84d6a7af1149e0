#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE INDEX IF NOT EXISTS idx_workspaces_batch_spec ON workspaces(batch_spec_id);
        CREATE INDEX IF NOT EXISTS idx_changeset_specs_batch_spec ON changeset_specs(batch_spec_id);
        CREATE INDEX IF NOT EXISTS idx_execution_jobs_state ON execution_jobs(state, user_id, created_at_ms, id);
        CREATE INDEX IF NOT EXISTS idx_execution_jobs_workspace ON execution_jobs(workspace_id);
        CREATE INDEX IF NOT EXISTS idx_execution_cache_recency
          ON execution_cache_entries(COALESCE(last_used_at_ms, created_at_ms), id);
"#;
