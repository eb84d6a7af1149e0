#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS execution_jobs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
          user_id INTEGER NOT NULL,
          state TEXT NOT NULL DEFAULT 'queued',
          cancel INTEGER NOT NULL DEFAULT 0,
          failure_message TEXT,
          num_resets INTEGER NOT NULL DEFAULT 0,
          num_failures INTEGER NOT NULL DEFAULT 0,
          process_after_ms INTEGER,
          started_at_ms INTEGER,
          finished_at_ms INTEGER,
          last_heartbeat_at_ms INTEGER,
          worker_hostname TEXT NOT NULL DEFAULT '',
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS execution_log_entries (
          job_id INTEGER NOT NULL REFERENCES execution_jobs(id) ON DELETE CASCADE,
          seq INTEGER NOT NULL,
          key TEXT NOT NULL,
          command_json TEXT NOT NULL,
          start_time_ms INTEGER NOT NULL,
          exit_code INTEGER,
          out TEXT NOT NULL,
          duration_ms INTEGER,
          PRIMARY KEY (job_id, seq)
        );

        -- One row per tenant, bumped on every dequeue; drives round-robin order.
        CREATE TABLE IF NOT EXISTS last_dequeues (
          user_id INTEGER PRIMARY KEY,
          latest_dequeue_seq INTEGER NOT NULL,
          latest_dequeue_at_ms INTEGER NOT NULL
        );
"#;
