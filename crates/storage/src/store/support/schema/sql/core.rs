#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
          name TEXT PRIMARY KEY,
          value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS repos (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL UNIQUE,
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS batch_specs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          user_id INTEGER NOT NULL,
          raw_spec TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL
        );

        -- changeset_spec_ids is a JSON object used as a set: {"12":{},"13":{}}
        CREATE TABLE IF NOT EXISTS workspaces (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          batch_spec_id INTEGER NOT NULL REFERENCES batch_specs(id) ON DELETE CASCADE,
          repo_id INTEGER NOT NULL REFERENCES repos(id),
          branch TEXT NOT NULL,
          commit_rev TEXT NOT NULL,
          path TEXT NOT NULL DEFAULT '',
          changeset_spec_ids TEXT NOT NULL DEFAULT '{}',
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS changeset_specs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          batch_spec_id INTEGER NOT NULL REFERENCES batch_specs(id) ON DELETE CASCADE,
          repo_id INTEGER NOT NULL REFERENCES repos(id),
          user_id INTEGER NOT NULL,
          title TEXT NOT NULL,
          body TEXT NOT NULL,
          head_ref TEXT NOT NULL,
          base_ref TEXT NOT NULL,
          base_rev TEXT NOT NULL,
          commit_message TEXT NOT NULL,
          commit_author_name TEXT,
          commit_author_email TEXT,
          diff TEXT NOT NULL,
          published TEXT,
          created_at_ms INTEGER NOT NULL
        );
"#;
