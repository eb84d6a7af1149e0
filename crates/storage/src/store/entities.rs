#![forbid(unsafe_code)]

use super::{
    BatchSpecRow, ChangesetSpecRow, CreateBatchSpecRequest, CreateWorkspaceRequest, RepoRow,
    SqliteStore, StoreError, WorkspaceRow,
};
use bx_core::changeset::{ChangesetSpecIds, RawChangesetSpec};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction, params};

const WORKSPACE_COLUMNS: &str = "id, batch_spec_id, repo_id, branch, commit_rev, path, changeset_spec_ids, created_at_ms, updated_at_ms";

const CHANGESET_SPEC_COLUMNS: &str = "id, batch_spec_id, repo_id, user_id, title, body, head_ref, base_ref, base_rev, commit_message, commit_author_name, commit_author_email, diff, published, created_at_ms";

fn read_workspace_row(row: &rusqlite::Row<'_>) -> Result<WorkspaceRow, rusqlite::Error> {
    let raw_ids: String = row.get(6)?;
    let changeset_spec_ids = ChangesetSpecIds::from_json(&raw_ids)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(err)))?;
    Ok(WorkspaceRow {
        id: row.get(0)?,
        batch_spec_id: row.get(1)?,
        repo_id: row.get(2)?,
        branch: row.get(3)?,
        commit: row.get(4)?,
        path: row.get(5)?,
        changeset_spec_ids,
        created_at_ms: row.get(7)?,
        updated_at_ms: row.get(8)?,
    })
}

fn read_changeset_spec_row(row: &rusqlite::Row<'_>) -> Result<ChangesetSpecRow, rusqlite::Error> {
    Ok(ChangesetSpecRow {
        id: row.get(0)?,
        batch_spec_id: row.get(1)?,
        repo_id: row.get(2)?,
        user_id: row.get(3)?,
        title: row.get(4)?,
        body: row.get(5)?,
        head_ref: row.get(6)?,
        base_ref: row.get(7)?,
        base_rev: row.get(8)?,
        commit_message: row.get(9)?,
        commit_author_name: row.get(10)?,
        commit_author_email: row.get(11)?,
        diff: row.get(12)?,
        published: row.get(13)?,
        created_at_ms: row.get(14)?,
    })
}

pub(in crate::store) fn repo_tx(conn: &Connection, id: i64) -> Result<Option<RepoRow>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, created_at_ms FROM repos WHERE id=?1",
            params![id],
            |row| {
                Ok(RepoRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at_ms: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub(in crate::store) fn batch_spec_tx(conn: &Connection, id: i64) -> Result<Option<BatchSpecRow>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, user_id, raw_spec, created_at_ms FROM batch_specs WHERE id=?1",
            params![id],
            |row| {
                Ok(BatchSpecRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    raw_spec: row.get(2)?,
                    created_at_ms: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub(in crate::store) fn workspace_tx(conn: &Connection, id: i64) -> Result<Option<WorkspaceRow>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id=?1"),
            params![id],
            read_workspace_row,
        )
        .optional()?)
}

pub(in crate::store) fn insert_changeset_spec_tx(
    tx: &Transaction<'_>,
    batch_spec_id: i64,
    user_id: i64,
    spec: &RawChangesetSpec,
    now_ms: i64,
) -> Result<i64, StoreError> {
    let (author_name, author_email) = match &spec.commit_author {
        Some(author) => (Some(author.name.as_str()), Some(author.email.as_str())),
        None => (None, None),
    };
    tx.execute(
        r#"
        INSERT INTO changeset_specs(
          batch_spec_id, repo_id, user_id, title, body, head_ref, base_ref, base_rev,
          commit_message, commit_author_name, commit_author_email, diff, published, created_at_ms
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        params![
            batch_spec_id,
            spec.repo_id,
            user_id,
            spec.title,
            spec.body,
            spec.head_ref,
            spec.base_ref,
            spec.base_rev,
            spec.commit_message,
            author_name,
            author_email,
            spec.diff,
            spec.published,
            now_ms,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Replaces the workspace's changeset spec set wholesale.
pub(in crate::store) fn set_workspace_changeset_spec_ids_tx(
    tx: &Transaction<'_>,
    workspace_id: i64,
    ids: &ChangesetSpecIds,
    now_ms: i64,
) -> Result<(), StoreError> {
    let changed = tx.execute(
        "UPDATE workspaces SET changeset_spec_ids=?2, updated_at_ms=?3 WHERE id=?1",
        params![workspace_id, serde_json::to_string(ids)?, now_ms],
    )?;
    if changed != 1 {
        return Err(StoreError::NotFound {
            entity: "workspace",
            id: workspace_id,
        });
    }
    Ok(())
}

impl SqliteStore {
    pub fn create_repo(&mut self, name: &str) -> Result<RepoRow, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("repo name must not be empty"));
        }
        let now_ms = self.now_ms();
        self.conn.execute(
            "INSERT INTO repos(name, created_at_ms) VALUES (?1, ?2)",
            params![name, now_ms],
        )?;
        Ok(RepoRow {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            created_at_ms: now_ms,
        })
    }

    pub fn repo(&self, id: i64) -> Result<Option<RepoRow>, StoreError> {
        repo_tx(&self.conn, id)
    }

    pub fn create_batch_spec(&mut self, request: CreateBatchSpecRequest) -> Result<BatchSpecRow, StoreError> {
        let now_ms = self.now_ms();
        self.conn.execute(
            "INSERT INTO batch_specs(user_id, raw_spec, created_at_ms) VALUES (?1, ?2, ?3)",
            params![request.user_id, request.raw_spec, now_ms],
        )?;
        Ok(BatchSpecRow {
            id: self.conn.last_insert_rowid(),
            user_id: request.user_id,
            raw_spec: request.raw_spec,
            created_at_ms: now_ms,
        })
    }

    pub fn batch_spec(&self, id: i64) -> Result<Option<BatchSpecRow>, StoreError> {
        batch_spec_tx(&self.conn, id)
    }

    pub fn create_workspace(&mut self, request: CreateWorkspaceRequest) -> Result<WorkspaceRow, StoreError> {
        let now_ms = self.now_ms();
        let tx = self.conn.transaction()?;
        if batch_spec_tx(&tx, request.batch_spec_id)?.is_none() {
            return Err(StoreError::NotFound {
                entity: "batch spec",
                id: request.batch_spec_id,
            });
        }
        if repo_tx(&tx, request.repo_id)?.is_none() {
            return Err(StoreError::NotFound {
                entity: "repo",
                id: request.repo_id,
            });
        }
        tx.execute(
            r#"
            INSERT INTO workspaces(batch_spec_id, repo_id, branch, commit_rev, path, changeset_spec_ids, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6, ?6)
            "#,
            params![
                request.batch_spec_id,
                request.repo_id,
                request.branch,
                request.commit,
                request.path,
                now_ms
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(WorkspaceRow {
            id,
            batch_spec_id: request.batch_spec_id,
            repo_id: request.repo_id,
            branch: request.branch,
            commit: request.commit,
            path: request.path,
            changeset_spec_ids: ChangesetSpecIds::new(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }

    pub fn workspace(&self, id: i64) -> Result<Option<WorkspaceRow>, StoreError> {
        workspace_tx(&self.conn, id)
    }

    pub fn list_changeset_specs(&self, batch_spec_id: i64) -> Result<Vec<ChangesetSpecRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHANGESET_SPEC_COLUMNS} FROM changeset_specs WHERE batch_spec_id=?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![batch_spec_id], read_changeset_spec_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
