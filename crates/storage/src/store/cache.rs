#![forbid(unsafe_code)]

use super::support::sql_placeholders;
use super::{CacheEntryRow, CachePutRequest, SqliteStore, StoreError};
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use tracing::{debug, info};

const CACHE_COLUMNS: &str = "id, user_id, key, value, version, created_at_ms, last_used_at_ms";

fn read_cache_row(row: &rusqlite::Row<'_>) -> Result<CacheEntryRow, rusqlite::Error> {
    Ok(CacheEntryRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        version: row.get(4)?,
        created_at_ms: row.get(5)?,
        last_used_at_ms: row.get(6)?,
    })
}

/// Create-or-refresh: a second write to `(user_id, key)` replaces the value,
/// version and creation time. Recency from `mark_used` is kept.
pub(in crate::store) fn cache_put_tx(
    tx: &Transaction<'_>,
    user_id: i64,
    key: &str,
    value: &str,
    version: i64,
    now_ms: i64,
) -> Result<CacheEntryRow, StoreError> {
    let row = tx.query_row(
        &format!(
            r#"
            INSERT INTO execution_cache_entries(user_id, key, value, version, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, key) DO UPDATE SET
              value=excluded.value,
              version=excluded.version,
              created_at_ms=excluded.created_at_ms
            RETURNING {CACHE_COLUMNS}
            "#
        ),
        params![user_id, key, value, version, now_ms],
        read_cache_row,
    )?;
    Ok(row)
}

fn cache_lookup_tx(
    conn: &Connection,
    user_id: i64,
    keys: &[String],
    version: i64,
) -> Result<Vec<CacheEntryRow>, StoreError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {CACHE_COLUMNS} FROM execution_cache_entries \
         WHERE user_id=?1 AND version=?2 AND key IN ({}) \
         ORDER BY id ASC",
        sql_placeholders(3, keys.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut params: Vec<rusqlite::types::Value> = vec![user_id.into(), version.into()];
    params.extend(keys.iter().map(|key| rusqlite::types::Value::Text(key.clone())));
    let rows = stmt.query_map(params_from_iter(params), read_cache_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn cache_mark_used_tx(conn: &Connection, ids: &[i64], now_ms: i64) -> Result<usize, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE execution_cache_entries SET last_used_at_ms=?1 WHERE id IN ({})",
        sql_placeholders(2, ids.len())
    );
    let mut params: Vec<i64> = Vec::with_capacity(ids.len() + 1);
    params.push(now_ms);
    params.extend_from_slice(ids);
    Ok(conn.execute(&sql, params_from_iter(params))?)
}

impl SqliteStore {
    pub fn cache_put(&mut self, request: CachePutRequest) -> Result<CacheEntryRow, StoreError> {
        if request.key.trim().is_empty() {
            return Err(StoreError::InvalidInput("cache key must not be empty"));
        }
        let version = request.version.unwrap_or(self.config.cache_schema_version);
        let now_ms = self.now_ms();
        let tx = self.conn.transaction()?;
        let row = cache_put_tx(&tx, request.user_id, &request.key, &request.value, version, now_ms)?;
        tx.commit()?;
        Ok(row)
    }

    /// Entries for `keys` written with the current schema version. Missing
    /// keys are simply absent.
    pub fn cache_lookup(&self, user_id: i64, keys: &[String]) -> Result<Vec<CacheEntryRow>, StoreError> {
        cache_lookup_tx(&self.conn, user_id, keys, self.config.cache_schema_version)
    }

    pub fn cache_mark_used(&mut self, ids: &[i64]) -> Result<usize, StoreError> {
        let now_ms = self.now_ms();
        cache_mark_used_tx(&self.conn, ids, now_ms)
    }

    /// Looks up `keys` and marks the hits as used in one transaction.
    pub fn cache_resolve(&mut self, user_id: i64, keys: &[String]) -> Result<Vec<CacheEntryRow>, StoreError> {
        let now_ms = self.now_ms();
        let version = self.config.cache_schema_version;
        let tx = self.conn.transaction()?;
        let mut hits = cache_lookup_tx(&tx, user_id, keys, version)?;
        let ids: Vec<i64> = hits.iter().map(|entry| entry.id).collect();
        cache_mark_used_tx(&tx, &ids, now_ms)?;
        tx.commit()?;

        for hit in &mut hits {
            hit.last_used_at_ms = Some(now_ms);
        }
        debug!(user_id, requested = keys.len(), hits = hits.len(), "resolved cache entries");
        Ok(hits)
    }

    pub fn cache_entry(&self, user_id: i64, key: &str) -> Result<Option<CacheEntryRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CACHE_COLUMNS} FROM execution_cache_entries WHERE user_id=?1 AND key=?2"),
                params![user_id, key],
                read_cache_row,
            )
            .optional()?)
    }

    pub fn cache_total_bytes(&self) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(SUM(length(CAST(value AS BLOB))), 0) FROM execution_cache_entries",
            [],
            |row| row.get(0),
        )?)
    }

    /// Deletes entries in least-recently-used order while the bytes left
    /// behind stay at or above `max_total_bytes`, plus every entry written
    /// with an older schema version. Returns the number of deleted entries.
    pub fn cache_evict(&mut self, max_total_bytes: i64) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            r#"
            DELETE FROM execution_cache_entries WHERE id IN (
              SELECT id FROM (
                SELECT
                  id,
                  version,
                  SUM(length(CAST(value AS BLOB))) OVER (
                    ORDER BY COALESCE(last_used_at_ms, created_at_ms), id
                    ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
                  ) AS running_bytes,
                  SUM(length(CAST(value AS BLOB))) OVER () AS total_bytes
                FROM execution_cache_entries
              )
              WHERE total_bytes - running_bytes >= ?1 OR version < ?2
            )
            "#,
            params![max_total_bytes, self.config.cache_schema_version],
        )?;
        if deleted > 0 {
            info!(deleted, max_total_bytes, "evicted execution cache entries");
        }
        Ok(deleted)
    }
}
