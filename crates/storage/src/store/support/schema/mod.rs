#![forbid(unsafe_code)]

mod sql;

use super::super::StoreError;
use rusqlite::{Connection, OptionalExtension, params};

pub(in crate::store) const SCHEMA_VERSION: &str = "bx1";

pub(in crate::store) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&sql::full_schema_sql())?;

    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match stored {
        None => {
            conn.execute(
                "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
                params!["schema_version", SCHEMA_VERSION],
            )?;
        }
        Some(stored) if stored != SCHEMA_VERSION => {
            return Err(StoreError::Config(format!(
                "database schema {stored:?} is not supported (expected {SCHEMA_VERSION:?})"
            )));
        }
        Some(_) => {}
    }
    Ok(())
}
