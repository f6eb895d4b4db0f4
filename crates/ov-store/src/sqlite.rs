//! Local file-backed mirror on SQLite.
//!
//! # Schema
//! - `records`: one row per (partition_key, row_key) with a JSON `body`.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, foreign_keys=ON.
//! PRAGMA integrity_check runs at open; returns error if it fails.

use crate::store::{Store, StoreError};
use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// A `Store` over a single SQLite file.
///
/// The connection is serialized behind a mutex; each operation is one
/// statement, which gives the per-(partition, row) atomic replace the core
/// relies on.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates the
    /// table if needed. Returns `Err` if integrity_check fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        apply_schema(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database (unit tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".to_owned()))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, partition: &str, row: &str) -> Result<Option<Value>, StoreError> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE partition_key = ?1 AND row_key = ?2",
                params![partition, row],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match body {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, partition: &str, row: &str, body: Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(&body)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO records (partition_key, row_key, body, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT (partition_key, row_key) DO UPDATE
                SET body = excluded.body, updated_at = excluded.updated_at",
            params![partition, row, text],
        )?;
        Ok(())
    }

    async fn list(&self, partition: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT row_key, body FROM records WHERE partition_key = ?1 ORDER BY row_key")?;
        let rows = stmt.query_map(params![partition], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for entry in rows {
            let (row, text) = entry?;
            out.push((row, serde_json::from_str(&text)?));
        }
        Ok(out)
    }

    async fn delete(&self, partition: &str, row: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM records WHERE partition_key = ?1 AND row_key = ?2",
            params![partition, row],
        )?;
        Ok(changed > 0)
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    if result == "ok" {
        Ok(())
    } else {
        Err(StoreError::Backend(format!(
            "integrity check failed: {result}"
        )))
    }
}

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS records (
             partition_key TEXT NOT NULL,
             row_key       TEXT NOT NULL,
             body          TEXT NOT NULL,
             updated_at    TEXT NOT NULL,
             PRIMARY KEY (partition_key, row_key)
         )",
    )?;
    Ok(())
}
