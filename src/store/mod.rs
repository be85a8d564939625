//! Embedded store
//!
//! A single SQLite database (`rusqlite`, bundled) is the sole source of
//! truth for every entity in the system (outcomes, tasks, workers,
//! progress, HOMЯ context, escalations, alerts, jobs, review cycles).
//! Every entity is persisted as a JSON blob in a `data` column alongside a
//! handful of typed columns mirrored out for the index list the scheduler
//! and supervisor need (outcome, status, priority, heartbeat, ...) -
//! relational tables with one opaque blob column plus indexed columns,
//! the same "typed columns for what you filter on, opaque blob for the
//! rest" shape as the generic `indexed_fields()` contract this crate's
//! domain types used to implement against an external taskstore crate.
//!
//! `transaction` exposes a raw `rusqlite::Transaction` so callers can run
//! arbitrary multi-statement atomic operations (the Scheduler's claim,
//! HOMЯ's escalation-creation) without the Store needing to know about
//! every caller's invariants.

mod migrations;
mod queries;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use thiserror::Error;

pub use queries::*;

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transaction retry exhausted: {0}")]
    RetryExhausted(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    fn is_busy(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked
        )
    }
}

/// The embedded ACID store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and migrate) the store at the given path. Pass `:memory:`
    /// for an in-process, non-persistent store (used throughout tests).
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_connection(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=0;")?;
        migrations::apply(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Run `f` inside one transaction, retrying with exponential backoff
    /// on a busy/locked database, up to `max_attempts` times.
    ///
    /// This is the primitive [`super::scheduler`]'s `ClaimNextTask` and
    /// [`super::homr`]'s escalation creation are built on: `f` sees a
    /// consistent snapshot, and either the whole closure commits or none
    /// of it does.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: Fn(&Transaction) -> Result<T, StoreError>,
    {
        self.transaction_with_retries(f, 5)
    }

    pub fn transaction_with_retries<T, F>(&self, f: F, max_attempts: u32) -> Result<T, StoreError>
    where
        F: Fn(&Transaction) -> Result<T, StoreError>,
    {
        let mut delay = Duration::from_millis(50);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut conn = self.conn.lock().expect("store mutex poisoned");
            let tx = conn.transaction()?;
            match f(&tx).and_then(|value| tx.commit().map(|_| value).map_err(StoreError::from)) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_busy() && attempt < max_attempts => {
                    drop(conn);
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_secs(1));
                    continue;
                }
                Err(e) if attempt >= max_attempts => {
                    return Err(StoreError::RetryExhausted(e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Escape hatch for read-only queries that don't need transactional
    /// isolation (list endpoints, the supervisor's read-snapshot checks).
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().expect("store mutex poisoned");
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_applies_migrations() {
        let store = Store::open_in_memory().unwrap();
        let version: i64 = store
            .with_connection(|conn| {
                conn.query_row("SELECT version FROM schema_version", [], |r| r.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION as i64);
    }

    #[test]
    fn transaction_commits_on_success() {
        let store = Store::open_in_memory().unwrap();
        store
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO outcomes (id, parent_id, status, capability_ready, created_at, data) VALUES (?1, NULL, 'active', 0, 0, '{}')",
                    [&"out_1"],
                )
                .map_err(StoreError::from)
            })
            .unwrap();

        let count: i64 = store
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM outcomes", [], |r| r.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let result = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO outcomes (id, parent_id, status, capability_ready, created_at, data) VALUES (?1, NULL, 'active', 0, 0, '{}')",
                [&"out_1"],
            )
            .map_err(StoreError::from)?;
            Err(StoreError::Conflict("forced rollback".into()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM outcomes", [], |r| r.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
