//! Schema migrations
//!
//! Schema version is a strictly increasing integer. On startup every
//! pending step is applied inside one transaction. There is no backward
//! migration path - an older binary refusing to start against a newer
//! schema is the intended failure mode.

use rusqlite::Connection;

pub const CURRENT_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
    CREATE TABLE schema_version (version INTEGER NOT NULL);
    INSERT INTO schema_version (version) VALUES (0);

    CREATE TABLE outcomes (
        id TEXT PRIMARY KEY,
        parent_id TEXT,
        status TEXT NOT NULL,
        capability_ready INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        data TEXT NOT NULL
    );

    CREATE TABLE tasks (
        id TEXT PRIMARY KEY,
        outcome_id TEXT NOT NULL,
        status TEXT NOT NULL,
        priority INTEGER NOT NULL,
        phase TEXT NOT NULL,
        claimed_by TEXT,
        created_at INTEGER NOT NULL,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_tasks_outcome_status ON tasks(outcome_id, status);
    CREATE INDEX idx_tasks_outcome_priority ON tasks(outcome_id, priority, created_at, id);

    CREATE TABLE workers (
        id TEXT PRIMARY KEY,
        outcome_id TEXT NOT NULL,
        status TEXT NOT NULL,
        last_heartbeat INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_workers_status_heartbeat ON workers(status, last_heartbeat);
    CREATE INDEX idx_workers_outcome ON workers(outcome_id);

    CREATE TABLE progress_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        outcome_id TEXT NOT NULL,
        worker_id TEXT NOT NULL,
        task_id TEXT NOT NULL,
        iteration INTEGER NOT NULL,
        compacted INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_progress_worker_ordered ON progress_entries(worker_id, id);

    CREATE TABLE discoveries (
        id TEXT PRIMARY KEY, outcome_id TEXT NOT NULL, created_at INTEGER NOT NULL, data TEXT NOT NULL
    );
    CREATE INDEX idx_discoveries_outcome ON discoveries(outcome_id, created_at);

    CREATE TABLE decisions (
        id TEXT PRIMARY KEY, outcome_id TEXT NOT NULL, created_at INTEGER NOT NULL, data TEXT NOT NULL
    );
    CREATE INDEX idx_decisions_outcome ON decisions(outcome_id, created_at);

    CREATE TABLE constraints_tbl (
        id TEXT PRIMARY KEY, outcome_id TEXT NOT NULL, created_at INTEGER NOT NULL, data TEXT NOT NULL
    );
    CREATE INDEX idx_constraints_outcome ON constraints_tbl(outcome_id, created_at);

    CREATE TABLE injections (
        id TEXT PRIMARY KEY, outcome_id TEXT NOT NULL, task_id TEXT NOT NULL,
        created_at INTEGER NOT NULL, data TEXT NOT NULL
    );
    CREATE INDEX idx_injections_task ON injections(task_id, created_at);

    CREATE TABLE observations (
        id TEXT PRIMARY KEY, outcome_id TEXT NOT NULL, task_id TEXT NOT NULL,
        created_at INTEGER NOT NULL, data TEXT NOT NULL
    );
    CREATE INDEX idx_observations_outcome ON observations(outcome_id, created_at);

    CREATE TABLE escalations (
        id TEXT PRIMARY KEY,
        outcome_id TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_escalations_outcome_status ON escalations(outcome_id, status);

    CREATE TABLE alerts (
        id TEXT PRIMARY KEY,
        target_kind TEXT NOT NULL,
        target_id TEXT NOT NULL,
        alert_type TEXT NOT NULL,
        active INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_alerts_target ON alerts(target_kind, target_id, active);

    CREATE TABLE jobs (
        id TEXT PRIMARY KEY,
        outcome_id TEXT,
        job_type TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_jobs_outcome_type_status ON jobs(outcome_id, job_type, status);

    CREATE TABLE review_cycles (
        id TEXT PRIMARY KEY,
        outcome_id TEXT NOT NULL,
        cycle_number INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_review_cycles_outcome ON review_cycles(outcome_id, cycle_number);
    "#,
)];

/// Apply every migration step whose version is greater than the database's
/// current `schema_version`, in order, each inside its own transaction.
pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    let has_version_table: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |r| r.get::<_, i64>(0),
        )?
        > 0;

    let current: u32 = if has_version_table {
        conn.query_row("SELECT version FROM schema_version", [], |r| r.get(0))?
    } else {
        0
    };

    for (version, sql) in MIGRATIONS {
        if *version > current {
            conn.execute_batch(sql)?;
            conn.execute("UPDATE schema_version SET version = ?1", [version])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        apply(&conn).unwrap();
        let version: u32 = conn.query_row("SELECT version FROM schema_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }
}
