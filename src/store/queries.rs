//! Per-entity CRUD and list helpers
//!
//! Each entity is upserted as a JSON blob in its table's `data` column
//! plus a handful of typed columns mirrored out of the struct for the
//! indexes `migrations` defines. Callers run these inside a
//! [`super::Store::transaction`] when the operation needs atomicity
//! with other writes (the Scheduler's claim, HOMЯ's escalation
//! creation); read-only callers can use [`super::Store::with_connection`].

use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};

use super::StoreError;
use crate::domain::{
    Alert, AlertTargetKind, ContextConstraint, ContextInjection, ContextStore, Decision, Discovery, Escalation, EscalationStatus, Job, JobStatus, JobType, Observation, Outcome,
    OutcomeStatus, ProgressEntry, ReviewCycle, Task, TaskStatus, Worker,
};

fn to_json(value: &impl serde::Serialize) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(StoreError::from)
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_str(s).map_err(StoreError::from)
}

/// A connection or a transaction - both implement `rusqlite`'s query
/// methods, so every read/write helper below takes this instead of
/// duplicating itself per call kind.
pub trait Conn {
    fn execute(&self, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<usize>;
    fn query_row<T>(&self, sql: &str, params: impl rusqlite::Params, f: impl FnOnce(&Row) -> rusqlite::Result<T>) -> rusqlite::Result<T>;
    fn query_map<T>(&self, sql: &str, params: impl rusqlite::Params, f: impl FnMut(&Row) -> rusqlite::Result<T>) -> rusqlite::Result<Vec<T>>;
}

macro_rules! impl_conn {
    ($t:ty) => {
        impl Conn for $t {
            fn execute(&self, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<usize> {
                // Resolves to `Connection::execute`, inherent (and thus
                // preferred over this trait method) on both `Connection`
                // and, via `Deref`, `Transaction`.
                self.execute(sql, params)
            }
            fn query_row<T>(&self, sql: &str, params: impl rusqlite::Params, f: impl FnOnce(&Row) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
                self.prepare(sql)?.query_row(params, f)
            }
            fn query_map<T>(&self, sql: &str, params: impl rusqlite::Params, mut f: impl FnMut(&Row) -> rusqlite::Result<T>) -> rusqlite::Result<Vec<T>> {
                let mut stmt = self.prepare(sql)?;
                let rows = stmt.query_map(params, |r| f(r))?;
                rows.collect()
            }
        }
    };
}

impl_conn!(Connection);
impl_conn!(Transaction<'_>);

// ---- outcomes ----

pub fn upsert_outcome(c: &impl Conn, o: &Outcome) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO outcomes (id, parent_id, status, capability_ready, created_at, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET parent_id=excluded.parent_id, status=excluded.status,
            capability_ready=excluded.capability_ready, data=excluded.data",
        params![o.id, o.parent_id, o.status.to_string(), o.capability_ready.as_i64(), o.created_at, to_json(o)?],
    )
    .map_err(StoreError::from)?;
    Ok(())
}

pub fn get_outcome(c: &impl Conn, id: &str) -> Result<Option<Outcome>, StoreError> {
    c.query_row("SELECT data FROM outcomes WHERE id = ?1", params![id], |r| r.get::<_, String>(0))
        .optional()
        .map_err(StoreError::from)?
        .map(|s| from_json(&s))
        .transpose()
}

pub fn list_outcomes(c: &impl Conn, status: Option<OutcomeStatus>) -> Result<Vec<Outcome>, StoreError> {
    let rows = match status {
        Some(s) => c.query_map("SELECT data FROM outcomes WHERE status = ?1", params![s.to_string()], |r| r.get::<_, String>(0))?,
        None => c.query_map("SELECT data FROM outcomes", params![], |r| r.get::<_, String>(0))?,
    };
    rows.iter().map(|s| from_json(s)).collect()
}

// ---- tasks ----

pub fn upsert_task(c: &impl Conn, t: &Task) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO tasks (id, outcome_id, status, priority, phase, claimed_by, created_at, data) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
         ON CONFLICT(id) DO UPDATE SET status=excluded.status, priority=excluded.priority, phase=excluded.phase,
            claimed_by=excluded.claimed_by, data=excluded.data",
        params![t.id, t.outcome_id, t.status.to_string(), t.priority, t.phase.to_string(), t.claimed_by, t.created_at, to_json(t)?],
    )?;
    Ok(())
}

pub fn get_task(c: &impl Conn, id: &str) -> Result<Option<Task>, StoreError> {
    c.query_row("SELECT data FROM tasks WHERE id = ?1", params![id], |r| r.get::<_, String>(0))
        .optional()?
        .map(|s| from_json(&s))
        .transpose()
}

pub fn list_tasks_for_outcome(c: &impl Conn, outcome_id: &str) -> Result<Vec<Task>, StoreError> {
    let rows = c.query_map(
        "SELECT data FROM tasks WHERE outcome_id = ?1 ORDER BY priority, created_at, id",
        params![outcome_id],
        |r| r.get::<_, String>(0),
    )?;
    rows.iter().map(|s| from_json(s)).collect()
}

/// Candidate tasks for the Scheduler's `ClaimNextTask`: pending, in
/// priority/fifo order. Dependency and escalation gating happens in
/// Rust over this list since it needs the full dependency graph.
pub fn list_pending_tasks(c: &impl Conn, outcome_id: &str) -> Result<Vec<Task>, StoreError> {
    let rows = c.query_map(
        "SELECT data FROM tasks WHERE outcome_id = ?1 AND status = 'pending' ORDER BY priority, created_at, id",
        params![outcome_id],
        |r| r.get::<_, String>(0),
    )?;
    rows.iter().map(|s| from_json(s)).collect()
}

pub fn list_tasks_by_status(c: &impl Conn, outcome_id: &str, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
    let rows = c.query_map(
        "SELECT data FROM tasks WHERE outcome_id = ?1 AND status = ?2 ORDER BY created_at, id",
        params![outcome_id, status.to_string()],
        |r| r.get::<_, String>(0),
    )?;
    rows.iter().map(|s| from_json(s)).collect()
}

// ---- workers ----

pub fn upsert_worker(c: &impl Conn, w: &Worker) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO workers (id, outcome_id, status, last_heartbeat, created_at, data) VALUES (?1,?2,?3,?4,?5,?6)
         ON CONFLICT(id) DO UPDATE SET status=excluded.status, last_heartbeat=excluded.last_heartbeat, data=excluded.data",
        params![w.id, w.outcome_id, w.status.to_string(), w.last_heartbeat, w.created_at, to_json(w)?],
    )?;
    Ok(())
}

pub fn get_worker(c: &impl Conn, id: &str) -> Result<Option<Worker>, StoreError> {
    c.query_row("SELECT data FROM workers WHERE id = ?1", params![id], |r| r.get::<_, String>(0))
        .optional()?
        .map(|s| from_json(&s))
        .transpose()
}

pub fn list_workers_for_outcome(c: &impl Conn, outcome_id: &str) -> Result<Vec<Worker>, StoreError> {
    let rows = c.query_map("SELECT data FROM workers WHERE outcome_id = ?1", params![outcome_id], |r| r.get::<_, String>(0))?;
    rows.iter().map(|s| from_json(s)).collect()
}

pub fn list_stale_candidates(c: &impl Conn, before_heartbeat: i64) -> Result<Vec<Worker>, StoreError> {
    let rows = c.query_map(
        "SELECT data FROM workers WHERE status = 'running' AND last_heartbeat < ?1",
        params![before_heartbeat],
        |r| r.get::<_, String>(0),
    )?;
    rows.iter().map(|s| from_json(s)).collect()
}

// ---- progress entries ----

pub fn insert_progress(c: &impl Conn, p: &ProgressEntry) -> Result<i64, StoreError> {
    c.execute(
        "INSERT INTO progress_entries (outcome_id, worker_id, task_id, iteration, compacted, created_at, data) VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![p.outcome_id, p.worker_id, p.task_id, p.iteration, p.compacted, p.created_at, to_json(p)?],
    )?;
    c.query_row("SELECT last_insert_rowid()", params![], |r| r.get(0)).map_err(StoreError::from)
}

pub fn list_progress_for_worker(c: &impl Conn, worker_id: &str) -> Result<Vec<ProgressEntry>, StoreError> {
    let rows = c.query_map(
        "SELECT data FROM progress_entries WHERE worker_id = ?1 ORDER BY id",
        params![worker_id],
        |r| r.get::<_, String>(0),
    )?;
    rows.iter().map(|s| from_json(s)).collect()
}

/// Marks `entry_ids` compacted into `compacted_into`, used once the
/// Iteration Driver has folded a batch of entries into a summary.
pub fn mark_progress_compacted(c: &impl Conn, entry_ids: &[i64], compacted_into: i64) -> Result<(), StoreError> {
    for id in entry_ids {
        let raw = c.query_row("SELECT data FROM progress_entries WHERE id = ?1", params![id], |r| r.get::<_, String>(0))?;
        let mut entry: ProgressEntry = from_json(&raw)?;
        entry.compacted = true;
        entry.compacted_into = Some(compacted_into);
        c.execute("UPDATE progress_entries SET compacted = 1, data = ?2 WHERE id = ?1", params![id, to_json(&entry)?])?;
    }
    Ok(())
}

pub fn list_uncompacted_progress(c: &impl Conn, worker_id: &str) -> Result<Vec<ProgressEntry>, StoreError> {
    let rows = c.query_map(
        "SELECT data FROM progress_entries WHERE worker_id = ?1 AND compacted = 0 ORDER BY id",
        params![worker_id],
        |r| r.get::<_, String>(0),
    )?;
    rows.iter().map(|s| from_json(s)).collect()
}

// ---- HOMЯ context ----

pub fn insert_discovery(c: &impl Conn, d: &Discovery) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO discoveries (id, outcome_id, created_at, data) VALUES (?1,?2,?3,?4)",
        params![d.id, d.outcome_id, d.created_at, to_json(d)?],
    )?;
    Ok(())
}

pub fn insert_decision(c: &impl Conn, d: &Decision) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO decisions (id, outcome_id, created_at, data) VALUES (?1,?2,?3,?4)",
        params![d.id, d.outcome_id, d.made_at, to_json(d)?],
    )?;
    Ok(())
}

pub fn insert_constraint(c: &impl Conn, constraint: &ContextConstraint) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO constraints_tbl (id, outcome_id, created_at, data) VALUES (?1,?2,?3,?4)",
        params![constraint.id, constraint.outcome_id, constraint.added_at, to_json(constraint)?],
    )?;
    Ok(())
}

pub fn insert_injection(c: &impl Conn, i: &ContextInjection) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO injections (id, outcome_id, task_id, created_at, data) VALUES (?1,?2,?3,?4,?5)",
        params![i.id, i.outcome_id, i.task_id, i.injected_at, to_json(i)?],
    )?;
    Ok(())
}

pub fn insert_observation(c: &impl Conn, o: &Observation) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO observations (id, outcome_id, task_id, created_at, data) VALUES (?1,?2,?3,?4,?5)",
        params![o.id, o.outcome_id, o.task_id, o.created_at, to_json(o)?],
    )?;
    Ok(())
}

/// Assembles the full HOMЯ context view for one outcome, used to build
/// an iteration's prompt and to serve `GET /outcomes/{id}/homr/context`.
pub fn load_context(c: &impl Conn, outcome_id: &str) -> Result<ContextStore, StoreError> {
    let discoveries = c
        .query_map("SELECT data FROM discoveries WHERE outcome_id = ?1 ORDER BY created_at", params![outcome_id], |r| r.get::<_, String>(0))?
        .iter()
        .map(|s| from_json(s))
        .collect::<Result<Vec<_>, _>>()?;
    let decisions = c
        .query_map("SELECT data FROM decisions WHERE outcome_id = ?1 ORDER BY created_at", params![outcome_id], |r| r.get::<_, String>(0))?
        .iter()
        .map(|s| from_json(s))
        .collect::<Result<Vec<_>, _>>()?;
    let constraints = c
        .query_map("SELECT data FROM constraints_tbl WHERE outcome_id = ?1 ORDER BY created_at", params![outcome_id], |r| r.get::<_, String>(0))?
        .iter()
        .map(|s| from_json(s))
        .collect::<Result<Vec<_>, _>>()?;
    let injections = c
        .query_map("SELECT data FROM injections WHERE outcome_id = ?1 ORDER BY created_at", params![outcome_id], |r| r.get::<_, String>(0))?
        .iter()
        .map(|s| from_json(s))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ContextStore { discoveries, decisions, constraints, injections })
}

// ---- escalations ----

pub fn upsert_escalation(c: &impl Conn, e: &Escalation) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO escalations (id, outcome_id, status, created_at, data) VALUES (?1,?2,?3,?4,?5)
         ON CONFLICT(id) DO UPDATE SET status=excluded.status, data=excluded.data",
        params![e.id, e.outcome_id, escalation_status_str(e.status), e.created_at, to_json(e)?],
    )?;
    Ok(())
}

fn escalation_status_str(s: EscalationStatus) -> &'static str {
    match s {
        EscalationStatus::Pending => "pending",
        EscalationStatus::Answered => "answered",
        EscalationStatus::Dismissed => "dismissed",
    }
}

pub fn get_escalation(c: &impl Conn, id: &str) -> Result<Option<Escalation>, StoreError> {
    c.query_row("SELECT data FROM escalations WHERE id = ?1", params![id], |r| r.get::<_, String>(0))
        .optional()?
        .map(|s| from_json(&s))
        .transpose()
}

pub fn list_pending_escalations(c: &impl Conn, outcome_id: &str) -> Result<Vec<Escalation>, StoreError> {
    let rows = c.query_map(
        "SELECT data FROM escalations WHERE outcome_id = ?1 AND status = 'pending' ORDER BY created_at",
        params![outcome_id],
        |r| r.get::<_, String>(0),
    )?;
    rows.iter().map(|s| from_json(s)).collect()
}

// ---- alerts ----

pub fn upsert_alert(c: &impl Conn, a: &Alert) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO alerts (id, target_kind, target_id, alert_type, active, created_at, data) VALUES (?1,?2,?3,?4,?5,?6,?7)
         ON CONFLICT(id) DO UPDATE SET active=excluded.active, data=excluded.data",
        params![a.id, target_kind_str(a.target_kind), a.target_id, alert_type_str(a), a.active, a.created_at, to_json(a)?],
    )?;
    Ok(())
}

fn target_kind_str(kind: AlertTargetKind) -> &'static str {
    match kind {
        AlertTargetKind::Worker => "worker",
        AlertTargetKind::Outcome => "outcome",
    }
}

fn alert_type_str(a: &Alert) -> String {
    serde_json::to_value(a.r#type).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
}

pub fn list_active_alerts_for_target(c: &impl Conn, target_kind: AlertTargetKind, target_id: &str) -> Result<Vec<Alert>, StoreError> {
    let rows = c.query_map(
        "SELECT data FROM alerts WHERE target_kind = ?1 AND target_id = ?2 AND active = 1",
        params![target_kind_str(target_kind), target_id],
        |r| r.get::<_, String>(0),
    )?;
    rows.iter().map(|s| from_json(s)).collect()
}

// ---- jobs ----

pub fn upsert_job(c: &impl Conn, j: &Job) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO jobs (id, outcome_id, job_type, status, created_at, data) VALUES (?1,?2,?3,?4,?5,?6)
         ON CONFLICT(id) DO UPDATE SET status=excluded.status, data=excluded.data",
        params![j.id, j.outcome_id, j.job_type.to_string(), job_status_str(j.status), j.created_at, to_json(j)?],
    )?;
    Ok(())
}

fn job_status_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

/// Single-flight check: is there already a pending or running job of
/// this type for this outcome?
pub fn has_inflight_job(c: &impl Conn, outcome_id: Option<&str>, job_type: JobType) -> Result<bool, StoreError> {
    let count: i64 = match outcome_id {
        Some(oid) => c.query_row(
            "SELECT COUNT(*) FROM jobs WHERE outcome_id = ?1 AND job_type = ?2 AND status IN ('pending','running')",
            params![oid, job_type.to_string()],
            |r| r.get(0),
        )?,
        None => c.query_row(
            "SELECT COUNT(*) FROM jobs WHERE outcome_id IS NULL AND job_type = ?1 AND status IN ('pending','running')",
            params![job_type.to_string()],
            |r| r.get(0),
        )?,
    };
    Ok(count > 0)
}

pub fn list_pending_jobs(c: &impl Conn) -> Result<Vec<Job>, StoreError> {
    let rows = c.query_map("SELECT data FROM jobs WHERE status = 'pending' ORDER BY created_at", params![], |r| r.get::<_, String>(0))?;
    rows.iter().map(|s| from_json(s)).collect()
}

// ---- review cycles ----

fn review_cycle_row_id(rc: &ReviewCycle) -> String {
    format!("{}-{}", rc.outcome_id, rc.cycle_number)
}

pub fn insert_review_cycle(c: &impl Conn, rc: &ReviewCycle) -> Result<(), StoreError> {
    c.execute(
        "INSERT INTO review_cycles (id, outcome_id, cycle_number, created_at, data) VALUES (?1,?2,?3,?4,?5)",
        params![review_cycle_row_id(rc), rc.outcome_id, rc.cycle_number, rc.created_at, to_json(rc)?],
    )?;
    Ok(())
}

pub fn list_review_cycles(c: &impl Conn, outcome_id: &str) -> Result<Vec<ReviewCycle>, StoreError> {
    let rows = c.query_map(
        "SELECT data FROM review_cycles WHERE outcome_id = ?1 ORDER BY cycle_number",
        params![outcome_id],
        |r| r.get::<_, String>(0),
    )?;
    rows.iter().map(|s| from_json(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn outcome_roundtrips_through_upsert_and_get() {
        let store = Store::open_in_memory().unwrap();
        let outcome = Outcome::new("Ship CLI", "ship it", 1000);
        store.transaction(|tx| upsert_outcome(tx, &outcome)).unwrap();

        let loaded = store.with_connection(|c| get_outcome(c, &outcome.id)).unwrap().unwrap();
        assert_eq!(loaded.id, outcome.id);
        assert_eq!(loaded.name, "Ship CLI");
    }

    #[test]
    fn list_pending_tasks_excludes_claimed() {
        let store = Store::open_in_memory().unwrap();
        let outcome = Outcome::new("x", "", 1000);
        store.transaction(|tx| upsert_outcome(tx, &outcome)).unwrap();

        let mut t1 = Task::new(&outcome.id, "a", 10, 1000);
        let t2 = Task::new(&outcome.id, "b", 5, 1001);
        t1.status = TaskStatus::Claimed;
        store
            .transaction(|tx| {
                upsert_task(tx, &t1)?;
                upsert_task(tx, &t2)
            })
            .unwrap();

        let pending = store.with_connection(|c| list_pending_tasks(c, &outcome.id)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, t2.id);
    }

    #[test]
    fn has_inflight_job_detects_pending() {
        let store = Store::open_in_memory().unwrap();
        let job = Job::new(JobType::RetroAnalyze, Some("out_1".into()), 1000);
        store.transaction(|tx| upsert_job(tx, &job)).unwrap();

        assert!(store.with_connection(|c| has_inflight_job(c, Some("out_1"), JobType::RetroAnalyze)).unwrap());
        assert!(!store.with_connection(|c| has_inflight_job(c, Some("out_1"), JobType::ProposalGenerate)).unwrap());
    }

    #[test]
    fn load_context_gathers_all_homr_rows() {
        let store = Store::open_in_memory().unwrap();
        let outcome = Outcome::new("x", "", 1000);
        store.transaction(|tx| upsert_outcome(tx, &outcome)).unwrap();

        let discovery = Discovery::new(&outcome.id, crate::domain::DiscoveryType::Insight, "pattern found", "task_1", 1000);
        store.transaction(|tx| insert_discovery(tx, &discovery)).unwrap();

        let ctx = store.with_connection(|c| load_context(c, &outcome.id)).unwrap();
        assert_eq!(ctx.discoveries.len(), 1);
        assert!(ctx.decisions.is_empty());
    }
}
