//! Scheduler: at-most-one-claim, dependency/priority-aware task selection
//!
//! `claim_next_task` runs entirely inside one [`crate::store::Store`]
//! transaction, the same "`fn` sees a snapshot, commits atomically, retries
//! on contention" shape the store exposes for exactly this purpose. Because
//! the store holds its single connection behind one mutex for the whole
//! closure, no second caller can observe a half-written claim; `Conflict`
//! is still modeled as an outcome because `transaction_with_retries` can
//! exhaust its attempts under sustained contention, and callers should
//! back off the same way the teacher's `LlmError::is_retryable` callers do.

use std::collections::HashSet;

use crate::clock::Clock;
use crate::domain::{CapabilityReadiness, Task, TaskPhase, TaskStatus};
use crate::error::EngineError;
use crate::store::{self, Store};

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Task),
    None,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Completed,
    Failed,
    Reclaimed,
    Paused,
}

pub struct Scheduler<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
}

impl<'a> Scheduler<'a> {
    pub fn new(store: &'a Store, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// `ClaimNextTask(workerId, outcomeId)` per the scheduler's public
    /// contract: dependency-satisfied, not-escalated, capability-gated,
    /// ordered by `(priority, created_at, id)`.
    pub fn claim_next_task(&self, worker_id: &str, outcome_id: &str) -> Result<ClaimOutcome, EngineError> {
        let now = self.clock.now_ms();
        let result = self.store.transaction(|tx| {
            let Some(outcome) = store::get_outcome(tx, outcome_id)? else {
                return Ok(None);
            };

            let completed: HashSet<String> = store::list_tasks_by_status(tx, outcome_id, TaskStatus::Completed)?.into_iter().map(|t| t.id).collect();

            let mut escalated: HashSet<String> = HashSet::new();
            for esc in store::list_pending_escalations(tx, outcome_id)? {
                escalated.extend(esc.affected_tasks);
            }

            let candidates = store::list_pending_tasks(tx, outcome_id)?;
            let pick = candidates.into_iter().find(|t| {
                t.is_ready(&completed) && !escalated.contains(&t.id) && (t.phase != TaskPhase::Execution || outcome.capability_ready == CapabilityReadiness::Complete)
            });

            let Some(mut task) = pick else {
                return Ok(None);
            };

            task.status = TaskStatus::Claimed;
            task.claimed_by = Some(worker_id.to_string());
            task.claimed_at = Some(now);
            task.attempts += 1;
            task.updated_at = now;
            store::upsert_task(tx, &task)?;
            Ok(Some(task))
        });

        match result {
            Ok(Some(task)) => Ok(ClaimOutcome::Claimed(task)),
            Ok(None) => Ok(ClaimOutcome::None),
            Err(crate::store::StoreError::RetryExhausted(_)) => Ok(ClaimOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    /// `ReleaseClaim(taskId, reason)`.
    pub fn release_claim(&self, task_id: &str, reason: ReleaseReason) -> Result<Task, EngineError> {
        let now = self.clock.now_ms();
        self.store
            .transaction(|tx| {
                let mut task = store::get_task(tx, task_id)?.ok_or_else(|| crate::store::StoreError::NotFound(task_id.to_string()))?;

                match reason {
                    ReleaseReason::Completed => {
                        task.status = TaskStatus::Completed;
                        task.completed_at = Some(now);
                    }
                    ReleaseReason::Failed if task.attempts < task.max_attempts => {
                        task.status = TaskStatus::Pending;
                        task.claimed_by = None;
                        task.claimed_at = None;
                    }
                    ReleaseReason::Failed => {
                        task.status = TaskStatus::Failed;
                    }
                    ReleaseReason::Reclaimed | ReleaseReason::Paused => {
                        task.status = TaskStatus::Pending;
                        task.claimed_by = None;
                        task.claimed_at = None;
                    }
                }
                task.updated_at = now;
                store::upsert_task(tx, &task)?;
                Ok(task)
            })
            .map_err(EngineError::from)
    }

    /// Reclaim sweep: tasks claimed by a worker whose heartbeat is stale
    /// are released with `reason=reclaimed`; the stale worker is marked
    /// `failed`. Returns the ids of tasks reclaimed.
    pub fn reclaim_sweep(&self, heartbeat_timeout_ms: i64) -> Result<Vec<String>, EngineError> {
        let now = self.clock.now_ms();
        let stale = self.store.with_connection(|c| store::list_stale_candidates(c, now - heartbeat_timeout_ms))?;

        let mut reclaimed = Vec::new();
        for mut worker in stale {
            worker.status = crate::domain::WorkerStatus::Failed;
            worker.updated_at = now;
            let current_task = worker.current_task_id.take();
            self.store.transaction(|tx| store::upsert_worker(tx, &worker))?;

            if let Some(task_id) = current_task {
                self.release_claim(&task_id, ReleaseReason::Reclaimed)?;
                reclaimed.push(task_id);
            }
        }
        Ok(reclaimed)
    }
}

/// Rejects a `depends_on` set that would introduce a cycle, checked at
/// task-creation time against the outcome's existing task graph. Never
/// permitted to exist at runtime per the scheduler's edge-case rule.
pub fn validate_acyclic(existing: &[Task], new_task_id: &str, depends_on: &HashSet<String>) -> Result<(), EngineError> {
    let mut by_id: std::collections::HashMap<&str, &HashSet<String>> = existing.iter().map(|t| (t.id.as_str(), &t.depends_on)).collect();
    by_id.insert(new_task_id, depends_on);

    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();

    fn dfs<'a>(
        id: &'a str,
        by_id: &std::collections::HashMap<&'a str, &'a HashSet<String>>,
        visiting: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> bool {
        if visited.contains(id) {
            return false;
        }
        if !visiting.insert(id) {
            return true;
        }
        if let Some(deps) = by_id.get(id) {
            for dep in deps.iter() {
                if dfs(dep.as_str(), by_id, visiting, visited) {
                    return true;
                }
            }
        }
        visiting.remove(id);
        visited.insert(id);
        false
    }

    if dfs(new_task_id, &by_id, &mut visiting, &mut visited) {
        return Err(EngineError::Invalid(format!("task {new_task_id} would introduce a dependency cycle")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::{Outcome, TaskPhase};

    fn setup() -> (Store, FixedClock) {
        (Store::open_in_memory().unwrap(), FixedClock::new(1000))
    }

    #[test]
    fn claims_in_priority_order() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let low = Task::new(&outcome.id, "low priority", 20, clock.now_ms());
        let high = Task::new(&outcome.id, "high priority", 5, clock.now_ms());
        store
            .transaction(|tx| {
                store::upsert_task(tx, &low)?;
                store::upsert_task(tx, &high)
            })
            .unwrap();

        let scheduler = Scheduler::new(&store, &clock);
        let claimed = scheduler.claim_next_task("wrk_1", &outcome.id).unwrap();
        match claimed {
            ClaimOutcome::Claimed(t) => assert_eq!(t.id, high.id),
            other => panic!("expected claim, got {other:?}"),
        }
    }

    #[test]
    fn blocks_on_unmet_dependency() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let a = Task::new(&outcome.id, "a", 10, clock.now_ms());
        let b = Task::new(&outcome.id, "b", 10, clock.now_ms()).with_dependency(a.id.clone());
        store
            .transaction(|tx| {
                store::upsert_task(tx, &a)?;
                store::upsert_task(tx, &b)
            })
            .unwrap();

        let scheduler = Scheduler::new(&store, &clock);
        let claimed = scheduler.claim_next_task("wrk_1", &outcome.id).unwrap();
        assert_eq!(claimed, ClaimOutcome::Claimed(a.clone()));

        // b still blocked: a is claimed, not completed
        let claimed2 = scheduler.claim_next_task("wrk_2", &outcome.id).unwrap();
        assert_eq!(claimed2, ClaimOutcome::None);
    }

    #[test]
    fn execution_tasks_gated_on_capability_ready() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let exec_task = Task::new(&outcome.id, "ship it", 10, clock.now_ms()).with_phase(TaskPhase::Execution);
        store.transaction(|tx| store::upsert_task(tx, &exec_task)).unwrap();

        let scheduler = Scheduler::new(&store, &clock);
        assert_eq!(scheduler.claim_next_task("wrk_1", &outcome.id).unwrap(), ClaimOutcome::None);
    }

    #[test]
    fn pending_escalation_blocks_affected_task() {
        use crate::domain::{Escalation, EscalationQuestion, EscalationTrigger, TriggerType};

        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let task = Task::new(&outcome.id, "blocked", 10, clock.now_ms());
        store.transaction(|tx| store::upsert_task(tx, &task)).unwrap();

        let escalation = Escalation::new(
            &outcome.id,
            EscalationTrigger {
                r#type: TriggerType::UnclearRequirement,
                task_id: task.id.clone(),
                evidence: vec![],
            },
            EscalationQuestion { text: "which approach?".into(), context: "".into(), options: vec![] },
            HashSet::from([task.id.clone()]),
            clock.now_ms(),
        );
        store.transaction(|tx| store::upsert_escalation(tx, &escalation)).unwrap();

        let scheduler = Scheduler::new(&store, &clock);
        assert_eq!(scheduler.claim_next_task("wrk_1", &outcome.id).unwrap(), ClaimOutcome::None);
    }

    #[test]
    fn release_failed_under_max_attempts_goes_back_to_pending() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();
        let task = Task::new(&outcome.id, "a", 10, clock.now_ms());
        store.transaction(|tx| store::upsert_task(tx, &task)).unwrap();

        let scheduler = Scheduler::new(&store, &clock);
        scheduler.claim_next_task("wrk_1", &outcome.id).unwrap();

        let released = scheduler.release_claim(&task.id, ReleaseReason::Failed).unwrap();
        assert_eq!(released.status, TaskStatus::Pending);
        assert!(released.claimed_by.is_none());
    }

    #[test]
    fn release_failed_past_max_attempts_fails_task() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();
        let mut task = Task::new(&outcome.id, "a", 10, clock.now_ms());
        task.attempts = task.max_attempts;
        store.transaction(|tx| store::upsert_task(tx, &task)).unwrap();

        let scheduler = Scheduler::new(&store, &clock);
        let released = scheduler.release_claim(&task.id, ReleaseReason::Failed).unwrap();
        assert_eq!(released.status, TaskStatus::Failed);
    }

    #[test]
    fn reclaim_sweep_releases_stale_worker_claim() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();
        let task = Task::new(&outcome.id, "a", 10, clock.now_ms());
        store.transaction(|tx| store::upsert_task(tx, &task)).unwrap();

        let scheduler = Scheduler::new(&store, &clock);
        scheduler.claim_next_task("wrk_1", &outcome.id).unwrap();

        let mut worker = crate::domain::Worker::new(&outcome.id, "wrk_1", clock.now_ms());
        worker.id = "wrk_1".to_string();
        worker.status = crate::domain::WorkerStatus::Running;
        worker.current_task_id = Some(task.id.clone());
        worker.last_heartbeat = clock.now_ms();
        store.transaction(|tx| store::upsert_worker(tx, &worker)).unwrap();

        clock.advance(120_000);
        let reclaimed = scheduler.reclaim_sweep(60_000).unwrap();
        assert_eq!(reclaimed, vec![task.id.clone()]);

        let refreshed = store.with_connection(|c| store::get_task(c, &task.id)).unwrap().unwrap();
        assert_eq!(refreshed.status, TaskStatus::Pending);
        assert!(refreshed.claimed_by.is_none());
    }

    #[test]
    fn validate_acyclic_rejects_self_cycle() {
        let existing = vec![];
        let deps = HashSet::from(["task_a".to_string()]);
        let result = validate_acyclic(&existing, "task_a", &deps);
        assert!(result.is_err());
    }

    #[test]
    fn validate_acyclic_accepts_dag() {
        let a = Task::new("out_1", "a", 10, 1000);
        let result = validate_acyclic(&[a.clone()], "task_b", &HashSet::from([a.id]));
        assert!(result.is_ok());
    }
}
