//! Worker Manager: spawns, tracks, heartbeats, pauses, resumes and reaps Workers
//!
//! The Worker Manager owns exactly one piece of process-local mutable
//! state - the registry of running workers' control blocks - behind a
//! single mutex, never exposed to callers except through this API (the
//! "global mutable state" design note). It does not itself run the
//! Iteration Driver loop; `StartWorker`/`ResumeWorker` only prepare the
//! Worker row and control block and report whether a fresh driver task
//! needs to be spawned - the daemon wiring does the actual `tokio::spawn`,
//! since the driver is the one thing that needs to poll this manager, not
//! the other way around.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::clock::Clock;
use crate::domain::{Worker, WorkerStatus};
use crate::error::EngineError;
use crate::store::{self, Store};

#[derive(Debug, Default)]
struct ControlBlock {
    pause_requested: bool,
    terminate_requested: bool,
    interventions: VecDeque<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    AlreadyAlive,
    NeedsRespawn,
}

pub struct WorkerManager<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    registry: Mutex<HashMap<String, ControlBlock>>,
}

impl<'a> WorkerManager<'a> {
    pub fn new(store: &'a Store, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            clock,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// `StartWorker(outcomeId, {parallel?})`. Creates the Worker row
    /// `status=idle` and a fresh control block; the caller spawns the
    /// actual Iteration Driver task and calls [`Self::mark_running`]
    /// once it's under way.
    pub fn start_worker(&self, outcome_id: &str, name: &str, parallel: bool) -> Result<Worker, EngineError> {
        if !parallel {
            let running = self.store.with_connection(|c| store::list_workers_for_outcome(c, outcome_id))?;
            if running.iter().any(|w| w.status == WorkerStatus::Running) {
                return Err(EngineError::Conflict(format!("a worker is already running for outcome {outcome_id}")));
            }
        }

        let worker = Worker::new(outcome_id, name, self.clock.now_ms());
        self.store.transaction(|tx| store::upsert_worker(tx, &worker))?;
        self.registry.lock().expect("worker registry poisoned").insert(worker.id.clone(), ControlBlock::default());
        Ok(worker)
    }

    /// Called by the driver once its task is actually running.
    pub fn mark_running(&self, worker: &mut Worker) -> Result<(), EngineError> {
        worker.status = WorkerStatus::Running;
        worker.last_heartbeat = self.clock.now_ms();
        worker.updated_at = self.clock.now_ms();
        self.store.transaction(|tx| store::upsert_worker(tx, worker))?;
        Ok(())
    }

    /// `PauseWorker(workerId)`: sets the pause flag the driver polls
    /// between iterations. Does not itself persist `status=paused` - the
    /// driver does that at the next safe point.
    pub fn pause_worker(&self, worker_id: &str) -> Result<(), EngineError> {
        let mut registry = self.registry.lock().expect("worker registry poisoned");
        let block = registry.get_mut(worker_id).ok_or_else(|| EngineError::NotFound(worker_id.to_string()))?;
        block.pause_requested = true;
        Ok(())
    }

    /// `ResumeWorker(workerId)`: clears the pause flag. Reports whether
    /// the caller needs to spawn a fresh driver task (the control block
    /// had already been torn down, meaning no live task is polling it).
    pub fn resume_worker(&self, worker_id: &str) -> Result<ResumeOutcome, EngineError> {
        let mut registry = self.registry.lock().expect("worker registry poisoned");
        match registry.get_mut(worker_id) {
            Some(block) => {
                block.pause_requested = false;
                Ok(ResumeOutcome::AlreadyAlive)
            }
            None => {
                registry.insert(worker_id.to_string(), ControlBlock::default());
                Ok(ResumeOutcome::NeedsRespawn)
            }
        }
    }

    /// `SendIntervention(workerId, message)`: enqueued for the driver to
    /// prepend into its next iteration's prompt.
    pub fn send_intervention(&self, worker_id: &str, message: impl Into<String>) -> Result<(), EngineError> {
        let mut registry = self.registry.lock().expect("worker registry poisoned");
        let block = registry.get_mut(worker_id).ok_or_else(|| EngineError::NotFound(worker_id.to_string()))?;
        block.interventions.push_back(message.into());
        Ok(())
    }

    /// Drains and returns all interventions queued for `worker_id`, in
    /// the order they were sent.
    pub fn drain_interventions(&self, worker_id: &str) -> Vec<String> {
        let mut registry = self.registry.lock().expect("worker registry poisoned");
        match registry.get_mut(worker_id) {
            Some(block) => block.interventions.drain(..).collect(),
            None => Vec::new(),
        }
    }

    pub fn pause_requested(&self, worker_id: &str) -> bool {
        self.registry.lock().expect("worker registry poisoned").get(worker_id).is_some_and(|b| b.pause_requested)
    }

    pub fn terminate_requested(&self, worker_id: &str) -> bool {
        self.registry.lock().expect("worker registry poisoned").get(worker_id).is_some_and(|b| b.terminate_requested)
    }

    pub fn request_terminate(&self, worker_id: &str) {
        if let Some(block) = self.registry.lock().expect("worker registry poisoned").get_mut(worker_id) {
            block.terminate_requested = true;
        }
    }

    /// `Heartbeat(workerId)`: called once per iteration and every 10s
    /// while the agent call is in flight.
    pub fn heartbeat(&self, worker_id: &str) -> Result<(), EngineError> {
        let now = self.clock.now_ms();
        self.store.transaction(|tx| {
            let mut worker = store::get_worker(tx, worker_id)?.ok_or_else(|| crate::store::StoreError::NotFound(worker_id.to_string()))?;
            worker.last_heartbeat = now;
            worker.updated_at = now;
            store::upsert_worker(tx, &worker)
        })?;
        Ok(())
    }

    /// Removes `worker_id`'s control block once its driver task has
    /// exited for good (completed/failed), so a stale entry doesn't
    /// answer `pause_requested`/`terminate_requested` for a dead task.
    pub fn unregister(&self, worker_id: &str) {
        self.registry.lock().expect("worker registry poisoned").remove(worker_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::Outcome;

    fn setup() -> (Store, FixedClock) {
        (Store::open_in_memory().unwrap(), FixedClock::new(1000))
    }

    #[test]
    fn start_worker_rejects_second_non_parallel() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let manager = WorkerManager::new(&store, &clock);
        let mut w1 = manager.start_worker(&outcome.id, "w1", false).unwrap();
        manager.mark_running(&mut w1).unwrap();

        let result = manager.start_worker(&outcome.id, "w2", false);
        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn start_worker_allows_parallel() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let manager = WorkerManager::new(&store, &clock);
        let mut w1 = manager.start_worker(&outcome.id, "w1", true).unwrap();
        manager.mark_running(&mut w1).unwrap();
        assert!(manager.start_worker(&outcome.id, "w2", true).is_ok());
    }

    #[test]
    fn pause_then_resume_reports_already_alive() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let manager = WorkerManager::new(&store, &clock);
        let worker = manager.start_worker(&outcome.id, "w1", false).unwrap();
        manager.pause_worker(&worker.id).unwrap();
        assert!(manager.pause_requested(&worker.id));

        assert_eq!(manager.resume_worker(&worker.id).unwrap(), ResumeOutcome::AlreadyAlive);
        assert!(!manager.pause_requested(&worker.id));
    }

    #[test]
    fn resume_after_unregister_needs_respawn() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let manager = WorkerManager::new(&store, &clock);
        let worker = manager.start_worker(&outcome.id, "w1", false).unwrap();
        manager.unregister(&worker.id);

        assert_eq!(manager.resume_worker(&worker.id).unwrap(), ResumeOutcome::NeedsRespawn);
    }

    #[test]
    fn interventions_drain_in_order() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let manager = WorkerManager::new(&store, &clock);
        let worker = manager.start_worker(&outcome.id, "w1", false).unwrap();
        manager.send_intervention(&worker.id, "slow down").unwrap();
        manager.send_intervention(&worker.id, "focus on tests").unwrap();

        assert_eq!(manager.drain_interventions(&worker.id), vec!["slow down", "focus on tests"]);
        assert!(manager.drain_interventions(&worker.id).is_empty());
    }

    #[test]
    fn heartbeat_persists_last_heartbeat() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let manager = WorkerManager::new(&store, &clock);
        let worker = manager.start_worker(&outcome.id, "w1", false).unwrap();
        clock.advance(5_000);
        manager.heartbeat(&worker.id).unwrap();

        let refreshed = store.with_connection(|c| store::get_worker(c, &worker.id)).unwrap().unwrap();
        assert_eq!(refreshed.last_heartbeat, 6000);
    }
}
