//! Iteration Driver: the per-worker loop that claims a task, invokes the
//! agent once, observes the output, and repeats
//!
//! One `tokio::spawn`'d task per live Worker runs [`run`]. The loop never
//! touches the Worker Manager's registry directly except through its
//! published API (`pause_requested`/`terminate_requested`/`drain_interventions`/
//! `heartbeat`), so the control-flag polling stays one-directional: the
//! driver depends on [`crate::worker_manager`], never the reverse.

use std::time::Duration;

use crate::agent::{self, AgentRequest, AgentStatus};
use crate::clock::Clock;
use crate::domain::{Outcome, Worker, WorkerStatus};
use crate::error::EngineError;
use crate::homr::{self, HomrInput};
use crate::scheduler::{ClaimOutcome, ReleaseReason, Scheduler};
use crate::store::{self, Store};
use crate::worker_manager::WorkerManager;

/// Consecutive empty claims before a worker with nothing left to do
/// exits rather than spinning forever.
pub const IDLE_EXIT_ITERATIONS: u32 = 3;

#[derive(Debug, Clone)]
pub struct IterationConfig {
    pub idle_poll_interval_ms: u64,
    pub iteration_delay_ms: u64,
    pub max_iterations_per_task: u32,
    pub compaction_threshold: usize,
    pub agent_timeout_ms: u64,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval_ms: 2_000,
            iteration_delay_ms: 1_000,
            max_iterations_per_task: 20,
            compaction_threshold: 30,
            agent_timeout_ms: 300_000,
        }
    }
}

/// Drives `worker` until it terminates: either it runs out of claimable
/// tasks ([`IDLE_EXIT_ITERATIONS`] empty polls in a row), or the Worker
/// Manager flags it for termination.
pub async fn run(store: &Store, clock: &dyn Clock, worker_manager: &WorkerManager<'_>, agent_command: &str, config: &IterationConfig, mut worker: Worker) -> Result<(), EngineError> {
    let scheduler = Scheduler::new(store, clock);
    let mut idle_polls = 0u32;
    let mut current_task_id: Option<String> = None;
    let mut attempts_on_current = 0u32;

    loop {
        if worker_manager.terminate_requested(&worker.id) {
            break;
        }

        if worker_manager.pause_requested(&worker.id) {
            worker.status = WorkerStatus::Paused;
            store.transaction(|tx| store::upsert_worker(tx, &worker))?;
            tokio::time::sleep(Duration::from_millis(config.idle_poll_interval_ms)).await;
            continue;
        }

        let interventions = worker_manager.drain_interventions(&worker.id);

        if current_task_id.is_none() {
            match scheduler.claim_next_task(&worker.id, &worker.outcome_id)? {
                ClaimOutcome::Claimed(task) => {
                    current_task_id = Some(task.id);
                    attempts_on_current = 0;
                    idle_polls = 0;
                }
                ClaimOutcome::None => {
                    idle_polls += 1;
                    if idle_polls >= IDLE_EXIT_ITERATIONS {
                        worker.status = WorkerStatus::Completed;
                        worker.updated_at = clock.now_ms();
                        store.transaction(|tx| store::upsert_worker(tx, &worker))?;
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(config.idle_poll_interval_ms)).await;
                    continue;
                }
                ClaimOutcome::Conflict => {
                    tokio::time::sleep(Duration::from_millis(config.idle_poll_interval_ms)).await;
                    continue;
                }
            }
        }

        let task_id = current_task_id.clone().expect("current_task_id set above");
        let task = store
            .with_connection(|c| store::get_task(c, &task_id))?
            .ok_or_else(|| EngineError::NotFound(task_id.clone()))?;
        let outcome = store
            .with_connection(|c| store::get_outcome(c, &worker.outcome_id))?
            .ok_or_else(|| EngineError::NotFound(worker.outcome_id.clone()))?;
        let context = store.with_connection(|c| store::load_context(c, &worker.outcome_id))?;
        let history = store.with_connection(|c| store::list_progress_for_worker(c, &worker.id))?;

        let prompt = build_prompt(&outcome, &task, &context, &history, &interventions);

        let response = agent::invoke(
            agent_command,
            &AgentRequest {
                prompt,
                working_dir: ".".to_string(),
                env: Default::default(),
                timeout_ms: config.agent_timeout_ms,
            },
        )
        .await;

        worker.iteration += 1;
        worker.cost += response.cost;

        let progress = crate::domain::ProgressEntry::new(&worker.outcome_id, &worker.id, &task_id, worker.iteration, &response.summary, &response.raw_output, clock.now_ms());
        store.transaction(|tx| store::insert_progress(tx, &progress))?;

        homr::observe(
            store,
            clock,
            HomrInput {
                outcome_id: worker.outcome_id.clone(),
                task_id: task_id.clone(),
                worker_id: worker.id.clone(),
                iteration: worker.iteration,
                structured: response.structured.clone(),
            },
        )?;

        match response.status {
            AgentStatus::Done => {
                scheduler.release_claim(&task_id, ReleaseReason::Completed)?;
                current_task_id = None;
            }
            AgentStatus::NeedsMore => {
                attempts_on_current += 1;
                if attempts_on_current >= config.max_iterations_per_task {
                    scheduler.release_claim(&task_id, ReleaseReason::Failed)?;
                    current_task_id = None;
                }
            }
            AgentStatus::Failed => {
                scheduler.release_claim(&task_id, ReleaseReason::Failed)?;
                current_task_id = None;
            }
        }

        maybe_compact(store, clock, &worker, config.compaction_threshold)?;

        worker.updated_at = clock.now_ms();
        store.transaction(|tx| store::upsert_worker(tx, &worker))?;
        worker_manager.heartbeat(&worker.id)?;

        tokio::time::sleep(Duration::from_millis(config.iteration_delay_ms)).await;
    }

    worker_manager.unregister(&worker.id);
    Ok(())
}

fn build_prompt(outcome: &Outcome, task: &crate::domain::Task, context: &crate::domain::ContextStore, history: &[crate::domain::ProgressEntry], interventions: &[String]) -> String {
    let mut sections = Vec::new();

    if !interventions.is_empty() {
        sections.push(format!("## Interventions\n{}", interventions.join("\n")));
    }

    sections.push(format!("## Outcome\n{}\n{}", outcome.name, outcome.intent.summary));
    if !outcome.design_doc.approach.is_empty() {
        sections.push(format!("## Design\n{}", outcome.design_doc.approach));
    }

    sections.push(format!("## Task\n{}\n{}", task.title, task.description));

    let injections = context.injections_for(&task.id);
    if !injections.is_empty() {
        let text = injections.iter().map(|i| i.content.as_str()).collect::<Vec<_>>().join("\n");
        sections.push(format!("## Context\n{text}"));
    }

    let recent: Vec<&str> = history.iter().rev().take(5).map(|p| p.content.as_str()).collect();
    if !recent.is_empty() {
        sections.push(format!("## Recent progress\n{}", recent.into_iter().rev().collect::<Vec<_>>().join("\n")));
    }

    sections.join("\n\n")
}

/// Folds uncompacted entries into one summary row once they exceed
/// `threshold`, so the prompt built from `history` stays bounded.
fn maybe_compact(store: &Store, clock: &dyn Clock, worker: &Worker, threshold: usize) -> Result<(), EngineError> {
    let uncompacted = store.with_connection(|c| store::list_uncompacted_progress(c, &worker.id))?;
    if uncompacted.len() <= threshold {
        return Ok(());
    }

    let summary = format!("compacted {} earlier entries", uncompacted.len());
    let entry = crate::domain::ProgressEntry::new(&worker.outcome_id, &worker.id, "", worker.iteration, &summary, "", clock.now_ms());
    let new_id = store.transaction(|tx| store::insert_progress(tx, &entry))?;

    let ids: Vec<i64> = uncompacted.iter().map(|e| e.id).collect();
    store.transaction(|tx| store::mark_progress_compacted(tx, &ids, new_id))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::{Outcome, Task};

    fn setup() -> (Store, FixedClock) {
        (Store::open_in_memory().unwrap(), FixedClock::new(1000))
    }

    #[tokio::test]
    async fn worker_exits_after_idle_polls_with_no_tasks() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let manager = WorkerManager::new(&store, &clock);
        let worker = manager.start_worker(&outcome.id, "w1", false).unwrap();

        let mut config = IterationConfig::default();
        config.idle_poll_interval_ms = 1;

        run(&store, &clock, &manager, "", &config, worker.clone()).await.unwrap();

        let refreshed = store.with_connection(|c| store::get_worker(c, &worker.id)).unwrap().unwrap();
        assert_eq!(refreshed.status, WorkerStatus::Completed);
    }

    #[tokio::test]
    async fn worker_completes_a_claimed_task() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();
        let task = Task::new(&outcome.id, "do it", 10, clock.now_ms());
        store.transaction(|tx| store::upsert_task(tx, &task)).unwrap();

        let manager = WorkerManager::new(&store, &clock);
        let worker = manager.start_worker(&outcome.id, "w1", false).unwrap();

        let mut config = IterationConfig::default();
        config.idle_poll_interval_ms = 1;
        config.iteration_delay_ms = 1;

        let agent_cmd = r#"echo '{"status":"done","summary":"did it","cost":0.01}'"#;
        run(&store, &clock, &manager, agent_cmd, &config, worker.clone()).await.unwrap();

        let refreshed = store.with_connection(|c| store::get_task(c, &task.id)).unwrap().unwrap();
        assert_eq!(refreshed.status, crate::domain::TaskStatus::Completed);
    }
}
