//! Supervisor: the periodic fleet sweep - reclaim, stuck/cost/loop/failure
//! detection, alert lifecycle, opt-in auto-resolve
//!
//! One sweep runs every `SUPERVISOR_INTERVAL_MS`. Each check is
//! independent and raises or resolves its own `Alert` rows; a later sweep
//! that finds the underlying condition gone closes the alert it opened.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::clock::Clock;
use crate::domain::{Alert, AlertSeverity, AlertTargetKind, AlertType, EscalationAnswer, EscalationStatus, TaskStatus, WorkerStatus};
use crate::error::EngineError;
use crate::scheduler::Scheduler;
use crate::store::{self, Store};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub heartbeat_timeout_ms: i64,
    pub stuck_threshold_ms: i64,
    pub loop_threshold: usize,
    pub auto_resolve_age_ms: i64,
    pub default_cost_cap_usd: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 60_000,
            stuck_threshold_ms: 15 * 60_000,
            loop_threshold: 5,
            auto_resolve_age_ms: 10 * 60_000,
            default_cost_cap_usd: 10.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub reclaimed_tasks: Vec<String>,
    pub alerts_raised: usize,
    pub alerts_resolved: usize,
    pub escalations_auto_resolved: usize,
}

pub struct Supervisor<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    config: SupervisorConfig,
}

impl<'a> Supervisor<'a> {
    pub fn new(store: &'a Store, clock: &'a dyn Clock, config: SupervisorConfig) -> Self {
        Self { store, clock, config }
    }

    pub fn sweep(&self) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();

        let scheduler = Scheduler::new(self.store, self.clock);
        report.reclaimed_tasks = scheduler.reclaim_sweep(self.config.heartbeat_timeout_ms)?;

        let outcomes = self.store.with_connection(|c| store::list_outcomes(c, None))?;
        for outcome in &outcomes {
            self.check_stuck_and_loops(outcome, &mut report)?;
            self.check_cost_overrun(outcome, &mut report)?;
            self.check_repeated_failures(outcome, &mut report)?;
            if outcome.auto_resolve {
                self.auto_resolve_escalations(outcome, &mut report)?;
            }
        }

        Ok(report)
    }

    fn check_stuck_and_loops(&self, outcome: &crate::domain::Outcome, report: &mut SweepReport) -> Result<(), EngineError> {
        let now = self.clock.now_ms();
        let workers = self.store.with_connection(|c| store::list_workers_for_outcome(c, &outcome.id))?;

        for worker in workers.into_iter().filter(|w| w.status == WorkerStatus::Running) {
            let stuck = now - worker.last_heartbeat > self.config.stuck_threshold_ms;
            self.raise_or_resolve(AlertType::StuckWorker, AlertSeverity::Warning, AlertTargetKind::Worker, &worker.id, "no heartbeat within the stuck threshold", stuck, report)?;

            let history = self.store.with_connection(|c| store::list_progress_for_worker(c, &worker.id))?;
            let looping = is_looping(&history, self.config.loop_threshold);
            self.raise_or_resolve(AlertType::IterationLoop, AlertSeverity::Warning, AlertTargetKind::Worker, &worker.id, "repeating the same output across iterations", looping, report)?;
        }
        Ok(())
    }

    fn check_cost_overrun(&self, outcome: &crate::domain::Outcome, report: &mut SweepReport) -> Result<(), EngineError> {
        let cap = outcome.effective_cost_cap(self.config.default_cost_cap_usd);
        let workers = self.store.with_connection(|c| store::list_workers_for_outcome(c, &outcome.id))?;
        for worker in &workers {
            let over = worker.is_over_budget(cap);
            self.raise_or_resolve(AlertType::CostOverrun, AlertSeverity::Critical, AlertTargetKind::Worker, &worker.id, "worker cost exceeds the outcome's cost cap", over, report)?;
        }
        Ok(())
    }

    fn check_repeated_failures(&self, outcome: &crate::domain::Outcome, report: &mut SweepReport) -> Result<(), EngineError> {
        let failed = self.store.with_connection(|c| store::list_tasks_by_status(c, &outcome.id, TaskStatus::Failed))?;
        for task in &failed {
            let repeated = task.attempts >= task.max_attempts;
            self.raise_or_resolve(AlertType::RepeatedFailure, AlertSeverity::Critical, AlertTargetKind::Outcome, &outcome.id, &format!("task {} failed after {} attempts", task.id, task.attempts), repeated, report)?;
        }
        Ok(())
    }

    fn auto_resolve_escalations(&self, outcome: &crate::domain::Outcome, report: &mut SweepReport) -> Result<(), EngineError> {
        let now = self.clock.now_ms();
        let pending = self.store.with_connection(|c| store::list_pending_escalations(c, &outcome.id))?;
        for mut escalation in pending {
            if now - escalation.created_at < self.config.auto_resolve_age_ms {
                continue;
            }
            let Some(choice) = escalation.best_option() else { continue };
            let selected = choice.id.clone();
            escalation.answer = Some(EscalationAnswer {
                selected_option: selected,
                additional_context: String::new(),
                answered_at: now,
                auto_resolved: true,
            });
            escalation.status = EscalationStatus::Answered;
            escalation.updated_at = now;
            self.store.transaction(|tx| store::upsert_escalation(tx, &escalation))?;
            report.escalations_auto_resolved += 1;
        }
        Ok(())
    }

    /// Raises a new alert when `condition` holds and none is already
    /// active, resolves any active alert of this kind when it doesn't.
    fn raise_or_resolve(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
        target_kind: AlertTargetKind,
        target_id: &str,
        message: &str,
        condition: bool,
        report: &mut SweepReport,
    ) -> Result<(), EngineError> {
        let now = self.clock.now_ms();
        let active = self
            .store
            .with_connection(|c| store::list_active_alerts_for_target(c, target_kind, target_id))?
            .into_iter()
            .find(|a| a.r#type == alert_type);

        match (condition, active) {
            (true, None) => {
                let alert = Alert::new(alert_type, severity, target_kind, target_id, message, now);
                self.store.transaction(|tx| store::upsert_alert(tx, &alert))?;
                report.alerts_raised += 1;
            }
            (false, Some(mut alert)) => {
                alert.resolve(now);
                self.store.transaction(|tx| store::upsert_alert(tx, &alert))?;
                report.alerts_resolved += 1;
            }
            _ => {}
        }
        Ok(())
    }
}

/// True when the last `threshold` progress entries all hash the same,
/// i.e. the worker is repeating itself instead of advancing.
fn is_looping(history: &[crate::domain::ProgressEntry], threshold: usize) -> bool {
    if history.len() < threshold {
        return false;
    }
    let tail = &history[history.len() - threshold..];
    let first_hash = content_hash(&tail[0].content);
    tail.iter().all(|e| content_hash(&e.content) == first_hash)
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::{Outcome, ProgressEntry, Task, Worker};

    fn setup() -> (Store, FixedClock) {
        (Store::open_in_memory().unwrap(), FixedClock::new(1_000_000))
    }

    #[test]
    fn raises_stuck_worker_alert_past_threshold() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let mut worker = Worker::new(&outcome.id, "w1", clock.now_ms());
        worker.status = WorkerStatus::Running;
        worker.last_heartbeat = clock.now_ms();
        store.transaction(|tx| store::upsert_worker(tx, &worker)).unwrap();

        clock.advance(16 * 60_000);
        let supervisor = Supervisor::new(&store, &clock, SupervisorConfig::default());
        let report = supervisor.sweep().unwrap();
        assert_eq!(report.alerts_raised, 1);

        let alerts = store.with_connection(|c| store::list_active_alerts_for_target(c, AlertTargetKind::Worker, &worker.id)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].r#type, AlertType::StuckWorker);
    }

    #[test]
    fn stuck_alert_resolves_once_heartbeat_resumes() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let mut worker = Worker::new(&outcome.id, "w1", clock.now_ms());
        worker.status = WorkerStatus::Running;
        store.transaction(|tx| store::upsert_worker(tx, &worker)).unwrap();

        clock.advance(16 * 60_000);
        let supervisor = Supervisor::new(&store, &clock, SupervisorConfig::default());
        supervisor.sweep().unwrap();

        worker.last_heartbeat = clock.now_ms();
        store.transaction(|tx| store::upsert_worker(tx, &worker)).unwrap();
        let report = supervisor.sweep().unwrap();
        assert_eq!(report.alerts_resolved, 1);
    }

    #[test]
    fn detects_iteration_loop_from_repeated_content() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();
        let mut worker = Worker::new(&outcome.id, "w1", clock.now_ms());
        worker.status = WorkerStatus::Running;
        worker.last_heartbeat = clock.now_ms();
        store.transaction(|tx| store::upsert_worker(tx, &worker)).unwrap();

        for i in 0..5 {
            let entry = ProgressEntry::new(&outcome.id, &worker.id, "task_1", i, "tried the same fix again", "raw", clock.now_ms());
            store.transaction(|tx| store::insert_progress(tx, &entry)).unwrap();
        }

        let supervisor = Supervisor::new(&store, &clock, SupervisorConfig::default());
        let report = supervisor.sweep().unwrap();
        let alerts = store.with_connection(|c| store::list_active_alerts_for_target(c, AlertTargetKind::Worker, &worker.id)).unwrap();
        assert!(alerts.iter().any(|a| a.r#type == AlertType::IterationLoop));
        assert!(report.alerts_raised >= 1);
    }

    #[test]
    fn cost_overrun_raises_critical_alert() {
        let (store, clock) = setup();
        let mut outcome = Outcome::new("x", "", clock.now_ms());
        outcome.cost_cap_usd = Some(1.0);
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let mut worker = Worker::new(&outcome.id, "w1", clock.now_ms());
        worker.cost = 5.0;
        store.transaction(|tx| store::upsert_worker(tx, &worker)).unwrap();

        let supervisor = Supervisor::new(&store, &clock, SupervisorConfig::default());
        supervisor.sweep().unwrap();
        let alerts = store.with_connection(|c| store::list_active_alerts_for_target(c, AlertTargetKind::Worker, &worker.id)).unwrap();
        assert!(alerts.iter().any(|a| a.r#type == AlertType::CostOverrun));
    }

    #[test]
    fn repeated_task_failure_raises_outcome_alert() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let mut task = Task::new(&outcome.id, "a", 10, clock.now_ms());
        task.status = TaskStatus::Failed;
        task.attempts = task.max_attempts;
        store.transaction(|tx| store::upsert_task(tx, &task)).unwrap();

        let supervisor = Supervisor::new(&store, &clock, SupervisorConfig::default());
        supervisor.sweep().unwrap();
        let alerts = store.with_connection(|c| store::list_active_alerts_for_target(c, AlertTargetKind::Outcome, &outcome.id)).unwrap();
        assert!(alerts.iter().any(|a| a.r#type == AlertType::RepeatedFailure));
    }

    #[test]
    fn auto_resolve_answers_stale_escalation_with_best_option() {
        use crate::domain::{Escalation, EscalationQuestion, EscalationTrigger, TriggerType};

        let (store, clock) = setup();
        let mut outcome = Outcome::new("x", "", clock.now_ms());
        outcome.auto_resolve = true;
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let escalation = Escalation::new(
            &outcome.id,
            EscalationTrigger {
                r#type: TriggerType::TechnicalDecision,
                task_id: "task_1".into(),
                evidence: vec![],
            },
            EscalationQuestion {
                text: "which approach?".into(),
                context: "".into(),
                options: vec![
                    crate::domain::EscalationOption { id: "opt_a".into(), label: "A".into(), description: "".into(), implications: "".into(), confidence: 0.9 },
                    crate::domain::EscalationOption { id: "opt_b".into(), label: "B".into(), description: "".into(), implications: "".into(), confidence: 0.3 },
                ],
            },
            Default::default(),
            clock.now_ms(),
        );
        store.transaction(|tx| store::upsert_escalation(tx, &escalation)).unwrap();

        clock.advance(11 * 60_000);
        let supervisor = Supervisor::new(&store, &clock, SupervisorConfig::default());
        let report = supervisor.sweep().unwrap();
        assert_eq!(report.escalations_auto_resolved, 1);

        let refreshed = store.with_connection(|c| store::get_escalation(c, &escalation.id)).unwrap().unwrap();
        assert_eq!(refreshed.status, EscalationStatus::Answered);
        assert_eq!(refreshed.answer.unwrap().selected_option, "opt_a");
    }
}
