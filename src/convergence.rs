//! Convergence Evaluator: operationalizes [`crate::domain::review::evaluate`]
//! against a stored outcome's review cycles
//!
//! Status transitions to `achieved` are proposed, not forced - this module
//! only returns a recommendation; the Supervisor or an explicit user
//! confirmation is what actually flips `Outcome.status`.

use crate::clock::Clock;
use crate::domain::{ConvergenceStatus, ReviewCycle};
use crate::error::EngineError;
use crate::store::{self, Store};

pub const DEFAULT_WINDOW: usize = 3;

pub struct ConvergenceEvaluator<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    window: usize,
}

impl<'a> ConvergenceEvaluator<'a> {
    pub fn new(store: &'a Store, clock: &'a dyn Clock) -> Self {
        Self { store, clock, window: DEFAULT_WINDOW }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Records one review cycle's open-issue count and evaluates
    /// convergence over the configured window.
    pub fn record_cycle(&self, outcome_id: &str, cycle_number: u32, open_issues: i64) -> Result<ConvergenceStatus, EngineError> {
        let cycle = ReviewCycle::new(outcome_id, cycle_number, open_issues, self.clock.now_ms());
        self.store.transaction(|tx| store::insert_review_cycle(tx, &cycle))?;
        self.evaluate(outcome_id)
    }

    /// Evaluates convergence from the cycles already recorded, without
    /// adding a new one.
    pub fn evaluate(&self, outcome_id: &str) -> Result<ConvergenceStatus, EngineError> {
        let cycles = self.store.with_connection(|c| store::list_review_cycles(c, outcome_id))?;
        Ok(crate::domain::review_evaluate(&cycles, self.window))
    }

    /// Proposes marking the outcome achieved: true only when convergence
    /// is `Achieved` and every task is terminal (no pending/claimed/running
    /// work left).
    pub fn propose_achieved(&self, outcome_id: &str) -> Result<bool, EngineError> {
        if self.evaluate(outcome_id)? != ConvergenceStatus::Achieved {
            return Ok(false);
        }
        let tasks = self.store.with_connection(|c| store::list_tasks_for_outcome(c, outcome_id))?;
        Ok(tasks.iter().all(|t| matches!(t.status, crate::domain::TaskStatus::Completed | crate::domain::TaskStatus::Failed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::{Outcome, Task, TaskStatus};

    fn setup() -> (Store, FixedClock) {
        (Store::open_in_memory().unwrap(), FixedClock::new(1000))
    }

    #[test]
    fn records_and_evaluates_converging() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let evaluator = ConvergenceEvaluator::new(&store, &clock);
        evaluator.record_cycle(&outcome.id, 1, 4).unwrap();
        evaluator.record_cycle(&outcome.id, 2, 2).unwrap();
        let status = evaluator.record_cycle(&outcome.id, 3, 1).unwrap();
        assert_eq!(status, ConvergenceStatus::Converging);
    }

    #[test]
    fn propose_achieved_requires_all_tasks_terminal() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();
        let mut task = Task::new(&outcome.id, "a", 10, clock.now_ms());
        task.status = TaskStatus::Pending;
        store.transaction(|tx| store::upsert_task(tx, &task)).unwrap();

        let evaluator = ConvergenceEvaluator::new(&store, &clock);
        evaluator.record_cycle(&outcome.id, 1, 0).unwrap();
        evaluator.record_cycle(&outcome.id, 2, 0).unwrap();
        assert_eq!(evaluator.evaluate(&outcome.id).unwrap(), ConvergenceStatus::Achieved);
        assert!(!evaluator.propose_achieved(&outcome.id).unwrap());

        let mut task = task;
        task.status = TaskStatus::Completed;
        store.transaction(|tx| store::upsert_task(tx, &task)).unwrap();
        assert!(evaluator.propose_achieved(&outcome.id).unwrap());
    }
}
