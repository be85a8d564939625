//! Dispatcher: classifies an inbound request and creates the Outcome (and
//! its seed Tasks) for it - never starts a Worker itself
//!
//! Three responsibilities: match an incoming request against active
//! outcomes (so a near-duplicate request augments rather than forks),
//! classify how much up-front decomposition a new request needs, and run
//! the outcome-creation transaction.

use std::collections::HashSet;

use crate::clock::Clock;
use crate::domain::{Outcome, OutcomeIntent, Task, TaskPhase};
use crate::error::EngineError;
use crate::store::{self, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// A single execution task, no capability discovery phase.
    Quick,
    /// Capability phase first, then one execution task.
    Research,
    /// Capability phase plus several independent execution tasks.
    Deep,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeMatch {
    pub outcome_id: String,
    pub score: f64,
}

/// Classifies `query` by a handful of surface signals - this is not a
/// model call, just the up-front routing the spec asks the Dispatcher to
/// do before any agent is invoked.
pub fn classify_mode(query: &str) -> DispatchMode {
    let lower = query.to_lowercase();
    let research_terms = ["research", "investigate", "compare", "explore"];
    let deep_terms = ["architecture", "redesign", "migrate", "overhaul"];

    if deep_terms.iter().any(|t| lower.contains(t)) || query.split_whitespace().count() > 40 {
        DispatchMode::Deep
    } else if research_terms.iter().any(|t| lower.contains(t)) {
        DispatchMode::Research
    } else {
        DispatchMode::Quick
    }
}

/// Up to `k` active outcomes whose name/brief/intent best overlaps
/// `query`'s vocabulary, ranked by Jaccard similarity of word sets.
pub fn match_phase(store: &Store, query: &str, k: usize) -> Result<Vec<OutcomeMatch>, EngineError> {
    let query_words = word_set(query);
    let outcomes = store.with_connection(|c| store::list_outcomes(c, Some(crate::domain::OutcomeStatus::Active)))?;

    let mut scored: Vec<OutcomeMatch> = outcomes
        .iter()
        .map(|o| {
            let text = format!("{} {} {}", o.name, o.brief, o.intent.summary);
            OutcomeMatch { outcome_id: o.id.clone(), score: jaccard(&query_words, &word_set(&text)) }
        })
        .filter(|m| m.score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    Ok(scored)
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase().split_whitespace().map(str::to_string).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Creates an Outcome and its seed Tasks in one transaction. Does not
/// start any Worker - `StartWorker` is a separate, explicit call.
pub fn create_outcome(store: &Store, clock: &dyn Clock, name: &str, brief: &str, mode: DispatchMode, parent_id: Option<&str>) -> Result<Outcome, EngineError> {
    let now = clock.now_ms();

    let mut outcome = Outcome::new(name, brief, now);
    outcome.intent = OutcomeIntent { summary: brief.to_string(), items: Vec::new(), success_criteria: Vec::new() };
    if let Some(parent_id) = parent_id {
        let parent = store.with_connection(|c| store::get_outcome(c, parent_id))?.ok_or_else(|| EngineError::NotFound(parent_id.to_string()))?;
        outcome = outcome.with_parent(parent.id, parent.depth);
    }

    let tasks = seed_tasks(&outcome, mode, now);

    store.transaction(|tx| {
        store::upsert_outcome(tx, &outcome)?;
        for task in &tasks {
            store::upsert_task(tx, task)?;
        }
        Ok(())
    })?;

    Ok(outcome)
}

fn seed_tasks(outcome: &Outcome, mode: DispatchMode, now: i64) -> Vec<Task> {
    match mode {
        DispatchMode::Quick => vec![Task::new(&outcome.id, "execute the request", 10, now).with_phase(TaskPhase::Execution)],
        DispatchMode::Research => {
            let capability = Task::new(&outcome.id, "establish capability", 10, now).with_phase(TaskPhase::Capability);
            let execution = Task::new(&outcome.id, "execute the request", 10, now).with_phase(TaskPhase::Execution);
            vec![capability, execution]
        }
        DispatchMode::Deep => {
            let capability = Task::new(&outcome.id, "establish capability", 5, now).with_phase(TaskPhase::Capability);
            let first = Task::new(&outcome.id, "execute part 1", 10, now).with_phase(TaskPhase::Execution);
            let second = Task::new(&outcome.id, "execute part 2", 10, now).with_phase(TaskPhase::Execution);
            vec![capability, first, second]
        }
    }
}
