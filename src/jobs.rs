//! Job Queue: `retro_analyze` and `proposal_generate` background jobs
//!
//! Jobs run off the Iteration Driver's critical path - enqueueing is
//! single-flight per `(outcomeId, jobType)`, and a poll loop picks the
//! oldest pending job, runs its handler to completion, and records the
//! result or error back onto the row.

use std::collections::HashMap;

use crate::clock::Clock;
use crate::domain::{Escalation, Job, JobStatus, JobType, Outcome, TriggerType};
use crate::error::EngineError;
use crate::store::{self, Store};

/// `Enqueue(jobType, outcomeId?, payload?)`. Rejects a second in-flight
/// job of the same type for the same outcome.
pub fn enqueue(store: &Store, clock: &dyn Clock, job_type: JobType, outcome_id: Option<String>, payload: Option<serde_json::Value>) -> Result<Job, EngineError> {
    if store.with_connection(|c| store::has_inflight_job(c, outcome_id.as_deref(), job_type))? {
        return Err(EngineError::Conflict(format!("a {job_type} job is already in flight for {outcome_id:?}")));
    }

    let mut job = Job::new(job_type, outcome_id, clock.now_ms());
    if let Some(p) = payload {
        job = job.with_payload(p);
    }
    store.transaction(|tx| store::upsert_job(tx, &job))?;
    Ok(job)
}

/// Claims the oldest pending job, if any, marking it `running`.
pub fn claim_next(store: &Store, clock: &dyn Clock) -> Result<Option<Job>, EngineError> {
    let now = clock.now_ms();
    store
        .transaction(|tx| {
            let Some(mut job) = store::list_pending_jobs(tx)?.into_iter().next() else {
                return Ok(None);
            };
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            store::upsert_job(tx, &job)?;
            Ok(Some(job))
        })
        .map_err(EngineError::from)
}

fn complete(store: &Store, clock: &dyn Clock, mut job: Job, result: serde_json::Value) -> Result<Job, EngineError> {
    job.status = JobStatus::Completed;
    job.result = Some(result);
    job.completed_at = Some(clock.now_ms());
    store.transaction(|tx| store::upsert_job(tx, &job))?;
    Ok(job)
}

fn fail(store: &Store, clock: &dyn Clock, mut job: Job, error: String) -> Result<Job, EngineError> {
    job.status = JobStatus::Failed;
    job.error = Some(error);
    job.completed_at = Some(clock.now_ms());
    store.transaction(|tx| store::upsert_job(tx, &job))?;
    Ok(job)
}

/// Runs one claimed job's handler to completion.
pub fn run_one(store: &Store, clock: &dyn Clock, job: Job) -> Result<Job, EngineError> {
    let outcome_id = job.outcome_id.clone();
    let result = match job.job_type {
        JobType::RetroAnalyze => outcome_id.as_deref().ok_or_else(|| EngineError::Invalid("retro_analyze requires an outcome_id".into())).and_then(|oid| retro_analyze(store, oid)),
        JobType::ProposalGenerate => outcome_id
            .as_deref()
            .ok_or_else(|| EngineError::Invalid("proposal_generate requires an outcome_id".into()))
            .and_then(|oid| proposal_generate(store, clock, oid, job.payload.clone())),
    };

    match result {
        Ok(value) => complete(store, clock, job, value),
        Err(e) => fail(store, clock, job, e.to_string()),
    }
}

/// Clusters an outcome's pending escalations by trigger type and proposes
/// a standing decision for any cluster with repeat occurrences.
fn retro_analyze(store: &Store, outcome_id: &str) -> Result<serde_json::Value, EngineError> {
    let escalations = store.with_connection(|c| store::list_pending_escalations(c, outcome_id))?;

    let mut by_trigger: HashMap<TriggerType, Vec<&Escalation>> = HashMap::new();
    for esc in &escalations {
        by_trigger.entry(esc.trigger.r#type).or_default().push(esc);
    }

    let mut clusters = Vec::new();
    let mut proposals = Vec::new();
    for (trigger_type, members) in &by_trigger {
        clusters.push(serde_json::json!({
            "trigger_type": trigger_type,
            "count": members.len(),
            "escalation_ids": members.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
        }));
        if members.len() >= 2 {
            proposals.push(serde_json::json!({
                "trigger_type": trigger_type,
                "suggestion": format!("{} escalations share this trigger; consider recording a standing decision or constraint", members.len()),
            }));
        }
    }

    Ok(serde_json::json!({ "clusters": clusters, "proposals": proposals }))
}

/// Consumes a `retro_analyze` result's proposals and creates one child
/// outcome per proposal, each seeded with a single capability-phase task.
fn proposal_generate(store: &Store, clock: &dyn Clock, outcome_id: &str, payload: Option<serde_json::Value>) -> Result<serde_json::Value, EngineError> {
    let parent = store.with_connection(|c| store::get_outcome(c, outcome_id))?.ok_or_else(|| EngineError::NotFound(outcome_id.to_string()))?;

    let proposals = payload
        .as_ref()
        .and_then(|p| p.get("proposals"))
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut created = Vec::new();
    for proposal in &proposals {
        let suggestion = proposal.get("suggestion").and_then(|v| v.as_str()).unwrap_or("follow-up from retro analysis").to_string();
        let child = Outcome::new(&suggestion, &suggestion, clock.now_ms()).with_parent(parent.id.clone(), parent.depth);
        store.transaction(|tx| store::upsert_outcome(tx, &child))?;

        let task = crate::domain::Task::new(&child.id, "define scope", 10, clock.now_ms()).with_phase(crate::domain::TaskPhase::Capability);
        store.transaction(|tx| store::upsert_task(tx, &task))?;
        created.push(child.id);
    }

    Ok(serde_json::json!({ "outcomes_created": created }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::{EscalationQuestion, EscalationTrigger};

    fn setup() -> (Store, FixedClock) {
        (Store::open_in_memory().unwrap(), FixedClock::new(1000))
    }

    #[test]
    fn enqueue_rejects_second_inflight_job() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        enqueue(&store, &clock, JobType::RetroAnalyze, Some(outcome.id.clone()), None).unwrap();
        let result = enqueue(&store, &clock, JobType::RetroAnalyze, Some(outcome.id.clone()), None);
        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn retro_analyze_clusters_repeated_triggers() {
        let (store, clock) = setup();
        let outcome = Outcome::new("x", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        for i in 0..2 {
            let esc = Escalation::new(
                &outcome.id,
                EscalationTrigger { r#type: TriggerType::UnclearRequirement, task_id: format!("task_{i}"), evidence: vec![] },
                EscalationQuestion { text: format!("question {i}"), context: "".into(), options: vec![] },
                Default::default(),
                clock.now_ms(),
            );
            store.transaction(|tx| store::upsert_escalation(tx, &esc)).unwrap();
        }

        let job = enqueue(&store, &clock, JobType::RetroAnalyze, Some(outcome.id.clone()), None).unwrap();
        let claimed = claim_next(&store, &clock).unwrap().unwrap();
        assert_eq!(claimed.id, job.id);

        let finished = run_one(&store, &clock, claimed).unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        let result = finished.result.unwrap();
        assert_eq!(result["proposals"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn proposal_generate_creates_child_outcomes() {
        let (store, clock) = setup();
        let outcome = Outcome::new("parent", "", clock.now_ms());
        store.transaction(|tx| store::upsert_outcome(tx, &outcome)).unwrap();

        let payload = serde_json::json!({ "proposals": [{ "suggestion": "adopt a shared auth pattern" }] });
        let job = enqueue(&store, &clock, JobType::ProposalGenerate, Some(outcome.id.clone()), Some(payload)).unwrap();
        let claimed = claim_next(&store, &clock).unwrap().unwrap();
        let finished = run_one(&store, &clock, claimed).unwrap();

        assert_eq!(finished.id, job.id);
        assert_eq!(finished.status, JobStatus::Completed);
        let created = finished.result.unwrap()["outcomes_created"].as_array().unwrap().len();
        assert_eq!(created, 1);
    }
}
