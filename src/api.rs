//! HTTP surface: typed request/response types and a pure [`dispatch`]
//! function
//!
//! §1 scopes "HTTP route glue" out - the actual listener, routing, and
//! JSON (de)serialization at the wire are someone else's concern. What
//! belongs here is everything behind that boundary: one `Request` enum
//! per documented endpoint, one `Response` enum of outcomes, and a single
//! `dispatch` that turns one into the other against the store. No crate
//! in this workspace's stack provides an HTTP server, and the teacher
//! never bound one either - wiring `axum`/`hyper` in here would be a new,
//! ungrounded dependency for a concern explicitly called external.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::domain::{Escalation, EscalationAnswer, EscalationStatus, Job, JobType, Outcome, Task, Worker};
use crate::dispatcher::{self, DispatchMode};
use crate::error::EngineError;
use crate::jobs;
use crate::scheduler::{ReleaseReason, Scheduler};
use crate::store::{self, Store};
use crate::supervisor::{Supervisor, SupervisorConfig, SweepReport};
use crate::worker_manager::WorkerManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOutcomeRequest {
    pub name: String,
    pub brief: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub input: String,
    pub mode_hint: Option<String>,
    pub skip_matching: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchResultType {
    Quick,
    Research,
    Deep,
    Outcome,
    MatchFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub r#type: DispatchResultType,
    pub outcome_id: Option<String>,
    pub matched_outcomes: Vec<dispatcher::OutcomeMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEscalationRequest {
    pub selected_option: String,
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendInterventionRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatusResponse {
    pub last_sweep: Option<SweepReportView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReportView {
    pub reclaimed_tasks: Vec<String>,
    pub alerts_raised: usize,
    pub alerts_resolved: usize,
    pub escalations_auto_resolved: usize,
}

impl From<&SweepReport> for SweepReportView {
    fn from(r: &SweepReport) -> Self {
        Self {
            reclaimed_tasks: r.reclaimed_tasks.clone(),
            alerts_raised: r.alerts_raised,
            alerts_resolved: r.alerts_resolved,
            escalations_auto_resolved: r.escalations_auto_resolved,
        }
    }
}

/// One variant per documented endpoint this crate implements behind the
/// HTTP boundary; route glue on top of this is out of scope.
#[derive(Debug, Clone)]
pub enum Request {
    ListOutcomes,
    CreateOutcome(CreateOutcomeRequest),
    GetOutcome { id: String },
    ListTasks { outcome_id: String },
    StartWorker { outcome_id: String, name: String, parallel: bool },
    GetWorker { id: String },
    PauseWorker { id: String },
    SendIntervention { worker_id: String, req: SendInterventionRequest },
    GetHomrContext { outcome_id: String },
    AnswerEscalation { outcome_id: String, escalation_id: String, req: AnswerEscalationRequest },
    DismissEscalation { outcome_id: String, escalation_id: String },
    AutoResolve { outcome_id: String },
    Dispatch(DispatchRequest),
    SupervisorStatus,
    AnalyzeImprovements { outcome_id: Option<String> },
}

#[derive(Debug, Clone)]
pub enum Response {
    Outcomes(Vec<Outcome>),
    Outcome(Outcome),
    Tasks(Vec<Task>),
    Worker(Worker),
    Context(crate::domain::ContextStore),
    Escalation(Escalation),
    Dispatch(DispatchResponse),
    Supervisor(SupervisorStatusResponse),
    Job(Job),
    Ok,
}

/// `{"error": string}` plus an HTTP status, per §6/§7's error shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&EngineError> for ErrorBody {
    fn from(e: &EngineError) -> Self {
        Self { error: e.to_string() }
    }
}

/// Executes one `Request` against the store, returning the `Response` or
/// the `EngineError` whose `http_status()` the route glue maps to a
/// status code.
pub fn dispatch(store: &Store, clock: &dyn Clock, agent_command: &str, req: Request) -> Result<Response, EngineError> {
    match req {
        Request::ListOutcomes => Ok(Response::Outcomes(store.with_connection(|c| store::list_outcomes(c, None))?)),

        Request::CreateOutcome(body) => {
            let mode = dispatcher::classify_mode(&body.brief);
            let outcome = dispatcher::create_outcome(store, clock, &body.name, &body.brief, mode, body.parent_id.as_deref())?;
            Ok(Response::Outcome(outcome))
        }

        Request::GetOutcome { id } => {
            let outcome = store.with_connection(|c| store::get_outcome(c, &id))?.ok_or(EngineError::NotFound(id))?;
            Ok(Response::Outcome(outcome))
        }

        Request::ListTasks { outcome_id } => Ok(Response::Tasks(store.with_connection(|c| store::list_tasks_for_outcome(c, &outcome_id))?)),

        Request::StartWorker { outcome_id, name, parallel } => {
            let manager = WorkerManager::new(store, clock);
            let worker = manager.start_worker(&outcome_id, &name, parallel)?;
            Ok(Response::Worker(worker))
        }

        Request::GetWorker { id } => {
            let worker = store.with_connection(|c| store::get_worker(c, &id))?.ok_or(EngineError::NotFound(id))?;
            Ok(Response::Worker(worker))
        }

        Request::PauseWorker { id } => {
            let manager = WorkerManager::new(store, clock);
            manager.pause_worker(&id)?;
            Ok(Response::Ok)
        }

        Request::SendIntervention { worker_id, req } => {
            let manager = WorkerManager::new(store, clock);
            manager.send_intervention(&worker_id, req.message)?;
            Ok(Response::Ok)
        }

        Request::GetHomrContext { outcome_id } => Ok(Response::Context(store.with_connection(|c| store::load_context(c, &outcome_id))?)),

        Request::AnswerEscalation { outcome_id: _, escalation_id, req } => {
            let now = clock.now_ms();
            let mut escalation = store.with_connection(|c| store::get_escalation(c, &escalation_id))?.ok_or_else(|| EngineError::NotFound(escalation_id.clone()))?;
            escalation.status = EscalationStatus::Answered;
            escalation.answer = Some(EscalationAnswer {
                selected_option: req.selected_option,
                additional_context: req.additional_context.unwrap_or_default(),
                answered_at: now,
                auto_resolved: false,
            });
            escalation.updated_at = now;
            store.transaction(|tx| store::upsert_escalation(tx, &escalation))?;
            Ok(Response::Escalation(escalation))
        }

        Request::DismissEscalation { outcome_id: _, escalation_id } => {
            let now = clock.now_ms();
            let mut escalation = store.with_connection(|c| store::get_escalation(c, &escalation_id))?.ok_or_else(|| EngineError::NotFound(escalation_id.clone()))?;
            escalation.status = EscalationStatus::Dismissed;
            escalation.updated_at = now;
            store.transaction(|tx| store::upsert_escalation(tx, &escalation))?;
            Ok(Response::Escalation(escalation))
        }

        Request::AutoResolve { outcome_id } => {
            let mut outcome = store.with_connection(|c| store::get_outcome(c, &outcome_id))?.ok_or_else(|| EngineError::NotFound(outcome_id.clone()))?;
            outcome.auto_resolve = true;
            outcome.updated_at = clock.now_ms();
            store.transaction(|tx| store::upsert_outcome(tx, &outcome))?;
            let supervisor = Supervisor::new(store, clock, SupervisorConfig::default());
            supervisor.sweep()?;
            Ok(Response::Outcome(outcome))
        }

        Request::Dispatch(body) => dispatch_request(store, clock, body),

        Request::SupervisorStatus => {
            let supervisor = Supervisor::new(store, clock, SupervisorConfig::default());
            let report = supervisor.sweep()?;
            Ok(Response::Supervisor(SupervisorStatusResponse { last_sweep: Some(SweepReportView::from(&report)) }))
        }

        Request::AnalyzeImprovements { outcome_id } => {
            let job = jobs::enqueue(store, clock, JobType::RetroAnalyze, outcome_id, None)?;
            Ok(Response::Job(job))
        }
    }
    .map(|resp| {
        let _ = agent_command;
        resp
    })
}

fn dispatch_request(store: &Store, clock: &dyn Clock, body: DispatchRequest) -> Result<Response, EngineError> {
    if !body.skip_matching {
        let matches = dispatcher::match_phase(store, &body.input, 5)?;
        if matches.iter().any(|m| m.score > 0.5) {
            return Ok(Response::Dispatch(DispatchResponse { r#type: DispatchResultType::MatchFound, outcome_id: None, matched_outcomes: matches }));
        }
    }

    let mode = match body.mode_hint.as_deref() {
        Some("quick") => DispatchMode::Quick,
        Some("research") => DispatchMode::Research,
        Some("deep") => DispatchMode::Deep,
        _ => dispatcher::classify_mode(&body.input),
    };

    let outcome = dispatcher::create_outcome(store, clock, &body.input, &body.input, mode, None)?;
    let result_type = match mode {
        DispatchMode::Quick => DispatchResultType::Quick,
        DispatchMode::Research => DispatchResultType::Research,
        DispatchMode::Deep => DispatchResultType::Deep,
    };

    Ok(Response::Dispatch(DispatchResponse { r#type: result_type, outcome_id: Some(outcome.id), matched_outcomes: Vec::new() }))
}

/// `ReleaseClaim` isn't directly on the HTTP surface, but PATCH
/// `/tasks/{id}` with a terminal status maps onto it.
pub fn patch_task_status(store: &Store, clock: &dyn Clock, task_id: &str, reason: ReleaseReason) -> Result<Task, EngineError> {
    Scheduler::new(store, clock).release_claim(task_id, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[test]
    fn create_outcome_then_get_roundtrips() {
        let store = Store::open_in_memory().unwrap();
        let clock = FixedClock::new(1000);

        let created = match dispatch(&store, &clock, "", Request::CreateOutcome(CreateOutcomeRequest { name: "x".into(), brief: "ship it".into(), parent_id: None })).unwrap() {
            Response::Outcome(o) => o,
            other => panic!("unexpected response: {other:?}"),
        };

        let fetched = match dispatch(&store, &clock, "", Request::GetOutcome { id: created.id.clone() }).unwrap() {
            Response::Outcome(o) => o,
            other => panic!("unexpected response: {other:?}"),
        };
        assert_eq!(fetched.id, created.id);
    }

    #[test]
    fn dispatch_endpoint_creates_outcome_when_no_match() {
        let store = Store::open_in_memory().unwrap();
        let clock = FixedClock::new(1000);

        let response = dispatch(&store, &clock, "", Request::Dispatch(DispatchRequest { input: "fix the typo in the README".into(), mode_hint: None, skip_matching: true })).unwrap();
        match response {
            Response::Dispatch(d) => {
                assert_eq!(d.r#type, DispatchResultType::Quick);
                assert!(d.outcome_id.is_some());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn unknown_id_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let clock = FixedClock::new(1000);
        let result = dispatch(&store, &clock, "", Request::GetOutcome { id: "missing".into() });
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }
}
