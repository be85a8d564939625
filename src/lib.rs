//! Digital Twin - personal AI-agent orchestration server
//!
//! Outcomes decompose into Tasks; Workers iteratively claim and advance
//! Tasks; the HOMЯ engine observes worker output and escalates what it
//! can't resolve on its own. Every entity lives in one embedded SQLite
//! store ([`store`]), so the whole daemon can restart cold and pick up
//! exactly where it left off.
//!
//! # Modules
//!
//! - [`clock`] - injectable time source, real or fixed (tests)
//! - [`error`] - the engine-wide error taxonomy
//! - [`store`] - embedded ACID store: schema, migrations, per-entity queries
//! - [`domain`] - entity types: Outcome, Task, Worker, Escalation, Alert, Job, ...
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface
//! - [`scheduler`] - `ClaimNextTask`/`ReleaseClaim`/reclaim sweep
//! - [`worker_manager`] - `StartWorker`/`PauseWorker`/`ResumeWorker`/`SendIntervention`/`Heartbeat`
//! - [`iteration`] - the per-worker iteration loop
//! - [`homr`] - the HOMЯ observer: discovery extraction and escalation raising
//! - [`supervisor`] - fleet sweep, alert lifecycle, auto-resolve
//! - [`convergence`] - the review-cycle convergence evaluator
//! - [`jobs`] - background job queue (retro-analyze, proposal-generate)
//! - [`dispatcher`] - inbound event classification and outcome creation
//! - [`subprocess`] - the `{cmd,args,cwd,env,timeoutMs}` contract external tools run under
//! - [`agent`] - the agent invocation contract (subprocess-backed)
//! - [`api`] - typed request/response types and `dispatch()` for the HTTP surface
//!
//! See `DESIGN.md` for the grounding ledger behind each of the above.

#![allow(dead_code)]

pub mod agent;
pub mod api;
pub mod cli;
pub mod clock;
pub mod config;
pub mod convergence;
pub mod daemon;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod homr;
pub mod iteration;
pub mod jobs;
pub mod scheduler;
pub mod store;
pub mod subprocess;
pub mod supervisor;
pub mod worker_manager;

pub use clock::{Clock, FixedClock, RealClock};
pub use config::Config;
pub use domain::{
    Alert, AlertSeverity, AlertTargetKind, AlertType, ContextStore, ConvergenceStatus, DomainId, Escalation, EscalationStatus, Job, JobStatus, JobType, Outcome, OutcomeStatus,
    ProgressEntry, ReviewCycle, Task, TaskStatus, Worker, WorkerStatus,
};
pub use error::EngineError;
pub use store::{Store, StoreError};
