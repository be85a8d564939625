//! Domain types for the orchestration core
//!
//! Every entity below is uniquely identified, carries millisecond-since-epoch
//! timestamps, and closes its enumerations - see each submodule for the
//! lifecycle it encodes. `id` carries ID generation/parsing shared by every
//! entity kind.

mod alert;
mod escalation;
mod homr;
mod id;
mod job;
mod outcome;
mod progress;
mod review;
mod task;
mod worker;

pub use alert::{Alert, AlertSeverity, AlertTargetKind, AlertType};
pub use escalation::{Escalation, EscalationAnswer, EscalationOption, EscalationQuestion, EscalationStatus, EscalationTrigger, TriggerType};
pub use homr::{ContextConstraint, ContextInjection, ContextStore, Decision, Discovery, DiscoveryType, Observation};
pub use id::{DomainId, IdResolver, generate_id};
pub use job::{Job, JobStatus, JobType};
pub use outcome::{CapabilityReadiness, Outcome, OutcomeStatus};
pub use progress::ProgressEntry;
pub use review::{ConvergenceStatus, ReviewCycle, evaluate as review_evaluate};
pub use task::{Task, TaskPhase, TaskStatus};
pub use worker::{Worker, WorkerStatus};
