//! HOMЯ Observer: extracts discoveries from worker output, raises
//! escalations, injects context into downstream tasks
//!
//! Input is `(outcomeId, taskId, rawOutput, currentContext)`; in this
//! crate `rawOutput` carries the agent's `structured` payload (§6's agent
//! contract), since per the "free-form LLM parsing" design note the
//! driver never tries to extract structure from prose itself - the agent
//! is the one that emits a small structured signal, HOMЯ only interprets
//! it. Escalation creation happens inside one [`Store::transaction`],
//! which is what gives the ordering guarantee against the Scheduler: once
//! that transaction commits, no claim issued afterward can see the
//! affected tasks as ready.

use std::collections::HashSet;

use serde::Deserialize;

use crate::clock::Clock;
use crate::domain::{
    ContextInjection, Discovery, DiscoveryType, Escalation, EscalationOption, EscalationQuestion, EscalationTrigger, Observation, Task, TriggerType, generate_id,
};
use crate::error::EngineError;
use crate::store::{self, Store};

pub struct HomrInput {
    pub outcome_id: String,
    pub task_id: String,
    pub worker_id: String,
    pub iteration: u32,
    pub structured: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
struct StructuredSignal {
    #[serde(default)]
    discoveries: Vec<DiscoverySignal>,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    next_steps: Vec<String>,
    #[serde(default)]
    escalate: Option<EscalateSignal>,
    #[serde(default)]
    inject: Option<InjectSignal>,
}

#[derive(Debug, Deserialize)]
struct DiscoverySignal {
    r#type: DiscoveryType,
    content: String,
}

#[derive(Debug, Deserialize)]
struct EscalateSignal {
    trigger_type: TriggerType,
    question: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    options: Vec<EscalationOptionSignal>,
}

#[derive(Debug, Deserialize)]
struct EscalationOptionSignal {
    id: String,
    label: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    implications: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct InjectSignal {
    task_id: String,
    content: String,
}

#[derive(Debug, Default)]
pub struct HomrOutcome {
    pub discoveries_recorded: usize,
    pub escalation: Option<Escalation>,
    pub injection: Option<ContextInjection>,
}

/// Tasks that depend on `root`, directly or transitively (via `depends_on`).
fn downstream_of(tasks: &[Task], root: &str) -> HashSet<String> {
    let mut found = HashSet::new();
    let mut frontier = vec![root.to_string()];
    while let Some(current) = frontier.pop() {
        for t in tasks {
            if t.depends_on.contains(&current) && found.insert(t.id.clone()) {
                frontier.push(t.id.clone());
            }
        }
    }
    found
}

/// Observes one iteration's output, persisting discoveries, an
/// Observation row, and - optionally - one Escalation and one
/// ContextInjection.
pub fn observe(store: &Store, clock: &dyn Clock, input: HomrInput) -> Result<HomrOutcome, EngineError> {
    let now = clock.now_ms();
    let signal: StructuredSignal = input.structured.as_ref().and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default();

    let mut outcome = HomrOutcome::default();

    for d in &signal.discoveries {
        let discovery = Discovery::new(&input.outcome_id, d.r#type, &d.content, &input.task_id, now);
        store.transaction(|tx| store::insert_discovery(tx, &discovery))?;
        outcome.discoveries_recorded += 1;
    }

    let observation = Observation {
        id: generate_id("obs", &input.task_id),
        outcome_id: input.outcome_id.clone(),
        task_id: input.task_id.clone(),
        worker_id: input.worker_id.clone(),
        iteration: input.iteration,
        concerns: signal.concerns.clone(),
        next_steps: signal.next_steps.clone(),
        created_at: now,
    };
    store.transaction(|tx| store::insert_observation(tx, &observation))?;

    if let Some(esc) = &signal.escalate {
        let tasks = store.with_connection(|c| store::list_tasks_for_outcome(c, &input.outcome_id))?;
        let mut affected = downstream_of(&tasks, &input.task_id);
        affected.insert(input.task_id.clone());

        let escalation = Escalation::new(
            &input.outcome_id,
            EscalationTrigger {
                r#type: esc.trigger_type,
                task_id: input.task_id.clone(),
                evidence: esc.evidence.clone(),
            },
            EscalationQuestion {
                text: esc.question.clone(),
                context: esc.context.clone(),
                options: esc
                    .options
                    .iter()
                    .map(|o| EscalationOption {
                        id: o.id.clone(),
                        label: o.label.clone(),
                        description: o.description.clone(),
                        implications: o.implications.clone(),
                        confidence: o.confidence,
                    })
                    .collect(),
            },
            affected,
            now,
        );
        store.transaction(|tx| store::upsert_escalation(tx, &escalation))?;
        outcome.escalation = Some(escalation);
    }

    if let Some(inj) = &signal.inject {
        let injection = ContextInjection::new(&input.outcome_id, &inj.task_id, &inj.content, now);
        store.transaction(|tx| store::insert_injection(tx, &injection))?;
        outcome.injection = Some(injection);
    }

    Ok(outcome)
}
