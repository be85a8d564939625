//! Escalation: a user-blocking question raised by HOMЯ

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    #[default]
    Pending,
    Answered,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    UnclearRequirement,
    ConflictingInfo,
    MissingContext,
    ScopeAmbiguity,
    TechnicalDecision,
    PriorityConflict,
    DependencyUnclear,
    SuccessCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationTrigger {
    pub r#type: TriggerType,
    pub task_id: String,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationOption {
    pub id: String,
    pub label: String,
    pub description: String,
    pub implications: String,
    /// 0.0-1.0. The Supervisor's auto-resolve mode answers with the
    /// highest-confidence option, breaking ties lexicographically on `id`.
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationQuestion {
    pub text: String,
    pub context: String,
    pub options: Vec<EscalationOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationAnswer {
    pub selected_option: String,
    pub additional_context: String,
    pub answered_at: i64,
    pub auto_resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: String,
    pub outcome_id: String,
    pub status: EscalationStatus,
    pub trigger: EscalationTrigger,
    pub question: EscalationQuestion,
    pub answer: Option<EscalationAnswer>,
    pub affected_tasks: HashSet<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Escalation {
    pub fn new(outcome_id: impl Into<String>, trigger: EscalationTrigger, question: EscalationQuestion, affected_tasks: HashSet<String>, now_ms: i64) -> Self {
        Self {
            id: generate_id("esc", &question.text),
            outcome_id: outcome_id.into(),
            status: EscalationStatus::Pending,
            trigger,
            question,
            answer: None,
            affected_tasks,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Highest-confidence option, tie-broken lexicographically ascending
    /// on option id (the Open Question decision for auto-resolve).
    pub fn best_option(&self) -> Option<&EscalationOption> {
        let mut best: Option<&EscalationOption> = None;
        for opt in &self.question.options {
            best = match best {
                None => Some(opt),
                Some(current) if opt.confidence > current.confidence => Some(opt),
                Some(current) if opt.confidence == current.confidence && opt.id < current.id => Some(opt),
                Some(current) => Some(current),
            };
        }
        best
    }

    pub fn is_pending(&self) -> bool {
        self.status == EscalationStatus::Pending
    }
}
