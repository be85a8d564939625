//! HOMЯ ContextStore: the append-only memory the observation engine writes
//! into and the Iteration Driver reads prompts out of.

use serde::{Deserialize, Serialize};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryType {
    Pattern,
    Constraint,
    Insight,
    Blocker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub id: String,
    pub outcome_id: String,
    pub r#type: DiscoveryType,
    pub content: String,
    pub source_task_id: String,
    pub created_at: i64,
}

impl Discovery {
    pub fn new(outcome_id: impl Into<String>, r#type: DiscoveryType, content: impl Into<String>, source_task_id: impl Into<String>, now_ms: i64) -> Self {
        let content = content.into();
        Self {
            id: generate_id("disc", &content),
            outcome_id: outcome_id.into(),
            r#type,
            content,
            source_task_id: source_task_id.into(),
            created_at: now_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub outcome_id: String,
    pub content: String,
    pub made_by: String,
    pub context: String,
    pub affected_areas: Vec<String>,
    pub made_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConstraint {
    pub id: String,
    pub outcome_id: String,
    pub rule: String,
    pub reason: String,
    pub added_at: i64,
}

/// Content to prepend into a downstream task's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextInjection {
    pub id: String,
    pub outcome_id: String,
    pub task_id: String,
    pub content: String,
    pub injected_at: i64,
}

impl ContextInjection {
    pub fn new(outcome_id: impl Into<String>, task_id: impl Into<String>, content: impl Into<String>, now_ms: i64) -> Self {
        let content = content.into();
        Self {
            id: generate_id("inj", &content),
            outcome_id: outcome_id.into(),
            task_id: task_id.into(),
            content,
            injected_at: now_ms,
        }
    }
}

/// `concerns[]`/`next_steps[]` recorded from one iteration's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub outcome_id: String,
    pub task_id: String,
    pub worker_id: String,
    pub iteration: u32,
    pub concerns: Vec<String>,
    pub next_steps: Vec<String>,
    pub created_at: i64,
}

/// In-memory view over one outcome's HOMЯ context, assembled from the
/// Store's append-only tables for presentation (e.g. prompt-building,
/// `GET /outcomes/{id}/homr/context`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextStore {
    pub discoveries: Vec<Discovery>,
    pub decisions: Vec<Decision>,
    pub constraints: Vec<ContextConstraint>,
    pub injections: Vec<ContextInjection>,
}

impl ContextStore {
    /// Injections still pending for a given task.
    pub fn injections_for(&self, task_id: &str) -> Vec<&ContextInjection> {
        self.injections.iter().filter(|i| i.task_id == task_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injections_for_filters_by_task() {
        let mut ctx = ContextStore::default();
        ctx.injections.push(ContextInjection::new("out_1", "task_a", "use trait X", 1000));
        ctx.injections.push(ContextInjection::new("out_1", "task_b", "use trait Y", 1000));

        let for_a = ctx.injections_for("task_a");
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].content, "use trait X");
    }
}
