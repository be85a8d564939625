//! Task: an atomic unit of work within an Outcome

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    #[default]
    Capability,
    Execution,
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Capability => "capability",
            Self::Execution => "execution",
        };
        write!(f, "{s}")
    }
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub outcome_id: String,
    pub title: String,
    pub description: String,
    /// Lower value = higher priority.
    pub priority: i32,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub phase: TaskPhase,
    pub depends_on: HashSet<String>,
    pub from_review: bool,
    pub review_cycle: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn new(outcome_id: impl Into<String>, title: impl Into<String>, priority: i32, now_ms: i64) -> Self {
        let title = title.into();
        Self {
            id: generate_id("task", &title),
            outcome_id: outcome_id.into(),
            title,
            description: String::new(),
            priority,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            claimed_by: None,
            claimed_at: None,
            completed_at: None,
            phase: TaskPhase::Execution,
            depends_on: HashSet::new(),
            from_review: false,
            review_cycle: 0,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn with_phase(mut self, phase: TaskPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        self.depends_on.insert(task_id.into());
        self
    }

    /// `ready` per the Scheduler's candidate selection: pending and every
    /// dependency completed.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.status == TaskStatus::Pending && self.depends_on.iter().all(|d| completed.contains(d))
    }

    pub fn score(&self) -> (i32, i64, String) {
        (self.priority, self.created_at, self.id.clone())
    }
}
