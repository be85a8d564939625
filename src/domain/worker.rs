//! Worker: a long-lived process that iteratively claims and advances Tasks

use serde::{Deserialize, Serialize};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub outcome_id: String,
    pub name: String,
    pub status: WorkerStatus,
    pub current_task_id: Option<String>,
    pub iteration: u32,
    pub last_heartbeat: i64,
    pub cost: f64,
    pub pid: Option<u32>,
    pub branch_name: Option<String>,
    pub worktree_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Worker {
    pub fn new(outcome_id: impl Into<String>, name: impl Into<String>, now_ms: i64) -> Self {
        let name = name.into();
        Self {
            id: generate_id("wrk", &name),
            outcome_id: outcome_id.into(),
            name,
            status: WorkerStatus::Idle,
            current_task_id: None,
            iteration: 0,
            last_heartbeat: now_ms,
            cost: 0.0,
            pid: None,
            branch_name: None,
            worktree_path: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// A running worker whose heartbeat is older than `heartbeat_timeout_ms`
    /// is presumed dead; the Supervisor's reclaim sweep acts on this.
    pub fn is_stale(&self, now_ms: i64, heartbeat_timeout_ms: i64) -> bool {
        self.status == WorkerStatus::Running && now_ms - self.last_heartbeat > heartbeat_timeout_ms
    }

    pub fn is_over_budget(&self, cap_usd: f64) -> bool {
        self.cost > cap_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_worker_is_idle() {
        let w = Worker::new("out_1", "worker-a", 1000);
        assert_eq!(w.status, WorkerStatus::Idle);
        assert_eq!(w.iteration, 0);
        assert!(w.id.contains("-wrk-"));
    }

    #[test]
    fn is_stale_only_when_running_and_overdue() {
        let mut w = Worker::new("out_1", "a", 1000);
        assert!(!w.is_stale(70_000, 60_000));
        w.status = WorkerStatus::Running;
        assert!(w.is_stale(70_000, 60_000));
        assert!(!w.is_stale(50_000, 60_000));
    }

    #[test]
    fn is_over_budget() {
        let mut w = Worker::new("out_1", "a", 1000);
        w.cost = 6.0;
        assert!(w.is_over_budget(5.0));
        assert!(!w.is_over_budget(10.0));
    }
}
