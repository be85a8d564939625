//! ProgressEntry: an append-only record of one Iteration's output

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// Monotonic id assigned by the store (`AUTOINCREMENT`); `0` until
    /// persisted.
    pub id: i64,
    pub outcome_id: String,
    pub worker_id: String,
    pub iteration: u32,
    pub task_id: String,
    pub content: String,
    pub full_output: String,
    pub compacted: bool,
    pub compacted_into: Option<i64>,
    pub created_at: i64,
}

impl ProgressEntry {
    pub fn new(
        outcome_id: impl Into<String>,
        worker_id: impl Into<String>,
        task_id: impl Into<String>,
        iteration: u32,
        content: impl Into<String>,
        full_output: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            id: 0,
            outcome_id: outcome_id.into(),
            worker_id: worker_id.into(),
            iteration,
            task_id: task_id.into(),
            content: content.into(),
            full_output: full_output.into(),
            compacted: false,
            compacted_into: None,
            created_at: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_is_uncompacted() {
        let e = ProgressEntry::new("out_1", "wrk_1", "task_1", 1, "did x", "raw", 1000);
        assert!(!e.compacted);
        assert!(e.compacted_into.is_none());
    }
}
