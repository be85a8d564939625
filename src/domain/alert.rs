//! Alert: a Supervisor-raised signal of fleet health degradation

use serde::{Deserialize, Serialize};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    StuckWorker,
    CostOverrun,
    IterationLoop,
    RepeatedFailure,
    NoProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTargetKind {
    Worker,
    Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub r#type: AlertType,
    pub severity: AlertSeverity,
    pub target_kind: AlertTargetKind,
    pub target_id: String,
    pub message: String,
    pub active: bool,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

impl Alert {
    pub fn new(r#type: AlertType, severity: AlertSeverity, target_kind: AlertTargetKind, target_id: impl Into<String>, message: impl Into<String>, now_ms: i64) -> Self {
        let target_id = target_id.into();
        Self {
            id: generate_id("alert", &target_id),
            r#type,
            severity,
            target_kind,
            target_id,
            message: message.into(),
            active: true,
            created_at: now_ms,
            resolved_at: None,
        }
    }

    pub fn resolve(&mut self, now_ms: i64) {
        self.active = false;
        self.resolved_at = Some(now_ms);
    }
}
