//! Outcome: a user-scoped unit of desired work

use serde::{Deserialize, Serialize};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    #[default]
    Active,
    Dormant,
    Achieved,
    Archived,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Dormant => "dormant",
            Self::Achieved => "achieved",
            Self::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

/// `capability_ready` gate for execution-phase tasks. See the Scheduler's
/// `capability_ready` transition rule for how this advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum CapabilityReadiness {
    #[default]
    NotStarted = 0,
    InProgress = 1,
    Complete = 2,
}

impl CapabilityReadiness {
    pub fn as_i64(self) -> i64 {
        self as u8 as i64
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::InProgress,
            2 => Self::Complete,
            _ => Self::NotStarted,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeIntent {
    pub summary: String,
    pub items: Vec<String>,
    pub success_criteria: Vec<String>,
}

impl Default for OutcomeIntent {
    fn default() -> Self {
        Self {
            summary: String::new(),
            items: Vec::new(),
            success_criteria: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignDoc {
    pub approach: String,
    pub version: u32,
}

impl Default for DesignDoc {
    fn default() -> Self {
        Self {
            approach: String::new(),
            version: 1,
        }
    }
}

/// Git/isolation and save-target configuration, opaque to the core - the
/// value is passed through to worker setup untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeConfig {
    pub git: serde_json::Value,
    pub save_target: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub name: String,
    pub brief: String,
    pub intent: OutcomeIntent,
    pub design_doc: DesignDoc,
    pub status: OutcomeStatus,
    pub capability_ready: CapabilityReadiness,
    pub parent_id: Option<String>,
    pub depth: u32,
    pub is_ongoing: bool,
    pub config: OutcomeConfig,
    /// Per-outcome opt-in: the Supervisor auto-answers stale escalations.
    pub auto_resolve: bool,
    /// Per-outcome override of `OUTCOME_COST_CAP_USD`.
    pub cost_cap_usd: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Outcome {
    pub fn new(name: impl Into<String>, brief: impl Into<String>, now_ms: i64) -> Self {
        let name = name.into();
        Self {
            id: generate_id("out", &name),
            name,
            brief: brief.into(),
            intent: OutcomeIntent::default(),
            design_doc: DesignDoc::default(),
            status: OutcomeStatus::Active,
            capability_ready: CapabilityReadiness::NotStarted,
            parent_id: None,
            depth: 0,
            is_ongoing: false,
            config: OutcomeConfig::default(),
            auto_resolve: false,
            cost_cap_usd: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>, parent_depth: u32) -> Self {
        self.parent_id = Some(parent_id.into());
        self.depth = parent_depth + 1;
        self
    }

    pub fn effective_cost_cap(&self, global_default: f64) -> f64 {
        self.cost_cap_usd.unwrap_or(global_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_outcome_is_active_and_not_capability_ready() {
        let o = Outcome::new("Build CLI", "ship a CLI tool", 1000);
        assert_eq!(o.status, OutcomeStatus::Active);
        assert_eq!(o.capability_ready, CapabilityReadiness::NotStarted);
        assert_eq!(o.depth, 0);
        assert!(o.id.contains("-out-"));
    }

    #[test]
    fn with_parent_sets_depth() {
        let parent = Outcome::new("Parent", "", 1000);
        let child = Outcome::new("Child", "", 1000).with_parent(parent.id.clone(), parent.depth);
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_id, Some(parent.id));
    }

    #[test]
    fn effective_cost_cap_falls_back_to_global() {
        let mut o = Outcome::new("x", "", 1000);
        assert_eq!(o.effective_cost_cap(5.0), 5.0);
        o.cost_cap_usd = Some(20.0);
        assert_eq!(o.effective_cost_cap(5.0), 20.0);
    }
}
