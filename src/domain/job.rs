//! Job: a background-queue unit of work

use serde::{Deserialize, Serialize};

use super::id::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    RetroAnalyze,
    ProposalGenerate,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RetroAnalyze => "retro_analyze",
            Self::ProposalGenerate => "proposal_generate",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub outcome_id: Option<String>,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Handler input, e.g. a `proposal_generate` job's source clusters.
    pub payload: Option<serde_json::Value>,
    pub progress_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Job {
    pub fn new(job_type: JobType, outcome_id: Option<String>, now_ms: i64) -> Self {
        Self {
            id: generate_id("job", &job_type.to_string()),
            outcome_id,
            job_type,
            status: JobStatus::Pending,
            payload: None,
            progress_message: None,
            result: None,
            error: None,
            created_at: now_ms,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_pending() {
        let j = Job::new(JobType::RetroAnalyze, Some("out_1".into()), 1000);
        assert_eq!(j.status, JobStatus::Pending);
        assert!(j.id.contains("-job-"));
    }
}
