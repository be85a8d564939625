//! Agent invocation contract: one call per iteration
//!
//! `{prompt, workingDir, env, timeoutMs} -> {summary, rawOutput, cost, status, structured?}`.
//! The agent runs as an external CLI (`AGENT_COMMAND`), invoked through the
//! same [`crate::subprocess`] contract everything else shells out through.
//! Per the "free-form LLM parsing" design note: the driver never trusts the
//! bulk of the agent's output to match a schema. It only parses a small
//! structured header line; everything else is kept verbatim in
//! `raw_output`. A missing or malformed header is `status=failed`, same as
//! a non-zero exit or a timeout.

use std::collections::HashMap;

use serde::Deserialize;

use crate::subprocess::{self, SubprocessRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Done,
    NeedsMore,
    Failed,
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub working_dir: String,
    pub env: HashMap<String, String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub summary: String,
    pub raw_output: String,
    pub cost: f64,
    pub status: AgentStatus,
    pub structured: Option<serde_json::Value>,
}

impl AgentResponse {
    fn failed(raw_output: impl Into<String>) -> Self {
        Self {
            summary: String::new(),
            raw_output: raw_output.into(),
            cost: 0.0,
            status: AgentStatus::Failed,
            structured: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentHeader {
    status: AgentStatus,
    summary: String,
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    structured: Option<serde_json::Value>,
}

/// Parses the first non-blank line of `stdout` as the agent's structured
/// header. Everything is preserved in `raw_output` regardless of whether
/// this succeeds.
fn parse_header(stdout: &str) -> Option<AgentHeader> {
    let first_line = stdout.lines().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(first_line.trim()).ok()
}

/// Invokes `agent_command` via a shell, never returning `Err` - every
/// failure mode (non-zero exit, timeout, missing/malformed header) is
/// surfaced as `status=failed` with `raw_output` preserved, per the
/// agent contract's failure semantics.
pub async fn invoke(agent_command: &str, req: &AgentRequest) -> AgentResponse {
    if agent_command.trim().is_empty() {
        return AgentResponse::failed("AGENT_COMMAND is not configured");
    }

    let mut env = req.env.clone();
    env.insert("AGENT_PROMPT".to_string(), req.prompt.clone());

    let subreq = SubprocessRequest {
        cmd: "sh".to_string(),
        args: vec!["-c".to_string(), agent_command.to_string()],
        cwd: req.working_dir.clone(),
        env,
        timeout_ms: req.timeout_ms,
    };

    let result = match subprocess::run(&subreq).await {
        Ok(r) => r,
        Err(e) => return AgentResponse::failed(e.to_string()),
    };

    if !result.success() {
        return AgentResponse {
            summary: String::new(),
            raw_output: format!("{}{}", result.stdout, result.stderr),
            cost: 0.0,
            status: AgentStatus::Failed,
            structured: None,
        };
    }

    match parse_header(&result.stdout) {
        Some(header) => AgentResponse {
            summary: header.summary,
            raw_output: result.stdout,
            cost: header.cost,
            status: header.status,
            structured: header.structured,
        },
        None => AgentResponse::failed(result.stdout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(prompt: &str, cwd: &str) -> AgentRequest {
        AgentRequest {
            prompt: prompt.to_string(),
            working_dir: cwd.to_string(),
            env: HashMap::new(),
            timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn parses_done_header() {
        let cmd = r#"echo '{"status":"done","summary":"wrote the handler","cost":0.02}'"#;
        let resp = invoke(cmd, &req("do it", ".")).await;
        assert_eq!(resp.status, AgentStatus::Done);
        assert_eq!(resp.summary, "wrote the handler");
        assert_eq!(resp.cost, 0.02);
    }

    #[tokio::test]
    async fn missing_header_is_failed() {
        let resp = invoke("echo 'no header here'", &req("do it", ".")).await;
        assert_eq!(resp.status, AgentStatus::Failed);
        assert!(resp.raw_output.contains("no header here"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let resp = invoke("exit 1", &req("do it", ".")).await;
        assert_eq!(resp.status, AgentStatus::Failed);
    }

    #[tokio::test]
    async fn unconfigured_command_is_failed() {
        let resp = invoke("", &req("do it", ".")).await;
        assert_eq!(resp.status, AgentStatus::Failed);
    }
}
