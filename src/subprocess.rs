//! Subprocess contract: `{cmd, args, cwd, env, timeoutMs} -> {exit, stdout, stderr}`
//!
//! External collaborators (`git`, `gh`, and whatever else the Iteration
//! Driver shells out to) are invoked through this one entry point. All
//! errors here are task-level, not process-level - a non-zero exit is a
//! normal, successful `SubprocessResult`, not an `Err`; only spawn failure
//! or a timeout produce an `Err`.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct SubprocessRequest {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub env: HashMap<String, String>,
    pub timeout_ms: u64,
}

impl SubprocessRequest {
    pub fn new(cmd: impl Into<String>, args: Vec<String>, cwd: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            cwd: cwd.into(),
            env: HashMap::new(),
            timeout_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubprocessResult {
    pub exit: i32,
    pub stdout: String,
    pub stderr: String,
}

impl SubprocessResult {
    pub fn success(&self) -> bool {
        self.exit == 0
    }
}

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("failed to spawn {0}: {1}")]
    Spawn(String, std::io::Error),

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

/// Runs `req` to completion or until `req.timeout_ms` elapses.
pub async fn run(req: &SubprocessRequest) -> Result<SubprocessResult, SubprocessError> {
    let mut command = Command::new(&req.cmd);
    command.args(&req.args).current_dir(&req.cwd);
    for (k, v) in &req.env {
        command.env(k, v);
    }

    let output = tokio::time::timeout(Duration::from_millis(req.timeout_ms), command.output())
        .await
        .map_err(|_| SubprocessError::Timeout(req.timeout_ms))?
        .map_err(|e| SubprocessError::Spawn(req.cmd.clone(), e))?;

    Ok(SubprocessResult {
        exit: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
