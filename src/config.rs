//! Digital Twin configuration: env vars layered over an optional YAML file

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration, loaded from an optional YAML file and then
/// overridden field-by-field by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory the embedded store's data file lives under.
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,

    /// Address the HTTP surface binds to.
    #[serde(rename = "bind-addr")]
    pub bind_addr: String,

    /// Worker heartbeat age past which the Supervisor reclaims its task.
    #[serde(rename = "heartbeat-timeout-ms")]
    pub heartbeat_timeout_ms: i64,

    /// How often the Supervisor sweep runs.
    #[serde(rename = "supervisor-interval-ms")]
    pub supervisor_interval_ms: u64,

    /// Uncompacted progress entries per worker before the Iteration
    /// Driver folds them into a summary.
    #[serde(rename = "compaction-threshold")]
    pub compaction_threshold: usize,

    /// Ceiling on `NeedsMore` attempts before a task is failed outright.
    #[serde(rename = "max-iterations-per-task")]
    pub max_iterations_per_task: u32,

    /// Default per-outcome cost cap, overridable per-outcome.
    #[serde(rename = "outcome-cost-cap-usd")]
    pub outcome_cost_cap_usd: f64,

    /// Command the Iteration Driver invokes as the agent, e.g. `claude`.
    #[serde(rename = "agent-command")]
    pub agent_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./.data"),
            bind_addr: "127.0.0.1:3000".to_string(),
            heartbeat_timeout_ms: 60_000,
            supervisor_interval_ms: 30_000,
            compaction_threshold: 30,
            max_iterations_per_task: 20,
            outcome_cost_cap_usd: 10.0,
            agent_command: "claude".to_string(),
        }
    }
}

impl Config {
    /// Loads from an explicit path, `.digitaltwin.yml`, or
    /// `~/.config/digitaltwin/digitaltwin.yml` in that order, then
    /// applies environment variable overrides on top.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()))?
        } else {
            Self::load_from_fallback_chain()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_fallback_chain() -> Self {
        let local_config = PathBuf::from(".digitaltwin.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Failed to load config from {}: {}", local_config.display(), e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("digitaltwin").join("digitaltwin.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Failed to load config from {}: {}", user_config.display(), e),
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Self::default()
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = env_parsed::<i64>("HEARTBEAT_TIMEOUT_MS") {
            self.heartbeat_timeout_ms = v;
        }
        if let Some(v) = env_parsed::<u64>("SUPERVISOR_INTERVAL_MS") {
            self.supervisor_interval_ms = v;
        }
        if let Some(v) = env_parsed::<usize>("COMPACTION_THRESHOLD") {
            self.compaction_threshold = v;
        }
        if let Some(v) = env_parsed::<u32>("MAX_ITERATIONS_PER_TASK") {
            self.max_iterations_per_task = v;
        }
        if let Some(v) = env_parsed::<f64>("OUTCOME_COST_CAP_USD") {
            self.outcome_cost_cap_usd = v;
        }
        if let Ok(v) = std::env::var("AGENT_COMMAND") {
            self.agent_command = v;
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.max_iterations_per_task, 20);
        assert_eq!(config.agent_command, "claude");
    }

    #[test]
    fn deserialize_partial_yaml_uses_defaults_for_rest() {
        let yaml = r#"
agent-command: "my-agent"
max-iterations-per-task: 5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.agent_command, "my-agent");
        assert_eq!(config.max_iterations_per_task, 5);
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
    }

    #[test]
    fn env_override_wins_over_file_value() {
        // SAFETY: test-only, single-threaded within this test's scope.
        unsafe { std::env::set_var("AGENT_COMMAND", "override-agent") };
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.agent_command, "override-agent");
        unsafe { std::env::remove_var("AGENT_COMMAND") };
    }
}
