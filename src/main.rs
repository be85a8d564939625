//! Digital Twin - personal AI-agent orchestration server
//!
//! CLI entry point: manages the daemon process and its supervisor sweep
//! loop. The HTTP surface itself (`api::dispatch`) is route glue for
//! whatever process embeds this crate as a library - this binary only
//! runs the background orchestration loop.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{error, info};

use digitaltwin::clock::RealClock;
use digitaltwin::cli::{Cli, Command, OutputFormat};
use digitaltwin::config::Config;
use digitaltwin::daemon::DaemonManager;
use digitaltwin::store::Store;
use digitaltwin::supervisor::{Supervisor, SupervisorConfig};

const EXIT_FATAL_INIT: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("digitaltwin").join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Logging initialized");
    Ok(())
}

fn main() {
    if let Err(e) = setup_logging() {
        eprintln!("Failed to setup logging: {e:#}");
        std::process::exit(EXIT_FATAL_INIT);
    }

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {e:#}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    match run(cli, config) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("Fatal error: {e:#}");
            std::process::exit(EXIT_FATAL_INIT);
        }
    }
}

fn run(cli: Cli, config: Config) -> Result<()> {
    let daemon = DaemonManager::new();

    match cli.command {
        None | Some(Command::Status { format: OutputFormat::Text }) => print_status(&daemon),
        Some(Command::Status { format: OutputFormat::Json }) => print_status_json(&daemon),
        Some(Command::Start { foreground }) => {
            if foreground {
                run_daemon(config)?;
            } else {
                let pid = daemon.start()?;
                println!("Daemon started with PID {pid}");
            }
        }
        Some(Command::Stop) => {
            daemon.stop()?;
            println!("Daemon stopped");
        }
        Some(Command::Logs { follow, lines }) => print_logs(follow, lines)?,
        Some(Command::RunDaemon) => {
            daemon.register_self()?;
            run_daemon(config)?;
        }
    }

    Ok(())
}

fn print_status(daemon: &DaemonManager) {
    let status = daemon.status();
    if status.running {
        println!("digitaltwin is running (pid {})", status.pid.unwrap());
    } else {
        println!("digitaltwin is not running");
    }
}

fn print_status_json(daemon: &DaemonManager) {
    let status = daemon.status();
    let json = serde_json::json!({ "running": status.running, "pid": status.pid });
    println!("{json}");
}

fn print_logs(follow: bool, lines: usize) -> Result<()> {
    let log_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("digitaltwin").join("logs");
    let log_file = log_dir.join("digitaltwin.log");

    if !log_file.exists() {
        println!("No log file at {}", log_file.display());
        return Ok(());
    }

    let content = fs::read_to_string(&log_file).context("Failed to read log file")?;
    for line in content.lines().rev().take(lines).collect::<Vec<_>>().into_iter().rev() {
        println!("{line}");
    }

    if follow {
        println!("(follow mode not supported by this binary; use `tail -f {}`)", log_file.display());
    }

    Ok(())
}

/// Runs until terminated: periodic Supervisor sweeps plus the Job Queue's
/// poll loop. Starting/pausing/resuming Workers and accepting dispatch
/// requests happens through `api::dispatch`, called by whatever process
/// embeds this as a library - this loop only keeps background state
/// (reclaim, alerts, retro jobs) converging while nothing else is.
fn run_daemon(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<()> {
    fs::create_dir_all(&config.state_dir).context("Failed to create state directory")?;
    let db_path = config.state_dir.join("digitaltwin.db");
    let store = Store::open(&db_path).context("Failed to open store")?;
    let clock = RealClock;

    info!(state_dir = %config.state_dir.display(), bind_addr = %config.bind_addr, "Digital Twin daemon started");

    let supervisor_config = SupervisorConfig { default_cost_cap_usd: config.outcome_cost_cap_usd, heartbeat_timeout_ms: config.heartbeat_timeout_ms, ..SupervisorConfig::default() };

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(config.supervisor_interval_ms)) => {
                let supervisor = Supervisor::new(&store, &clock, supervisor_config.clone());
                match supervisor.sweep() {
                    Ok(report) => {
                        if report.alerts_raised > 0 || !report.reclaimed_tasks.is_empty() {
                            info!(?report, "Supervisor sweep completed");
                        }
                    }
                    Err(e) => error!("Supervisor sweep failed: {e}"),
                }

                if let Some(job) = digitaltwin::jobs::claim_next(&store, &clock).context("Failed to claim job")? {
                    let job_id = job.id.clone();
                    match digitaltwin::jobs::run_one(&store, &clock, job) {
                        Ok(finished) => info!(job_id, status = ?finished.status, "Job finished"),
                        Err(e) => error!(job_id, "Job run failed: {e}"),
                    }
                }
            }
        }
    }

    Ok(())
}
