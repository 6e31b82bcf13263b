// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! shepd - the shepherd fleet supervisor daemon.
//!
//! One instance per state directory owns the fleet. Besides running the
//! supervisor, the binary answers `--status` and drives `--stop` /
//! `--force-stop` against a running instance.
//!
//! Exit codes: 0 clean; 1 fatal error (port in use, lock failure, invalid
//! config); 2 another instance was asked to shut down but did not respond.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod alerts;
mod bus;
mod http;
mod instance;
mod lifecycle;
mod reconciler;
mod rpc;
mod spawner;
mod store;
mod tasks;

use clap::Parser;
use instance::{process_exists, HealthProbe, HttpProbe, InstanceRecord, ResolveMode};
use lifecycle::{Config, LifecycleError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "shepd",
    version,
    about = "shepherd - supervisor for a fleet of CLI agents"
)]
struct Cli {
    /// HTTP listen port
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Team config (agent roster)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Project registry
    #[arg(long, value_name = "PATH")]
    projects: Option<PathBuf>,

    /// State store location
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,

    /// Hostname embedded in tool-surface URLs advertised to agents
    #[arg(long = "mcp-host", default_value = "127.0.0.1")]
    mcp_host: String,

    /// Abort instead of taking over when another instance is responding
    #[arg(long)]
    no_takeover: bool,

    /// Print instance status and exit
    #[arg(long)]
    status: bool,

    /// Gracefully stop the running instance
    #[arg(long)]
    stop: bool,

    /// Immediately stop the running instance
    #[arg(long = "force-stop")]
    force_stop: bool,
}

fn main() {
    let cli = Cli::parse();
    let code = run(cli);
    std::process::exit(code);
}

fn run(cli: Cli) -> i32 {
    let state_dir = match Config::state_dir_from(cli.state.clone()) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return 1;
        }
    };

    if cli.status {
        return runtime.block_on(print_status(&state_dir));
    }
    if cli.stop || cli.force_stop {
        return runtime.block_on(stop_instance(&state_dir, cli.force_stop));
    }

    let config = Config {
        state_dir,
        port: cli.port,
        mcp_host: cli.mcp_host.clone(),
        team_path: cli.config.clone(),
        projects_path: cli.projects.clone(),
    };
    let mode = if cli.no_takeover {
        ResolveMode::Abort
    } else {
        ResolveMode::Takeover
    };

    runtime.block_on(serve(config, mode))
}

/// Run the supervisor until a shutdown signal arrives.
async fn serve(config: Config, mode: ResolveMode) -> i32 {
    rotate_log_if_needed(&config.log_path());
    let _log_guard = match setup_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to set up logging: {e}");
            return 1;
        }
    };

    info!(port = config.port, "starting supervisor");

    let startup = match lifecycle::startup(config, mode).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "failed to start supervisor");
            eprintln!("Error: {e}");
            return match e {
                LifecycleError::Instance(instance::InstanceError::TakeoverFailed { .. }) => 2,
                _ => 1,
            };
        }
    };
    let lifecycle::StartupResult { daemon, serve_task } = startup;

    daemon.spawn_background_tasks();
    daemon.recover().await;

    println!("READY");

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            daemon.shutdown(serve_task).await;
            return 1;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            daemon.shutdown(serve_task).await;
            return 1;
        }
    };

    tokio::select! {
        _ = daemon.shutdown.cancelled() => info!("shutdown requested via endpoint"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    daemon.shutdown(serve_task).await;
    0
}

/// `--status`: one line about the recorded instance.
async fn print_status(state_dir: &std::path::Path) -> i32 {
    let record_path = state_dir.join(instance::RECORD_FILE);
    let Some(record) = InstanceRecord::load(&record_path) else {
        println!("shepd is not running");
        return 1;
    };

    let probe = HttpProbe::new();
    if probe.is_healthy(record.port).await {
        println!(
            "shepd is running (pid {}, port {}, started {})",
            record.pid,
            record.port,
            record.start_time.to_rfc3339()
        );
        0
    } else if process_exists(record.pid) {
        println!(
            "shepd process {} exists but is not responding on port {}",
            record.pid, record.port
        );
        1
    } else {
        println!("shepd is not running (stale record for pid {})", record.pid);
        1
    }
}

/// `--stop` / `--force-stop` against the recorded instance.
async fn stop_instance(state_dir: &std::path::Path, force: bool) -> i32 {
    let record_path = state_dir.join(instance::RECORD_FILE);
    let Some(record) = InstanceRecord::load(&record_path) else {
        println!("shepd is not running");
        return 0;
    };

    if force {
        if process_exists(record.pid) {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(record.pid as i32),
                nix::sys::signal::Signal::SIGKILL,
            );
        }
        let _ = std::fs::remove_file(&record_path);
        println!("shepd (pid {}) killed", record.pid);
        return 0;
    }

    let probe = HttpProbe::new();
    if !probe.request_shutdown(record.port).await {
        if !process_exists(record.pid) {
            let _ = std::fs::remove_file(&record_path);
            println!("shepd is not running (stale record removed)");
            return 0;
        }
        eprintln!(
            "Error: shepd (pid {}) did not accept the shutdown request",
            record.pid
        );
        return 2;
    }

    // Wait for the process to drain and exit
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while tokio::time::Instant::now() < deadline {
        if !process_exists(record.pid) {
            println!("shepd (pid {}) stopped", record.pid);
            return 0;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    eprintln!("Error: shepd (pid {}) did not exit within 15s", record.pid);
    2
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `shepd.log` → `shepd.log.1` → `shepd.log.2` → `shepd.log.3`,
/// deleting the oldest. Best-effort: rotation failures are ignored so the
/// daemon still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_path = config.log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        log_path.file_name().ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
