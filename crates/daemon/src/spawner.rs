// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent process spawning and teardown.
//!
//! The spawner owns the OS-level child handles and the per-agent artifact
//! directories; no other component touches either. Spawning materializes
//! deterministic artifacts (rendered prompt, tool config, launcher script,
//! optional heartbeat helper), then starts the child in its own process
//! group so it can be signalled independently of the daemon. The child PID
//! is recorded to a sidecar file.

use shep_core::{AgentConfig, AgentId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::instance::process_exists;

/// Poll interval while waiting for a signalled process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait after SIGKILL before giving up on observing the exit.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Errors from spawning an agent.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("agent config not found: {0}")]
    ConfigMissing(String),

    #[error("project path is not a directory: {0}")]
    PathInvalid(PathBuf),

    #[error("failed to write agent artifacts: {0}")]
    ArtifactWriteFailed(#[source] std::io::Error),

    #[error("failed to launch agent process: {0}")]
    LaunchFailed(String),
}

/// Spawner configuration.
#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    /// Root directory for per-agent artifact directories.
    pub artifacts_dir: PathBuf,
    /// Tool-surface base URL advertised to agents, e.g. `http://host:3000`.
    pub supervisor_url: String,
}

/// Spawns and stops agent child processes.
pub struct Spawner {
    config: SpawnerConfig,
}

impl Spawner {
    pub fn new(config: SpawnerConfig) -> Self {
        Self { config }
    }

    /// Artifact directory for one agent. Deterministic from the agent id.
    pub fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.config.artifacts_dir.join(agent_id)
    }

    /// Path of the PID sidecar file for one agent.
    pub fn pid_path(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("agent.pid")
    }

    /// Spawn an agent child process.
    ///
    /// Artifact materialization is atomic per agent: any failure after the
    /// directory is created removes it again before returning.
    pub async fn spawn(
        &self,
        config: &AgentConfig,
        agent_id: &AgentId,
        project_path: &Path,
        initial_prompt: Option<&str>,
    ) -> Result<u32, SpawnError> {
        if !project_path.is_dir() {
            return Err(SpawnError::PathInvalid(project_path.to_owned()));
        }

        let dir = self.agent_dir(agent_id.as_str());
        match self.write_artifacts(config, agent_id, project_path, initial_prompt, &dir) {
            Ok(()) => {}
            Err(e) => {
                let _ = std::fs::remove_dir_all(&dir);
                return Err(SpawnError::ArtifactWriteFailed(e));
            }
        }

        match self.launch(agent_id, project_path, &dir).await {
            Ok(pid) => {
                info!(agent_id = %agent_id, pid, "agent spawned");
                Ok(pid)
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&dir);
                Err(e)
            }
        }
    }

    fn write_artifacts(
        &self,
        config: &AgentConfig,
        agent_id: &AgentId,
        project_path: &Path,
        initial_prompt: Option<&str>,
        dir: &Path,
    ) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(dir)?;

        let prompt = render_prompt(
            &config.prompt_template,
            agent_id.as_str(),
            &config.role,
            project_path,
            &self.config.supervisor_url,
        );
        std::fs::write(dir.join("prompt.md"), &prompt)?;

        let tool_config = serde_json::json!({
            "agent_id": agent_id.as_str(),
            "model": config.model,
            "role": config.role,
            "tools": config.tools,
            "supervisor_url": self.config.supervisor_url,
            "project": project_path,
        });
        std::fs::write(
            dir.join("tools.json"),
            serde_json::to_vec_pretty(&tool_config)?,
        )?;

        if config.heartbeat_helper {
            let helper = heartbeat_helper_script(agent_id.as_str(), &self.config.supervisor_url);
            write_executable(&dir.join("heartbeat.sh"), &helper)?;
        }

        let launcher = launcher_script(config, dir, initial_prompt);
        write_executable(&dir.join("launch.sh"), &launcher)?;

        Ok(())
    }

    async fn launch(
        &self,
        agent_id: &AgentId,
        project_path: &Path,
        dir: &Path,
    ) -> Result<u32, SpawnError> {
        let log = std::fs::File::create(dir.join("agent.log"))
            .map_err(|e| SpawnError::LaunchFailed(e.to_string()))?;
        let log_err = log
            .try_clone()
            .map_err(|e| SpawnError::LaunchFailed(e.to_string()))?;

        let child = Command::new("/bin/sh")
            .arg(dir.join("launch.sh"))
            .current_dir(project_path)
            .env("SHEP_AGENT_ID", agent_id.as_str())
            .env("SHEP_SUPERVISOR_URL", &self.config.supervisor_url)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0)
            .spawn()
            .map_err(|e| SpawnError::LaunchFailed(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| SpawnError::LaunchFailed("child exited before pid read".into()))?;

        std::fs::write(self.pid_path(agent_id.as_str()), format!("{pid}\n"))
            .map_err(SpawnError::ArtifactWriteFailed)?;

        Ok(pid)
    }

    /// Stop an agent's process group and remove its artifacts.
    ///
    /// SIGTERM first, escalating to SIGKILL after `grace` (immediately when
    /// `force`). Idempotent: an already-gone process still cleans up the
    /// sidecar and artifacts and returns success.
    pub async fn stop(&self, agent_id: &str, pid: Option<u32>, grace: Duration, force: bool) {
        let pid = pid.or_else(|| self.read_pid_sidecar(agent_id));

        if let Some(pid) = pid.filter(|&p| process_exists(p)) {
            if force {
                signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            } else {
                signal_group(pid, nix::sys::signal::Signal::SIGTERM);
                if !wait_for_exit(pid, grace).await {
                    warn!(agent_id, pid, "grace expired, escalating to SIGKILL");
                    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                }
            }
            if !wait_for_exit(pid, KILL_WAIT).await {
                warn!(agent_id, pid, "process still present after SIGKILL");
            }
        }

        self.remove_artifacts(agent_id);
    }

    fn read_pid_sidecar(&self, agent_id: &str) -> Option<u32> {
        std::fs::read_to_string(self.pid_path(agent_id))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Remove one agent's artifact directory. Idempotent.
    pub fn remove_artifacts(&self, agent_id: &str) {
        let dir = self.agent_dir(agent_id);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(agent_id, error = %e, "failed to remove agent artifacts");
            }
        }
    }

    /// Remove artifact directories for agents no longer in the fleet.
    /// Idempotent; unknown directory entries are left alone only if they
    /// belong to live agents.
    pub fn cleanup_all(&self, live_agents: &HashSet<String>) {
        let entries = match std::fs::read_dir(&self.config.artifacts_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !live_agents.contains(name) {
                info!(agent_id = name, "sweeping stale agent artifacts");
                let _ = std::fs::remove_dir_all(entry.path());
            }
        }
    }
}

/// Interpolate the spawn-time variables into a prompt template.
fn render_prompt(
    template: &str,
    agent_id: &str,
    role: &str,
    project_path: &Path,
    supervisor_url: &str,
) -> String {
    template
        .replace("{agent_id}", agent_id)
        .replace("{role}", role)
        .replace("{project}", &project_path.display().to_string())
        .replace("{supervisor_url}", supervisor_url)
}

fn launcher_script(config: &AgentConfig, dir: &Path, initial_prompt: Option<&str>) -> String {
    let mut script = String::from("#!/bin/sh\n");
    if config.heartbeat_helper {
        script.push_str(&format!(
            "/bin/sh {} &\n",
            shell_quote(&dir.join("heartbeat.sh").display().to_string())
        ));
    }
    script.push_str(&format!(
        "exec {} --model {} --system-prompt-file {}",
        config.run,
        shell_quote(&config.model),
        shell_quote(&dir.join("prompt.md").display().to_string()),
    ));
    let prompt = initial_prompt.or(config.initial_prompt.as_deref());
    if let Some(prompt) = prompt {
        script.push(' ');
        script.push_str(&shell_quote(prompt));
    }
    script.push('\n');
    script
}

fn heartbeat_helper_script(agent_id: &str, supervisor_url: &str) -> String {
    format!(
        "#!/bin/sh\n\
         # Posts a heartbeat every 20s for agents without a native transport.\n\
         while true; do\n\
         \tcurl -fsS -m 5 -X POST {url}/rpc/heartbeat \\\n\
         \t\t-H 'content-type: application/json' \\\n\
         \t\t-d '{{\"agent_id\":\"{id}\"}}' >/dev/null 2>&1\n\
         \tsleep 20\n\
         done\n",
        url = supervisor_url,
        id = agent_id,
    )
}

/// Single-quote a string for POSIX shell embedding.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn write_executable(path: &Path, contents: &str) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, contents)?;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
}

/// Signal an agent's process group, falling back to the single process when
/// the group is already gone.
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    let Ok(raw) = i32::try_from(pid) else { return };
    let group = nix::unistd::Pid::from_raw(-raw);
    if nix::sys::signal::kill(group, signal).is_err() {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), signal);
    }
}

async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !process_exists(pid) {
            return true;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
    !process_exists(pid)
}

#[cfg(test)]
#[path = "spawner_tests.rs"]
mod tests;
