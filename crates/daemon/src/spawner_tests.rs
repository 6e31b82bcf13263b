// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use shep_core::test_support::agent_config;

fn spawner(dir: &tempfile::TempDir) -> Spawner {
    Spawner::new(SpawnerConfig {
        artifacts_dir: dir.path().join("agents"),
        supervisor_url: "http://127.0.0.1:3000".to_string(),
    })
}

/// Roster entry whose process exits immediately (`true` ignores the args
/// the launcher appends).
fn quick_exit_config() -> shep_core::AgentConfig {
    let mut config = agent_config("builder");
    config.run = "true".to_string();
    config
}

/// Roster entry whose process stays alive until signalled.
fn long_lived_config() -> shep_core::AgentConfig {
    let mut config = agent_config("builder");
    config.run = "/bin/sh -c 'sleep 30'".to_string();
    config
}

#[tokio::test]
async fn spawn_materializes_artifacts_and_pid_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let spawner = spawner(&dir);
    let agent_id = AgentId::new("builder-1");

    let pid = spawner
        .spawn(&quick_exit_config(), &agent_id, project.path(), None)
        .await
        .unwrap();
    assert!(pid > 0);

    let agent_dir = spawner.agent_dir("builder-1");
    assert!(agent_dir.join("prompt.md").exists());
    assert!(agent_dir.join("tools.json").exists());
    assert!(agent_dir.join("launch.sh").exists());

    let sidecar = std::fs::read_to_string(spawner.pid_path("builder-1")).unwrap();
    assert_eq!(sidecar.trim().parse::<u32>().unwrap(), pid);
}

#[tokio::test]
async fn prompt_interpolates_spawn_variables() {
    let dir = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let spawner = spawner(&dir);
    let agent_id = AgentId::new("builder-1");

    spawner
        .spawn(&quick_exit_config(), &agent_id, project.path(), None)
        .await
        .unwrap();

    let prompt = std::fs::read_to_string(spawner.agent_dir("builder-1").join("prompt.md")).unwrap();
    assert!(prompt.contains("builder-1"));
    assert!(prompt.contains("engineer"));
    assert!(prompt.contains("http://127.0.0.1:3000"));
    assert!(prompt.contains(&project.path().display().to_string()));
}

#[tokio::test]
async fn heartbeat_helper_emitted_only_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let spawner = spawner(&dir);

    let mut config = quick_exit_config();
    config.heartbeat_helper = true;
    spawner
        .spawn(&config, &AgentId::new("with-helper"), project.path(), None)
        .await
        .unwrap();
    assert!(spawner.agent_dir("with-helper").join("heartbeat.sh").exists());

    spawner
        .spawn(
            &quick_exit_config(),
            &AgentId::new("without-helper"),
            project.path(),
            None,
        )
        .await
        .unwrap();
    assert!(!spawner
        .agent_dir("without-helper")
        .join("heartbeat.sh")
        .exists());
}

#[tokio::test]
async fn invalid_project_path_is_rejected_before_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let spawner = spawner(&dir);
    let missing = dir.path().join("no-such-project");

    let err = spawner
        .spawn(&quick_exit_config(), &AgentId::new("builder-1"), &missing, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SpawnError::PathInvalid(_)));
    assert!(!spawner.agent_dir("builder-1").exists());
}

#[tokio::test]
async fn artifact_write_failure_is_surfaced() {
    let project = tempfile::tempdir().unwrap();
    // An unwritable artifacts root forces the artifact write to fail
    let spawner = Spawner::new(SpawnerConfig {
        artifacts_dir: PathBuf::from("/proc/no-such-root/agents"),
        supervisor_url: "http://127.0.0.1:3000".to_string(),
    });

    let err = spawner
        .spawn(
            &quick_exit_config(),
            &AgentId::new("builder-1"),
            project.path(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SpawnError::ArtifactWriteFailed(_)));
}

#[tokio::test]
async fn stop_terminates_process_group_and_removes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let spawner = spawner(&dir);
    let agent_id = AgentId::new("runner");

    let pid = spawner
        .spawn(&long_lived_config(), &agent_id, project.path(), None)
        .await
        .unwrap();
    assert!(crate::instance::process_exists(pid));

    spawner
        .stop("runner", Some(pid), Duration::from_secs(2), false)
        .await;

    assert!(!crate::instance::process_exists(pid));
    assert!(!spawner.agent_dir("runner").exists());
}

#[tokio::test]
async fn stop_is_idempotent_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let spawner = spawner(&dir);
    let agent_id = AgentId::new("runner");

    let pid = spawner
        .spawn(&long_lived_config(), &agent_id, project.path(), None)
        .await
        .unwrap();

    spawner.stop("runner", Some(pid), Duration::ZERO, true).await;
    // Second stop: process gone, artifacts gone, still succeeds
    spawner.stop("runner", Some(pid), Duration::ZERO, true).await;
    assert!(!spawner.agent_dir("runner").exists());
}

#[tokio::test]
async fn cleanup_all_sweeps_only_stale_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let spawner = spawner(&dir);

    spawner
        .spawn(&quick_exit_config(), &AgentId::new("keep"), project.path(), None)
        .await
        .unwrap();
    spawner
        .spawn(&quick_exit_config(), &AgentId::new("sweep"), project.path(), None)
        .await
        .unwrap();

    let live: HashSet<String> = [String::from("keep")].into();
    spawner.cleanup_all(&live);
    spawner.cleanup_all(&live); // idempotent

    assert!(spawner.agent_dir("keep").exists());
    assert!(!spawner.agent_dir("sweep").exists());
}

#[test]
fn shell_quote_escapes_single_quotes() {
    assert_eq!(shell_quote("plain"), "'plain'");
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
}

#[test]
fn launcher_script_appends_initial_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let config = quick_exit_config();
    let script = launcher_script(&config, dir.path(), Some("start with the parser"));
    assert!(script.starts_with("#!/bin/sh\n"));
    assert!(script.contains("exec true --model 'sonnet'"));
    assert!(script.contains("'start with the parser'"));
}
