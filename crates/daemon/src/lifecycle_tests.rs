// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
#[serial]
fn state_dir_resolution_order() {
    let flag = Some(PathBuf::from("/explicit/state"));
    assert_eq!(
        Config::state_dir_from(flag).unwrap(),
        PathBuf::from("/explicit/state")
    );

    std::env::set_var("SHEP_STATE_DIR", "/from/env");
    assert_eq!(
        Config::state_dir_from(None).unwrap(),
        PathBuf::from("/from/env")
    );
    std::env::remove_var("SHEP_STATE_DIR");

    std::env::set_var("XDG_STATE_HOME", "/xdg/state");
    assert_eq!(
        Config::state_dir_from(None).unwrap(),
        PathBuf::from("/xdg/state/shep")
    );
    std::env::remove_var("XDG_STATE_HOME");
}

#[test]
fn derived_paths_live_under_state_dir() {
    let config = Config {
        state_dir: PathBuf::from("/var/lib/shep"),
        port: 3000,
        mcp_host: "10.0.0.5".to_string(),
        team_path: None,
        projects_path: None,
    };

    assert_eq!(
        config.wal_path(),
        PathBuf::from("/var/lib/shep/wal/events.wal")
    );
    assert_eq!(
        config.snapshot_path(),
        PathBuf::from("/var/lib/shep/snapshot.json")
    );
    assert_eq!(config.artifacts_dir(), PathBuf::from("/var/lib/shep/agents"));
    assert_eq!(config.supervisor_url(), "http://10.0.0.5:3000");
}

/// Builds the task tools on a real queue and drives them through the
/// registry, the way the captain does over HTTP.
#[tokio::test]
async fn builtin_task_tools_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let wal = Wal::open(&dir.path().join("events.wal")).unwrap();
    let store = Store::new(wal, shep_storage::WorldState::default());
    let clock = SystemClock;
    let idgen = UuidIdGen;
    let bus = EventBus::new(Some(store.clone()), clock.clone());

    let team = Arc::new(RwLock::new(Arc::new(TeamConfig::default())));
    let projects = Arc::new(RwLock::new(Arc::new(ProjectRegistry::default())));
    let spawner = Arc::new(Spawner::new(SpawnerConfig {
        artifacts_dir: dir.path().join("agents"),
        supervisor_url: "http://127.0.0.1:3000".to_string(),
    }));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        bus.clone(),
        spawner,
        Arc::clone(&team),
        ReconcilePolicy::default(),
        clock.clone(),
        idgen.clone(),
    ));
    let tasks = Arc::new(TaskQueue::new(store.clone(), bus, clock.clone(), idgen.clone()));
    let alerts = Arc::new(AlertEngine::new(
        store.read(|s| s.thresholds.clone()),
        clock,
        idgen,
    ));

    let registry = ToolRegistry::new();
    register_builtin_tools(
        &registry,
        store.clone(),
        Arc::clone(&tasks),
        reconciler,
        Arc::clone(&alerts),
        projects,
    );

    // Thresholds flow through the store and into the engine
    registry
        .dispatch("set_thresholds", json!({"failed_tests_max": 9}))
        .await
        .unwrap();
    assert_eq!(store.read(|s| s.thresholds.failed_tests_max), 9);
    assert_eq!(alerts.thresholds().failed_tests_max, 9);

    let added = registry
        .dispatch("task_add", json!({"title": "wire the parser", "priority": 2}))
        .await
        .unwrap();
    let task_id = added["id"].as_str().unwrap().to_string();

    let listed = registry
        .dispatch("task_list", json!({"status": "pending"}))
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let err = registry
        .dispatch("task_transition", json!({"task_id": task_id, "to": "merged"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpcError::Task(shep_core::TaskError::InvalidTransition { .. })
    ));

    registry
        .dispatch("task_transition", json!({"task_id": task_id, "to": "blocked"}))
        .await
        .unwrap();
    assert_eq!(
        store.read(|s| s.tasks[&task_id].status),
        TaskStatus::Blocked
    );

    // Unknown tool falls through to NotFound
    let err = registry.dispatch("no_such_tool", json!({})).await.unwrap_err();
    assert!(matches!(err, RpcError::ToolNotFound(_)));
}

#[tokio::test]
async fn builtin_spawn_tool_validates_project() {
    let dir = tempfile::tempdir().unwrap();
    let wal = Wal::open(&dir.path().join("events.wal")).unwrap();
    let store = Store::new(wal, shep_storage::WorldState::default());
    let clock = SystemClock;
    let idgen = UuidIdGen;
    let bus = EventBus::new(Some(store.clone()), clock.clone());

    let team = Arc::new(RwLock::new(Arc::new(TeamConfig::default())));
    let projects = Arc::new(RwLock::new(Arc::new(ProjectRegistry::default())));
    let spawner = Arc::new(Spawner::new(SpawnerConfig {
        artifacts_dir: dir.path().join("agents"),
        supervisor_url: "http://127.0.0.1:3000".to_string(),
    }));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        bus.clone(),
        spawner,
        Arc::clone(&team),
        ReconcilePolicy::default(),
        clock.clone(),
        idgen.clone(),
    ));
    let tasks = Arc::new(TaskQueue::new(store.clone(), bus, clock.clone(), idgen.clone()));
    let alerts = Arc::new(AlertEngine::new(
        store.read(|s| s.thresholds.clone()),
        clock,
        idgen,
    ));

    let registry = ToolRegistry::new();
    register_builtin_tools(&registry, store, tasks, reconciler, alerts, projects);

    let err = registry
        .dispatch(
            "spawn_agent",
            json!({"config": "builder", "agent_id": "b-1", "project_id": "ghost"}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::InvalidArgs(_)));
}
