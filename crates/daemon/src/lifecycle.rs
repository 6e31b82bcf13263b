// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor lifecycle: startup, recovery, background loops, shutdown.
//!
//! Startup order is load-bearing: resolve the singleton first, bind the
//! HTTP listener, confirm the bind with a local probe, and only then write
//! the instance record: a record must never advertise an endpoint that is
//! not serving. Shutdown runs the reverse: stop accepting work, cancel the
//! loops, stop the fleet with grace, sweep artifacts, release the record,
//! then close the store with a final checkpoint.

use crate::alerts::AlertEngine;
use crate::bus::EventBus;
use crate::http::{build_router, HttpCtx};
use crate::instance::{HttpProbe, InstanceError, InstanceLock, InstanceManager, InstanceRecord, ResolveMode};
use crate::reconciler::{ReconcilePolicy, Reconciler};
use crate::rpc::{RpcError, RpcSurface, ToolRegistry};
use crate::spawner::{Spawner, SpawnerConfig};
use crate::store::Store;
use crate::tasks::TaskQueue;
use parking_lot::RwLock;
use serde_json::json;
use shep_core::{
    AgentId, ConfigError, Envelope, EnvelopeKind, Event, Priority, ProjectRegistry, Severity,
    SystemClock, TaskConfig, TaskStatus, TeamConfig, UuidIdGen,
};
use shep_storage::{Snapshot, SnapshotError, Wal, WalError, WorldState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// WAL group-commit flush window.
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Periodic snapshot + WAL truncation interval.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

/// Alert threshold evaluation interval.
const ALERT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Durable envelope retention; delivered envelopes older than this go away.
const EVENT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the retention pass runs.
const COMPACTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory.
    pub state_dir: PathBuf,
    /// HTTP listen port.
    pub port: u16,
    /// Hostname embedded in tool-surface URLs advertised to agents.
    pub mcp_host: String,
    /// Team roster path (optional; empty roster when absent).
    pub team_path: Option<PathBuf>,
    /// Project registry path.
    pub projects_path: Option<PathBuf>,
}

impl Config {
    /// Resolve the state directory: explicit flag, `SHEP_STATE_DIR`,
    /// `$XDG_STATE_HOME/shep`, then `~/.local/state/shep`.
    pub fn state_dir_from(flag: Option<PathBuf>) -> Result<PathBuf, LifecycleError> {
        if let Some(dir) = flag {
            return Ok(dir);
        }
        if let Ok(dir) = std::env::var("SHEP_STATE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return Ok(PathBuf::from(xdg).join("shep"));
        }
        let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
        Ok(PathBuf::from(home).join(".local/state/shep"))
    }

    pub fn wal_path(&self) -> PathBuf {
        self.state_dir.join("wal").join("events.wal")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("snapshot.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir.join("agents")
    }

    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join("shepd.log")
    }

    /// Tool-surface base URL advertised to agents.
    pub fn supervisor_url(&self) -> String {
        format!("http://{}:{}", self.mcp_host, self.port)
    }
}

/// Lifecycle errors. All fatal at startup.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind port {0}: {1}")]
    BindFailed(u16, #[source] std::io::Error),

    #[error("local health probe failed on port {0} after bind")]
    ProbeFailed(u16),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A running supervisor's component graph.
pub struct Daemon {
    pub config: Config,
    pub store: Store,
    pub bus: EventBus<SystemClock>,
    pub spawner: Arc<Spawner>,
    pub reconciler: Arc<Reconciler<SystemClock, UuidIdGen>>,
    pub tasks: Arc<TaskQueue<SystemClock, UuidIdGen>>,
    pub alerts: Arc<AlertEngine<SystemClock, UuidIdGen>>,
    pub rpc: Arc<RpcSurface<SystemClock, UuidIdGen>>,
    pub team: Arc<RwLock<Arc<TeamConfig>>>,
    pub projects: Arc<RwLock<Arc<ProjectRegistry>>>,
    pub shutdown: CancellationToken,
    pub start_time: Instant,
    lock: Option<InstanceLock>,
}

/// What `startup` hands back to `main`.
pub struct StartupResult {
    pub daemon: Daemon,
    /// The HTTP serve task; completes once graceful shutdown drains.
    pub serve_task: JoinHandle<()>,
}

/// Start the supervisor.
pub async fn startup(config: Config, mode: ResolveMode) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    std::fs::create_dir_all(config.artifacts_dir())?;

    // 1. Singleton: inspect and resolve before touching any shared state
    let manager = InstanceManager::new(config.state_dir.clone());
    let existing = manager.check_existing().await;
    manager.resolve(existing, mode).await?;

    // 2. Configuration (fatal when invalid)
    let team = match &config.team_path {
        Some(path) => TeamConfig::load(path)?,
        None => {
            warn!("no team config given, starting with an empty roster");
            TeamConfig::default()
        }
    };
    let projects = match &config.projects_path {
        Some(path) => ProjectRegistry::load(path)?,
        None => ProjectRegistry::default(),
    };
    let team = Arc::new(RwLock::new(Arc::new(team)));
    let projects = Arc::new(RwLock::new(Arc::new(projects)));

    // 3. Recover state: snapshot, then WAL replay past it
    let (mut state, snapshot_seq) = match Snapshot::load(&config.snapshot_path())? {
        Some(snapshot) => {
            info!(
                seq = snapshot.seq,
                agents = snapshot.state.agents.len(),
                tasks = snapshot.state.tasks.len(),
                "loaded snapshot"
            );
            (snapshot.state, snapshot.seq)
        }
        None => {
            info!("no snapshot found, starting with empty state");
            (WorldState::default(), 0)
        }
    };

    let mut wal = Wal::open(&config.wal_path())?;
    let replay = wal.entries_after(snapshot_seq)?;
    let replay_count = replay.len();
    for entry in replay {
        state.apply_event(&entry.event);
    }
    if replay_count > 0 {
        info!(replay_count, after_seq = snapshot_seq, "replayed WAL entries");
    }
    info!(
        agents = state.agents.len(),
        tasks = state.tasks.len(),
        envelopes = state.envelopes.len(),
        "recovered state"
    );

    let store = Store::new(wal, state);
    let clock = SystemClock;
    let idgen = UuidIdGen;

    // 4. Component graph
    let bus = EventBus::new(Some(store.clone()), clock.clone());
    let spawner = Arc::new(Spawner::new(SpawnerConfig {
        artifacts_dir: config.artifacts_dir(),
        supervisor_url: config.supervisor_url(),
    }));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        bus.clone(),
        Arc::clone(&spawner),
        Arc::clone(&team),
        ReconcilePolicy::default(),
        clock.clone(),
        idgen.clone(),
    ));
    let tasks = Arc::new(TaskQueue::new(
        store.clone(),
        bus.clone(),
        clock.clone(),
        idgen.clone(),
    ));
    let thresholds = store.read(|s| s.thresholds.clone());
    let alerts = Arc::new(AlertEngine::new(thresholds, clock.clone(), idgen.clone()));

    let registry = ToolRegistry::new();
    register_builtin_tools(
        &registry,
        store.clone(),
        Arc::clone(&tasks),
        Arc::clone(&reconciler),
        Arc::clone(&alerts),
        Arc::clone(&projects),
    );

    let rpc = Arc::new(RpcSurface::new(
        store.clone(),
        bus.clone(),
        Arc::clone(&reconciler),
        Arc::clone(&tasks),
        registry,
        clock.clone(),
        idgen.clone(),
    ));

    // 5. Bind, serve, and confirm with a local probe before writing the
    // instance record
    let shutdown = CancellationToken::new();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| LifecycleError::BindFailed(config.port, e))?;

    let ctx = Arc::new(HttpCtx {
        rpc: Arc::clone(&rpc),
        store: store.clone(),
        bus: bus.clone(),
        port: config.port,
        start_time: Instant::now(),
        shutdown: shutdown.clone(),
    });
    let router = build_router(ctx);
    let serve_shutdown = shutdown.clone();
    let serve_task = tokio::spawn(async move {
        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service)
            .with_graceful_shutdown(serve_shutdown.cancelled_owned())
            .await
        {
            error!(error = %e, "HTTP server error");
        }
    });

    let probe = HttpProbe::new();
    if !wait_until_healthy(&probe, config.port).await {
        shutdown.cancel();
        return Err(LifecycleError::ProbeFailed(config.port));
    }

    let record = InstanceRecord::new(std::process::id(), config.port, config.state_dir.clone());
    let lock = manager.acquire(record)?;

    info!(port = config.port, "supervisor started");

    Ok(StartupResult {
        daemon: Daemon {
            config,
            store,
            bus,
            spawner,
            reconciler,
            tasks,
            alerts,
            rpc,
            team,
            projects,
            shutdown,
            start_time: Instant::now(),
            lock: Some(lock),
        },
        serve_task,
    })
}

async fn wait_until_healthy(probe: &HttpProbe, port: u16) -> bool {
    use crate::instance::HealthProbe as _;
    for _ in 0..20 {
        if probe.is_healthy(port).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

impl Daemon {
    /// Spawn all background loops. Each observes the shutdown token within
    /// a second.
    pub fn spawn_background_tasks(&self) {
        spawn_flush_task(self.store.clone(), self.shutdown.clone());
        spawn_checkpoint_task(
            self.store.clone(),
            self.config.snapshot_path(),
            self.shutdown.clone(),
        );
        spawn_reconcile_loop(Arc::clone(&self.reconciler), self.shutdown.clone());
        spawn_alert_loop(
            Arc::clone(&self.alerts),
            self.store.clone(),
            self.bus.clone(),
            Arc::clone(&self.rpc),
            self.shutdown.clone(),
        );
        spawn_compaction_loop(self.bus.clone(), self.shutdown.clone());
        spawn_reload_task(
            self.config.clone(),
            Arc::clone(&self.team),
            Arc::clone(&self.projects),
            self.shutdown.clone(),
        );
    }

    /// Post-startup recovery: converge recorded agents with the process
    /// table, then sweep artifacts that belong to no fleet member.
    pub async fn recover(&self) {
        self.reconciler.recover().await;
        self.spawner.cleanup_all(&self.reconciler.fleet_ids());
    }

    /// The ordered graceful-shutdown sequence.
    ///
    /// The HTTP layer stopped accepting when the token was cancelled; the
    /// background loops exit on the same token. What remains: stop the
    /// fleet with grace, sweep artifacts, release the instance record, and
    /// close the store behind a final checkpoint.
    pub async fn shutdown(mut self, serve_task: JoinHandle<()>) {
        info!("shutting down supervisor");
        self.shutdown.cancel();

        self.reconciler.shutdown_fleet().await;
        self.spawner.cleanup_all(&std::collections::HashSet::new());

        // Record goes away before the HTTP surface finishes draining so
        // peers probing status see "not running"
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
        if let Err(e) = serve_task.await {
            warn!(error = %e, "HTTP serve task ended abnormally");
        }

        match self.store.checkpoint(&self.config.snapshot_path()) {
            Ok(seq) => info!(seq, "final checkpoint saved"),
            Err(e) => warn!(error = %e, "failed to save final checkpoint"),
        }
        info!("supervisor stopped");
    }
}

/// Register the built-in control-plane tools the captain drives the fleet
/// with. Application-specific tools are registered by embedders on the same
/// registry.
fn register_builtin_tools(
    registry: &ToolRegistry,
    store: Store,
    tasks: Arc<TaskQueue<SystemClock, UuidIdGen>>,
    reconciler: Arc<Reconciler<SystemClock, UuidIdGen>>,
    alerts: Arc<AlertEngine<SystemClock, UuidIdGen>>,
    projects: Arc<RwLock<Arc<ProjectRegistry>>>,
) {
    {
        registry.register("set_thresholds", move |args| {
            let store = store.clone();
            let alerts = Arc::clone(&alerts);
            async move {
                let thresholds: shep_core::Thresholds = serde_json::from_value(args)
                    .map_err(|e| RpcError::InvalidArgs(e.to_string()))?;
                store
                    .record(&Event::ThresholdsUpdated {
                        thresholds: thresholds.clone(),
                    })
                    .map_err(|e| RpcError::Internal(e.to_string()))?;
                alerts.set_thresholds(thresholds.clone());
                Ok(serde_json::to_value(thresholds).unwrap_or_default())
            }
        });
    }

    {
        let tasks = Arc::clone(&tasks);
        registry.register("task_add", move |args| {
            let tasks = Arc::clone(&tasks);
            async move {
                let title = args
                    .get("title")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RpcError::InvalidArgs("title required".into()))?
                    .to_string();
                let priority = args.get("priority").and_then(|v| v.as_u64()).unwrap_or(4) as u8;
                let description = args
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let config = TaskConfig::builder(String::new(), title)
                    .description(description)
                    .priority(priority)
                    .source(
                        args.get("source")
                            .and_then(|v| v.as_str())
                            .unwrap_or("captain"),
                    )
                    .build();
                let task = tasks.add(config).await?;
                Ok(serde_json::to_value(task).unwrap_or_default())
            }
        });
    }

    {
        let tasks = Arc::clone(&tasks);
        registry.register("task_transition", move |args| {
            let tasks = Arc::clone(&tasks);
            async move {
                let task_id = args
                    .get("task_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RpcError::InvalidArgs("task_id required".into()))?
                    .to_string();
                let to: TaskStatus = serde_json::from_value(
                    args.get("to")
                        .cloned()
                        .ok_or_else(|| RpcError::InvalidArgs("to required".into()))?,
                )
                .map_err(|e| RpcError::InvalidArgs(e.to_string()))?;
                let task = tasks.transition(&task_id, to).await?;
                Ok(serde_json::to_value(task).unwrap_or_default())
            }
        });
    }

    {
        let tasks = Arc::clone(&tasks);
        registry.register("task_list", move |args| {
            let tasks = Arc::clone(&tasks);
            async move {
                let listed = match args.get("status").and_then(|v| v.as_str()) {
                    Some(status) => {
                        let status: TaskStatus =
                            serde_json::from_value(json!(status))
                                .map_err(|e| RpcError::InvalidArgs(e.to_string()))?;
                        tasks.get_by_status(status)
                    }
                    None => {
                        let mut all: Vec<_> = TaskStatusIter::all()
                            .flat_map(|s| tasks.get_by_status(s))
                            .collect();
                        all.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()).then(a.id.cmp(&b.id)));
                        all
                    }
                };
                Ok(serde_json::to_value(listed).unwrap_or_default())
            }
        });
    }

    {
        let reconciler = Arc::clone(&reconciler);
        registry.register("spawn_agent", move |args| {
            let reconciler = Arc::clone(&reconciler);
            let projects = Arc::clone(&projects);
            async move {
                let config_name = args
                    .get("config")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RpcError::InvalidArgs("config required".into()))?
                    .to_string();
                let agent_id = args
                    .get("agent_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RpcError::InvalidArgs("agent_id required".into()))?
                    .to_string();
                let project_path = match args.get("project_id").and_then(|v| v.as_str()) {
                    Some(project_id) => {
                        let registry = Arc::clone(&projects.read());
                        registry
                            .get(project_id)
                            .map(|p| p.path.clone())
                            .ok_or_else(|| {
                                RpcError::InvalidArgs(format!("unknown project: {project_id}"))
                            })?
                    }
                    None => PathBuf::from(
                        args.get("project_path")
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| {
                                RpcError::InvalidArgs("project_id or project_path required".into())
                            })?,
                    ),
                };
                let initial_prompt = args
                    .get("initial_prompt")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let pid = reconciler
                    .register(
                        &config_name,
                        &AgentId::new(&agent_id),
                        project_path,
                        initial_prompt.as_deref(),
                    )
                    .await
                    .map_err(RpcError::from)?;
                Ok(json!({"agent_id": agent_id, "pid": pid}))
            }
        });
    }

    registry.register("stop_agent", move |args| {
        let reconciler = Arc::clone(&reconciler);
        async move {
            let agent_id = args
                .get("agent_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| RpcError::InvalidArgs("agent_id required".into()))?
                .to_string();
            let force = args.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
            reconciler
                .stop_agent(&AgentId::new(&agent_id), force)
                .await
                .map_err(RpcError::from)?;
            Ok(json!({"stopped": agent_id}))
        }
    });
}

/// Iterate all task statuses (for unfiltered listings).
struct TaskStatusIter;

impl TaskStatusIter {
    fn all() -> impl Iterator<Item = TaskStatus> {
        [
            TaskStatus::Pending,
            TaskStatus::Assigned,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::ChangesRequested,
            TaskStatus::Approved,
            TaskStatus::Merged,
            TaskStatus::Blocked,
        ]
        .into_iter()
    }
}

/// Flush the WAL on the group-commit interval.
fn spawn_flush_task(store: Store, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if store.needs_flush() {
                        if let Err(e) = store.flush() {
                            error!(error = %e, "failed to flush WAL");
                        }
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    });
}

/// Periodic snapshot + WAL truncation.
fn spawn_checkpoint_task(store: Store, snapshot_path: PathBuf, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);
        interval.tick().await; // immediate first tick is not a checkpoint
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if store.seq() == 0 {
                        continue;
                    }
                    let store = store.clone();
                    let path = snapshot_path.clone();
                    // Serialization and fsync off the async workers
                    let result = tokio::task::spawn_blocking(move || store.checkpoint(&path)).await;
                    match result {
                        Ok(Ok(seq)) => tracing::debug!(seq, "checkpoint complete"),
                        Ok(Err(e)) => warn!(error = %e, "checkpoint failed"),
                        Err(e) => warn!(error = %e, "checkpoint task panicked"),
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    });
}

/// The reconcile tick.
fn spawn_reconcile_loop(
    reconciler: Arc<Reconciler<SystemClock, UuidIdGen>>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(reconciler.policy().tick);
        loop {
            tokio::select! {
                _ = interval.tick() => reconciler.tick().await,
                _ = shutdown.cancelled() => return,
            }
        }
    });
}

/// Periodic threshold evaluation; persists and publishes what it finds.
fn spawn_alert_loop(
    alerts: Arc<AlertEngine<SystemClock, UuidIdGen>>,
    store: Store,
    bus: EventBus<SystemClock>,
    rpc: Arc<RpcSurface<SystemClock, UuidIdGen>>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ALERT_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let agents: Vec<_> = store.read(|s| s.agents.values().cloned().collect());
                    let raised = alerts.check(&agents, rpc.escalations_pending());
                    for alert in raised {
                        if let Err(e) = store.record(&Event::AlertRaised { alert: alert.clone() }) {
                            warn!(error = %e, "failed to persist alert");
                        }
                        let priority = match alert.severity {
                            Severity::Critical => Priority::Critical,
                            Severity::Warning => Priority::High,
                        };
                        let envelope = Envelope::new(
                            alert.id.clone(),
                            EnvelopeKind::Alert,
                            "supervisor",
                            shep_core::BROADCAST_TARGET,
                            alert.created_at_ms,
                        )
                        .with_priority(priority)
                        .with_payload(json!({
                            "kind": alert.kind.to_string(),
                            "agent_id": alert.agent_id,
                            "severity": alert.severity.to_string(),
                            "message": alert.message,
                        }));
                        bus.publish(envelope).await;
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    });
}

/// Retention pass over the durable envelope table.
fn spawn_compaction_loop(bus: EventBus<SystemClock>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COMPACTION_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => bus.compact(EVENT_RETENTION),
                _ = shutdown.cancelled() => return,
            }
        }
    });
}

/// SIGHUP atomically replaces the team and project configs. A reload that
/// fails validation keeps the previous config active.
fn spawn_reload_task(
    config: Config,
    team: Arc<RwLock<Arc<TeamConfig>>>,
    projects: Arc<RwLock<Arc<ProjectRegistry>>>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let Ok(mut sighup) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        else {
            warn!("failed to install SIGHUP handler, config reload disabled");
            return;
        };
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    if let Some(path) = &config.team_path {
                        match TeamConfig::load(path) {
                            Ok(loaded) => {
                                *team.write() = Arc::new(loaded);
                                info!("team config reloaded");
                            }
                            Err(e) => warn!(error = %e, "team config reload rejected"),
                        }
                    }
                    if let Some(path) = &config.projects_path {
                        match ProjectRegistry::load(path) {
                            Ok(loaded) => {
                                *projects.write() = Arc::new(loaded);
                                info!("project registry reloaded");
                            }
                            Err(e) => warn!(error = %e, "project registry reload rejected"),
                        }
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    });
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
