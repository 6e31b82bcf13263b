// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The control loop: single owner of the agent state machine.
//!
//! Heartbeats and the periodic tick both funnel through here. Transitions
//! for one agent are serialized via a per-agent lock map; distinct agents
//! proceed in parallel. Every transition is persisted through the store and
//! announced on the bus before the lock is released.

use crate::bus::EventBus;
use crate::spawner::{SpawnError, Spawner};
use crate::store::Store;
use parking_lot::Mutex;
use serde_json::json;
use shep_core::{
    AgentId, AgentMetrics, AgentRecord, AgentStatus, Clock, Envelope, EnvelopeKind, Event, IdGen,
    Priority, SystemClock, TaskStatus, TeamConfig, UuidIdGen, BROADCAST_TARGET,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Liveness and respawn policy. All knobs come from configuration.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// Reconcile cycle period.
    pub tick: Duration,
    /// No activity for this long flips `working` to `idle`.
    pub idle_threshold: Duration,
    /// No heartbeat for this long flips any live status to `disconnected`.
    pub liveness_threshold: Duration,
    /// Disconnected agents older than this are dropped from the fleet.
    pub reap_threshold: Duration,
    /// Auto-respawn gives up once the consecutive-failure streak exceeds
    /// this (0 disables auto-respawn). Each disconnect and each failed
    /// spawn attempt counts; a heartbeat from the new process resets it.
    pub respawn_threshold: u32,
    /// Base backoff between respawn attempts; doubles per attempt.
    pub respawn_backoff: Duration,
    /// Backoff ceiling.
    pub respawn_backoff_cap: Duration,
    pub auto_respawn: bool,
    /// Grace given to agents on stop before force-kill.
    pub stop_grace: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            idle_threshold: Duration::from_secs(120),
            liveness_threshold: Duration::from_secs(60),
            reap_threshold: Duration::from_secs(600),
            respawn_threshold: 3,
            respawn_backoff: Duration::from_secs(2),
            respawn_backoff_cap: Duration::from_secs(60),
            auto_respawn: true,
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// Errors surfaced to reconciler callers.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("agent already in fleet: {0}")]
    DuplicateAgent(String),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("store error: {0}")]
    Store(#[from] shep_storage::WalError),
}

#[derive(Debug, Default)]
struct RespawnBackoff {
    attempts: u32,
    not_before_ms: u64,
}

/// The lifecycle reconciler.
pub struct Reconciler<C: Clock = SystemClock, G: IdGen = UuidIdGen> {
    store: Store,
    bus: EventBus<C>,
    spawner: Arc<Spawner>,
    team: Arc<parking_lot::RwLock<Arc<TeamConfig>>>,
    policy: ReconcilePolicy,
    clock: C,
    idgen: G,
    /// Per-agent serialization of state transitions.
    agent_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Per-agent respawn backoff bookkeeping.
    backoff: Mutex<HashMap<String, RespawnBackoff>>,
}

impl<C: Clock, G: IdGen> Reconciler<C, G> {
    pub fn new(
        store: Store,
        bus: EventBus<C>,
        spawner: Arc<Spawner>,
        team: Arc<parking_lot::RwLock<Arc<TeamConfig>>>,
        policy: ReconcilePolicy,
        clock: C,
        idgen: G,
    ) -> Self {
        Self {
            store,
            bus,
            spawner,
            team,
            policy,
            clock,
            idgen,
            agent_locks: Mutex::new(HashMap::new()),
            backoff: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    fn lock_for(&self, agent_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.agent_locks.lock();
        Arc::clone(
            locks
                .entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn team_snapshot(&self) -> Arc<TeamConfig> {
        Arc::clone(&self.team.read())
    }

    /// Spawn an agent and register it with the fleet.
    pub async fn register(
        &self,
        config_name: &str,
        agent_id: &AgentId,
        project_path: PathBuf,
        initial_prompt: Option<&str>,
    ) -> Result<u32, ReconcileError> {
        let team = self.team_snapshot();
        let config = team
            .get(config_name)
            .ok_or_else(|| SpawnError::ConfigMissing(config_name.to_string()))?;

        let exists = self
            .store
            .read(|state| state.agents.contains_key(agent_id.as_str()));
        if exists {
            return Err(ReconcileError::DuplicateAgent(agent_id.to_string()));
        }

        let agent_lock = self.lock_for(agent_id.as_str());
        let _guard = agent_lock.lock().await;

        let pid = self
            .spawner
            .spawn(config, agent_id, &project_path, initial_prompt)
            .await?;

        let now_ms = self.clock.epoch_ms();
        let record = AgentRecord::spawned(
            agent_id,
            &config.name,
            &config.role,
            &config.model,
            config.color.clone(),
            pid,
            project_path,
            now_ms,
        );
        self.store.record(&Event::AgentRegistered { record })?;
        self.announce_status(agent_id.as_str(), AgentStatus::Starting, None)
            .await;
        Ok(pid)
    }

    /// Ingest a heartbeat from an agent.
    pub async fn heartbeat(
        &self,
        agent_id: &AgentId,
        status: Option<AgentStatus>,
        current_task: Option<String>,
        metrics: Option<AgentMetrics>,
    ) -> Result<(), ReconcileError> {
        let agent_lock = self.lock_for(agent_id.as_str());
        let _guard = agent_lock.lock().await;

        let previous = self
            .store
            .read(|state| state.agents.get(agent_id.as_str()).map(|r| r.status))
            .ok_or_else(|| ReconcileError::NotFound(agent_id.to_string()))?;

        let now_ms = self.clock.epoch_ms();
        // First heartbeat promotes a starting agent to working
        let status = match (previous, status) {
            (AgentStatus::Starting, None) => Some(AgentStatus::Working),
            (_, requested) => requested,
        };

        self.store.record(&Event::AgentHeartbeat {
            agent_id: agent_id.clone(),
            status,
            current_task,
            metrics,
            at_ms: now_ms,
        })?;

        // A live heartbeat clears the failure streak
        self.backoff.lock().remove(agent_id.as_str());
        if self
            .store
            .read(|s| s.agents.get(agent_id.as_str()).map(|r| r.consecutive_failures))
            .unwrap_or(0)
            > 0
        {
            self.store.record(&Event::AgentFailureCounted {
                agent_id: agent_id.clone(),
                consecutive_failures: 0,
            })?;
        }

        if let Some(new_status) = status.filter(|s| *s != previous) {
            self.announce_status(agent_id.as_str(), new_status, None)
                .await;
        }
        Ok(())
    }

    /// Record a tool call or task progress for idleness tracking.
    pub async fn activity(&self, agent_id: &AgentId) -> Result<(), ReconcileError> {
        let agent_lock = self.lock_for(agent_id.as_str());
        let _guard = agent_lock.lock().await;

        let known = self
            .store
            .read(|state| state.agents.contains_key(agent_id.as_str()));
        if !known {
            return Err(ReconcileError::NotFound(agent_id.to_string()));
        }
        self.store.record(&Event::AgentActivity {
            agent_id: agent_id.clone(),
            at_ms: self.clock.epoch_ms(),
        })?;
        Ok(())
    }

    /// Apply an agent-reported status change (e.g. blocked with a reason).
    pub async fn report_status(
        &self,
        agent_id: &AgentId,
        status: AgentStatus,
        reason: Option<String>,
    ) -> Result<(), ReconcileError> {
        let agent_lock = self.lock_for(agent_id.as_str());
        let _guard = agent_lock.lock().await;

        let known = self
            .store
            .read(|state| state.agents.contains_key(agent_id.as_str()));
        if !known {
            return Err(ReconcileError::NotFound(agent_id.to_string()));
        }

        let now_ms = self.clock.epoch_ms();
        self.store.record(&Event::AgentStatusChanged {
            agent_id: agent_id.clone(),
            status,
            reason: reason.clone(),
            at_ms: now_ms,
        })?;
        // An explicit report also proves liveness
        self.store.record(&Event::AgentHeartbeat {
            agent_id: agent_id.clone(),
            status: None,
            current_task: None,
            metrics: None,
            at_ms: now_ms,
        })?;
        self.announce_status(agent_id.as_str(), status, reason).await;
        Ok(())
    }

    /// One reconcile cycle over the whole fleet.
    ///
    /// Work is bounded by fleet size: liveness/idleness transitions, reaping
    /// of long-disconnected agents, and auto-respawn with backoff.
    pub async fn tick(&self) {
        let ids: Vec<String> = self.store.read(|state| state.agents.keys().cloned().collect());
        for id in ids {
            let agent_id = AgentId::new(&id);
            if let Err(e) = self.reconcile_agent(&agent_id).await {
                warn!(agent_id = %id, error = %e, "reconcile cycle error");
            }
        }
    }

    async fn reconcile_agent(&self, agent_id: &AgentId) -> Result<(), ReconcileError> {
        let agent_lock = self.lock_for(agent_id.as_str());
        let _guard = agent_lock.lock().await;

        let Some(record) = self
            .store
            .read(|state| state.agents.get(agent_id.as_str()).cloned())
        else {
            return Ok(()); // reaped by a concurrent cycle
        };

        let now_ms = self.clock.epoch_ms();

        match record.status {
            status if status.is_live() => {
                let idle_ms = self.policy.idle_threshold.as_millis() as u64;
                if record.silence_ms(now_ms) >= self.policy.liveness_threshold.as_millis() as u64 {
                    self.mark_disconnected(&record, now_ms, "heartbeats stopped")
                        .await?;
                } else if status == AgentStatus::Working
                    && record.inactivity_ms(now_ms) >= idle_ms
                {
                    self.store.record(&Event::AgentStatusChanged {
                        agent_id: agent_id.clone(),
                        status: AgentStatus::Idle,
                        reason: None,
                        at_ms: now_ms,
                    })?;
                    self.announce_status(agent_id.as_str(), AgentStatus::Idle, None)
                        .await;
                } else if status == AgentStatus::Idle && record.inactivity_ms(now_ms) < idle_ms {
                    // Tool calls resumed since the agent went idle
                    self.store.record(&Event::AgentStatusChanged {
                        agent_id: agent_id.clone(),
                        status: AgentStatus::Working,
                        reason: None,
                        at_ms: now_ms,
                    })?;
                    self.announce_status(agent_id.as_str(), AgentStatus::Working, None)
                        .await;
                }
            }
            AgentStatus::Disconnected => {
                if record.silence_ms(now_ms) >= self.policy.reap_threshold.as_millis() as u64 {
                    self.reap(&record).await?;
                } else if self.should_respawn(&record, now_ms) {
                    self.respawn(&record, now_ms).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn mark_disconnected(
        &self,
        record: &AgentRecord,
        now_ms: u64,
        reason: &str,
    ) -> Result<(), ReconcileError> {
        let agent_id = AgentId::new(&record.id);
        info!(agent_id = %record.id, reason, "agent disconnected");

        self.store.record(&Event::AgentStatusChanged {
            agent_id: agent_id.clone(),
            status: AgentStatus::Disconnected,
            reason: Some(reason.to_string()),
            at_ms: now_ms,
        })?;
        self.store.record(&Event::AgentFailureCounted {
            agent_id: agent_id.clone(),
            consecutive_failures: record.consecutive_failures + 1,
        })?;

        let envelope = Envelope::new(
            self.idgen.next(),
            EnvelopeKind::AgentSignal,
            "supervisor",
            record.id.as_str(),
            now_ms,
        )
        .with_priority(Priority::High)
        .with_payload(json!({"status": "disconnected", "reason": reason}));
        self.bus.publish(envelope).await;
        Ok(())
    }

    /// Drop a long-disconnected agent: release its tasks back to pending,
    /// remove the record, sweep artifacts.
    async fn reap(&self, record: &AgentRecord) -> Result<(), ReconcileError> {
        info!(agent_id = %record.id, "reaping disconnected agent");

        self.release_tasks(&record.id)?;
        self.store.record(&Event::AgentRemoved {
            agent_id: AgentId::new(&record.id),
        })?;
        self.backoff.lock().remove(&record.id);
        self.spawner.remove_artifacts(&record.id);

        let envelope = Envelope::new(
            self.idgen.next(),
            EnvelopeKind::AgentSignal,
            "supervisor",
            BROADCAST_TARGET,
            self.clock.epoch_ms(),
        )
        .with_payload(json!({"agent_id": record.id, "status": "removed"}));
        self.bus.publish(envelope).await;
        Ok(())
    }

    /// Walk a task back to pending through permitted edges.
    fn release_tasks(&self, agent_id: &str) -> Result<(), ReconcileError> {
        let tasks = self.store.read(|state| state.tasks_by_agent(agent_id));
        let now_ms = self.clock.epoch_ms();

        for mut task in tasks {
            if task.status.is_terminal() {
                continue;
            }
            // Each hop goes through the lattice; statuses deep in review
            // flow back via blocked.
            let mut hops = 0;
            while task.status != TaskStatus::Pending && hops < 4 {
                let next = match task.status {
                    TaskStatus::Assigned | TaskStatus::Blocked => TaskStatus::Pending,
                    TaskStatus::InProgress | TaskStatus::ChangesRequested => TaskStatus::Blocked,
                    TaskStatus::Review => TaskStatus::ChangesRequested,
                    _ => break,
                };
                if task.transition_to(next, now_ms).is_err() {
                    break;
                }
                hops += 1;
            }
            task.assignee = None;
            self.store.record(&Event::TaskUpdated { task })?;
        }
        Ok(())
    }

    /// A disconnected agent is respawned until its failure streak exceeds
    /// the give-up bound, with exponential backoff between attempts.
    fn should_respawn(&self, record: &AgentRecord, now_ms: u64) -> bool {
        if !self.policy.auto_respawn
            || self.policy.respawn_threshold == 0
            || record.consecutive_failures == 0
        {
            return false;
        }
        if record.consecutive_failures > self.policy.respawn_threshold {
            return false; // gave up on this agent
        }
        let backoff = self.backoff.lock();
        backoff
            .get(&record.id)
            .map(|b| now_ms >= b.not_before_ms)
            .unwrap_or(true)
    }

    async fn respawn(&self, record: &AgentRecord, now_ms: u64) -> Result<(), ReconcileError> {
        let team = self.team_snapshot();
        let Some(config) = team.get(&record.config_name).cloned() else {
            warn!(
                agent_id = %record.id,
                config = %record.config_name,
                "cannot respawn: roster entry gone"
            );
            return Ok(());
        };

        let agent_id = AgentId::new(&record.id);
        info!(
            agent_id = %record.id,
            attempt = record.restart_count + 1,
            "auto-respawning agent"
        );

        // Make sure the old process group is gone before relaunching
        self.spawner
            .stop(&record.id, record.pid, Duration::ZERO, true)
            .await;

        let attempts = {
            let mut backoff = self.backoff.lock();
            let entry = backoff.entry(record.id.clone()).or_default();
            entry.attempts += 1;
            let delay = backoff_delay(
                self.policy.respawn_backoff,
                self.policy.respawn_backoff_cap,
                entry.attempts,
            );
            entry.not_before_ms = now_ms + delay.as_millis() as u64;
            entry.attempts
        };

        match self
            .spawner
            .spawn(&config, &agent_id, &record.project_path, None)
            .await
        {
            Ok(pid) => {
                self.store.record(&Event::AgentRespawned {
                    agent_id: agent_id.clone(),
                    pid,
                    at_ms: now_ms,
                })?;
                self.announce_status(&record.id, AgentStatus::Starting, None)
                    .await;
            }
            Err(e) => {
                warn!(
                    agent_id = %record.id,
                    attempt = attempts,
                    error = %e,
                    "respawn failed, will back off"
                );
                // A failed attempt counts toward the give-up bound
                self.store.record(&Event::AgentFailureCounted {
                    agent_id: agent_id.clone(),
                    consecutive_failures: record.consecutive_failures + 1,
                })?;
            }
        }
        Ok(())
    }

    /// Stop one agent: shutdown request on the bus, grace, then the process
    /// group. The record is removed from the fleet. Idempotent.
    pub async fn stop_agent(&self, agent_id: &AgentId, force: bool) -> Result<(), ReconcileError> {
        let agent_lock = self.lock_for(agent_id.as_str());
        let _guard = agent_lock.lock().await;

        let Some(record) = self
            .store
            .read(|state| state.agents.get(agent_id.as_str()).cloned())
        else {
            // Repeat calls after removal succeed and change nothing
            self.spawner.remove_artifacts(agent_id.as_str());
            return Ok(());
        };

        if !force {
            let envelope = Envelope::new(
                self.idgen.next(),
                EnvelopeKind::Shutdown,
                "supervisor",
                agent_id.as_str(),
                self.clock.epoch_ms(),
            )
            .with_priority(Priority::High);
            self.bus.publish(envelope).await;
        }

        let grace = if force {
            Duration::ZERO
        } else {
            self.policy.stop_grace
        };
        self.spawner
            .stop(agent_id.as_str(), record.pid, grace, force)
            .await;

        self.release_tasks(agent_id.as_str())?;
        self.store.record(&Event::AgentRemoved {
            agent_id: agent_id.clone(),
        })?;
        self.backoff.lock().remove(agent_id.as_str());
        Ok(())
    }

    /// Stop the whole fleet, notifying every live agent first. Used by the
    /// graceful-shutdown sequence.
    pub async fn shutdown_fleet(&self) {
        let records: Vec<AgentRecord> = self.store.read(|state| {
            state
                .agents
                .values()
                .filter(|r| r.status.is_live())
                .cloned()
                .collect()
        });

        for record in &records {
            let envelope = Envelope::new(
                self.idgen.next(),
                EnvelopeKind::Shutdown,
                "supervisor",
                record.id.as_str(),
                self.clock.epoch_ms(),
            )
            .with_priority(Priority::Critical);
            self.bus.publish(envelope).await;
        }

        for record in records {
            self.spawner
                .stop(&record.id, record.pid, self.policy.stop_grace, false)
                .await;
        }
    }

    /// Post-recovery pass: converge recorded agents with the OS process
    /// table without waiting out a liveness window.
    pub async fn recover(&self) {
        let records: Vec<AgentRecord> = self
            .store
            .read(|state| state.agents.values().cloned().collect());
        let now_ms = self.clock.epoch_ms();

        for record in records {
            if !record.status.is_live() {
                continue;
            }
            let alive = record
                .pid
                .map(crate::instance::process_exists)
                .unwrap_or(false);
            if alive {
                info!(agent_id = %record.id, pid = ?record.pid, "re-adopting live agent");
                // Reset the liveness clock so recovery time is not counted
                // against the agent
                if let Err(e) = self.store.record(&Event::AgentHeartbeat {
                    agent_id: AgentId::new(&record.id),
                    status: None,
                    current_task: None,
                    metrics: None,
                    at_ms: now_ms,
                }) {
                    warn!(agent_id = %record.id, error = %e, "failed to re-adopt agent");
                }
            } else {
                info!(agent_id = %record.id, "agent died while supervisor was down");
                if let Err(e) = self
                    .mark_disconnected(&record, now_ms, "process gone at recovery")
                    .await
                {
                    warn!(agent_id = %record.id, error = %e, "failed to mark agent disconnected");
                }
            }
        }
    }

    /// Current fleet ids, for artifact sweeps.
    pub fn fleet_ids(&self) -> HashSet<String> {
        self.store.read(|state| state.agents.keys().cloned().collect())
    }

    async fn announce_status(&self, agent_id: &str, status: AgentStatus, reason: Option<String>) {
        let envelope = Envelope::new(
            self.idgen.next(),
            EnvelopeKind::StatusChange,
            "supervisor",
            BROADCAST_TARGET,
            self.clock.epoch_ms(),
        )
        .with_payload(json!({
            "agent_id": agent_id,
            "status": status.to_string(),
            "reason": reason,
        }));
        self.bus.publish(envelope).await;
    }
}

/// Exponential backoff with a ceiling: `base * 2^(attempts-1)`, capped.
fn backoff_delay(base: Duration, cap: Duration, attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1u32 << shift);
    delay.min(cap)
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
