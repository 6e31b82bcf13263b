// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized world state built from event replay.
//!
//! `WorldState` is the supervisor's single source of truth once in memory:
//! fleet records, tasks, the durable envelope table, alerts, and thresholds.
//! Every mutation arrives as a [`shep_core::Event`]; applying the same event
//! twice is harmless, which makes WAL replay after a crash safe even when
//! the snapshot already contains some of the replayed entries.

use serde::{Deserialize, Serialize};
use shep_core::{
    AgentStatus, Alert, Envelope, EnvelopeKind, Event, Task, TaskStatus, Thresholds,
    BROADCAST_TARGET,
};
use std::collections::HashMap;

/// Materialized state built from WAL replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldState {
    /// agent_id → fleet record
    pub agents: HashMap<String, shep_core::AgentRecord>,
    /// task_id → task
    pub tasks: HashMap<String, Task>,
    /// envelope_id → durable bus envelope
    #[serde(default)]
    pub envelopes: HashMap<String, Envelope>,
    /// alert_id → alert
    #[serde(default)]
    pub alerts: HashMap<String, Alert>,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            agents: HashMap::new(),
            tasks: HashMap::new(),
            envelopes: HashMap::new(),
            alerts: HashMap::new(),
            thresholds: Thresholds::default(),
        }
    }
}

impl WorldState {
    /// Apply an event to the state.
    ///
    /// Replay-safe: unknown references are ignored with no effect rather
    /// than erroring, because a crash can leave the WAL with events whose
    /// preconditions were established in entries the snapshot already
    /// covers (or vice versa).
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::AgentRegistered { record } => {
                self.agents.insert(record.id.clone(), record.clone());
            }

            Event::AgentHeartbeat {
                agent_id,
                status,
                current_task,
                metrics,
                at_ms,
            } => {
                if let Some(record) = self.agents.get_mut(agent_id.as_str()) {
                    record.touch(*at_ms);
                    if let Some(status) = status {
                        record.set_status(*status, None);
                    }
                    if current_task.is_some() {
                        record.current_task = current_task.clone();
                    }
                    if let Some(metrics) = metrics {
                        record.metrics = metrics.clone();
                    }
                }
            }

            Event::AgentStatusChanged {
                agent_id,
                status,
                reason,
                at_ms,
            } => {
                if let Some(record) = self.agents.get_mut(agent_id.as_str()) {
                    record.set_status(*status, reason.clone());
                    if *status == AgentStatus::Working {
                        record.mark_activity(*at_ms);
                    }
                }
            }

            Event::AgentActivity { agent_id, at_ms } => {
                if let Some(record) = self.agents.get_mut(agent_id.as_str()) {
                    record.mark_activity(*at_ms);
                    record.touch(*at_ms);
                }
            }

            Event::AgentFailureCounted {
                agent_id,
                consecutive_failures,
            } => {
                if let Some(record) = self.agents.get_mut(agent_id.as_str()) {
                    record.consecutive_failures = *consecutive_failures;
                }
            }

            Event::AgentRespawned {
                agent_id,
                pid,
                at_ms,
            } => {
                if let Some(record) = self.agents.get_mut(agent_id.as_str()) {
                    record.pid = Some(*pid);
                    record.status = AgentStatus::Starting;
                    record.spawned_at_ms = *at_ms;
                    record.touch(*at_ms);
                    record.mark_activity(*at_ms);
                    record.restart_count += 1;
                    record.blocked_reason = None;
                    // The failure streak stays; only a heartbeat from the
                    // new process clears it
                }
            }

            Event::AgentRemoved { agent_id } => {
                self.agents.remove(agent_id.as_str());
            }

            Event::TaskAdded { task } | Event::TaskUpdated { task } => {
                self.tasks.insert(task.id.clone(), task.clone());
            }

            Event::TaskRemoved { task_id } => {
                self.tasks.remove(task_id.as_str());
            }

            Event::EnvelopePublished { envelope } => {
                self.envelopes.insert(envelope.id.clone(), envelope.clone());
            }

            Event::EnvelopeDelivered { envelope_id, at_ms } => {
                if let Some(envelope) = self.envelopes.get_mut(envelope_id) {
                    // The delivery stamp is set exactly once
                    if envelope.delivered_at_ms.is_none() {
                        envelope.delivered_at_ms = Some(*at_ms);
                    }
                }
            }

            Event::EnvelopesCompacted { before_ms } => {
                self.envelopes.retain(|_, envelope| {
                    envelope.delivered_at_ms.is_none() || envelope.created_at_ms >= *before_ms
                });
            }

            Event::AlertRaised { alert } => {
                self.alerts.insert(alert.id.clone(), alert.clone());
            }

            Event::AlertAcknowledged { alert_id } => {
                if let Some(alert) = self.alerts.get_mut(alert_id) {
                    alert.acknowledged = true;
                }
            }

            Event::ThresholdsUpdated { thresholds } => {
                self.thresholds = thresholds.clone();
            }

            // Control signal, never materialized
            Event::Shutdown => {}
        }
    }

    /// Undelivered envelopes visible to `target`, optionally filtered by
    /// kind, ordered by `(priority, created_at, id)`: most urgent first,
    /// FIFO within a priority.
    ///
    /// A query for `"all"` returns only broadcast envelopes; a query for a
    /// specific target returns its own envelopes plus broadcast traffic.
    pub fn pending_for(&self, target: &str, kinds: Option<&[EnvelopeKind]>) -> Vec<Envelope> {
        let mut pending: Vec<Envelope> = self
            .envelopes
            .values()
            .filter(|e| e.delivered_at_ms.is_none())
            .filter(|e| {
                if target == BROADCAST_TARGET {
                    e.is_broadcast()
                } else {
                    e.visible_to(target)
                }
            })
            .filter(|e| match kinds {
                Some(kinds) if !kinds.is_empty() => kinds.contains(&e.kind),
                _ => true,
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            (a.priority, a.created_at_ms, a.id.as_str())
                .cmp(&(b.priority, b.created_at_ms, b.id.as_str()))
        });
        pending
    }

    /// Tasks in `status`, in queue order.
    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
        tasks
    }

    /// Tasks assigned to an agent, in queue order.
    pub fn tasks_by_agent(&self, agent_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.assignee.as_deref() == Some(agent_id))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
        tasks
    }

    /// Fleet size per status, for the status endpoint.
    pub fn agent_counts(&self) -> HashMap<AgentStatus, usize> {
        let mut counts = HashMap::new();
        for record in self.agents.values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }

    /// Task count per status, for the status endpoint.
    pub fn task_counts(&self) -> HashMap<TaskStatus, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    /// Unacknowledged alerts, newest first.
    pub fn open_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .values()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        alerts
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
