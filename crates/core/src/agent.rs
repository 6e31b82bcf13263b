// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent identity, status machine, and fleet record types.
//!
//! An agent is an externally-spawned CLI process. The supervisor only ever
//! observes it through heartbeats and tool calls; `AgentRecord` is the
//! supervisor-side projection of that process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use crate::id::AgentId;

/// Lifecycle status of a supervised agent.
///
/// Transitions are owned by the reconciler: `Starting` on spawn, `Working`
/// on first heartbeat, `Idle` when no activity for the idle threshold,
/// `Blocked` when the agent reports it, `Disconnected` when heartbeats stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Working,
    Idle,
    Blocked,
    Disconnected,
}

impl AgentStatus {
    /// True while a live child process is expected to exist for the agent.
    pub fn is_live(&self) -> bool {
        !matches!(self, AgentStatus::Disconnected)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Starting => write!(f, "starting"),
            AgentStatus::Working => write!(f, "working"),
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Blocked => write!(f, "blocked"),
            AgentStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Point-in-time metrics an agent reports alongside heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    #[serde(default)]
    pub failed_tests: u32,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub consecutive_rejects: u32,
    /// Epoch ms when the agent last went idle, if it currently is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_since_ms: Option<u64>,
}

/// Supervisor-side record of one fleet member.
///
/// Invariants maintained by the mutation helpers:
/// - `pid` is `Some` exactly while `status.is_live()`
/// - `last_seen_ms` never decreases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    /// Name of the roster entry this agent was spawned from.
    pub config_name: String,
    pub role: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub project_path: PathBuf,
    pub spawned_at_ms: u64,
    pub last_seen_ms: u64,
    /// Epoch ms of the last tool call or task progress (heartbeats alone
    /// do not count as activity for idleness detection).
    #[serde(default)]
    pub last_activity_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub metrics: AgentMetrics,
}

impl AgentRecord {
    /// Create a record for a freshly spawned agent in `Starting` status.
    pub fn spawned(
        id: &AgentId,
        config_name: impl Into<String>,
        role: impl Into<String>,
        model: impl Into<String>,
        color: Option<String>,
        pid: u32,
        project_path: PathBuf,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.to_string(),
            config_name: config_name.into(),
            role: role.into(),
            model: model.into(),
            color,
            status: AgentStatus::Starting,
            pid: Some(pid),
            project_path,
            spawned_at_ms: now_ms,
            last_seen_ms: now_ms,
            last_activity_ms: now_ms,
            current_task: None,
            consecutive_failures: 0,
            restart_count: 0,
            blocked_reason: None,
            metrics: AgentMetrics::default(),
        }
    }

    /// Update the liveness timestamp, keeping it monotonic.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_seen_ms = self.last_seen_ms.max(now_ms);
    }

    /// Record activity (tool call or task progress) for idleness tracking.
    pub fn mark_activity(&mut self, now_ms: u64) {
        self.last_activity_ms = self.last_activity_ms.max(now_ms);
    }

    /// Apply a status transition, keeping the pid/status invariant.
    pub fn set_status(&mut self, status: AgentStatus, reason: Option<String>) {
        self.status = status;
        self.blocked_reason = match status {
            AgentStatus::Blocked => reason,
            _ => None,
        };
        if !status.is_live() {
            self.pid = None;
        }
    }

    /// Milliseconds since the last heartbeat.
    pub fn silence_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_seen_ms)
    }

    /// Milliseconds since the last observed activity.
    pub fn inactivity_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
