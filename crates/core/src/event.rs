// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain events for the supervisor system.
//!
//! Every durable state mutation is expressed as one of these events,
//! appended to the write-ahead log and applied to the world state. Replaying
//! the log from a snapshot reconstructs the exact state at crash time.
//!
//! Serializes with `{"type": "entity:action", ...fields}` format.

use crate::agent::{AgentId, AgentMetrics, AgentRecord, AgentStatus};
use crate::alert::{Alert, Thresholds};
use crate::envelope::Envelope;
use crate::task::{Task, TaskId};
use serde::{Deserialize, Serialize};

/// Events that mutate the supervisor's world state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- agent --
    #[serde(rename = "agent:registered")]
    AgentRegistered { record: AgentRecord },

    #[serde(rename = "agent:heartbeat")]
    AgentHeartbeat {
        agent_id: AgentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<AgentStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_task: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metrics: Option<AgentMetrics>,
        at_ms: u64,
    },

    #[serde(rename = "agent:status")]
    AgentStatusChanged {
        agent_id: AgentId,
        status: AgentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        at_ms: u64,
    },

    /// Tool call or task progress observed; feeds idleness detection.
    #[serde(rename = "agent:activity")]
    AgentActivity { agent_id: AgentId, at_ms: u64 },

    #[serde(rename = "agent:failure")]
    AgentFailureCounted {
        agent_id: AgentId,
        consecutive_failures: u32,
    },

    #[serde(rename = "agent:respawned")]
    AgentRespawned {
        agent_id: AgentId,
        pid: u32,
        at_ms: u64,
    },

    #[serde(rename = "agent:removed")]
    AgentRemoved { agent_id: AgentId },

    // -- task --
    #[serde(rename = "task:added")]
    TaskAdded { task: Task },

    /// Whole-record replacement; transition legality is checked before the
    /// event is recorded, never during replay.
    #[serde(rename = "task:updated")]
    TaskUpdated { task: Task },

    #[serde(rename = "task:removed")]
    TaskRemoved { task_id: TaskId },

    // -- envelope (durable bus layer) --
    #[serde(rename = "envelope:published")]
    EnvelopePublished { envelope: Envelope },

    #[serde(rename = "envelope:delivered")]
    EnvelopeDelivered { envelope_id: String, at_ms: u64 },

    /// Drop delivered envelopes created before the cutoff.
    #[serde(rename = "envelope:compacted")]
    EnvelopesCompacted { before_ms: u64 },

    // -- alert --
    #[serde(rename = "alert:raised")]
    AlertRaised { alert: Alert },

    #[serde(rename = "alert:acknowledged")]
    AlertAcknowledged { alert_id: String },

    #[serde(rename = "thresholds:updated")]
    ThresholdsUpdated { thresholds: Thresholds },

    /// Control signal; never applied to state and never replayed.
    #[serde(rename = "shutdown")]
    Shutdown,
}

impl Event {
    /// The agent this event concerns, if any.
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Event::AgentHeartbeat { agent_id, .. }
            | Event::AgentStatusChanged { agent_id, .. }
            | Event::AgentActivity { agent_id, .. }
            | Event::AgentFailureCounted { agent_id, .. }
            | Event::AgentRespawned { agent_id, .. }
            | Event::AgentRemoved { agent_id } => Some(agent_id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
