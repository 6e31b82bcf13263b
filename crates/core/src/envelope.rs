// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus message envelope types.
//!
//! An envelope is one addressed message flowing through the event bus:
//! dashboard notifications, agent signals, alerts, shutdown requests. It is
//! immutable after creation apart from the single delivery stamp.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::id::EnvelopeId;

/// The broadcast target: every subscriber receives the envelope.
pub const BROADCAST_TARGET: &str = "all";

/// Category of a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Free-form message between participants.
    Message,
    /// Lifecycle signal about an agent (disconnect, respawn, shutdown notice).
    AgentSignal,
    /// Coarse status delta for the dashboard.
    StatusChange,
    /// Task created/transitioned.
    TaskUpdate,
    /// Alert raised by the alert engine.
    Alert,
    /// Stop-approval request awaiting a decision.
    Approval,
    /// Shutdown request addressed to an agent.
    Shutdown,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeKind::Message => "message",
            EnvelopeKind::AgentSignal => "agent_signal",
            EnvelopeKind::StatusChange => "status_change",
            EnvelopeKind::TaskUpdate => "task_update",
            EnvelopeKind::Alert => "alert",
            EnvelopeKind::Approval => "approval",
            EnvelopeKind::Shutdown => "shutdown",
        };
        write!(f, "{}", s)
    }
}

/// Delivery priority. The derived order puts `Critical` first, so sorting
/// ascending yields most-urgent-first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        write!(f, "{}", s)
    }
}

/// One addressed message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub kind: EnvelopeKind,
    /// Who published it: "supervisor", "captain", or an agent id.
    pub source: String,
    /// `"all"`, an agent id, or a role name.
    pub target: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at_ms: u64,
    /// Set exactly once when a pending-fetch consumer acknowledges delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at_ms: Option<u64>,
}

impl Envelope {
    pub fn new(
        id: impl Into<String>,
        kind: EnvelopeKind,
        source: impl Into<String>,
        target: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            source: source.into(),
            target: target.into(),
            priority: Priority::Normal,
            payload: serde_json::Value::Null,
            created_at_ms,
            delivered_at_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.target == BROADCAST_TARGET
    }

    /// Whether this envelope is visible to a subscriber of `target`.
    ///
    /// A broadcast envelope reaches everyone; a targeted envelope reaches
    /// subscribers of that exact target.
    pub fn visible_to(&self, target: &str) -> bool {
        self.is_broadcast() || self.target == target
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
