// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert records and the thresholds they are evaluated against.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::id::AlertId;

/// What condition the alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FailedTests,
    IdleTimeout,
    TokenUsage,
    ConsecutiveRejects,
    AgentDisconnected,
    AgentBlocked,
    EscalationQueue,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::FailedTests => "failed_tests",
            AlertKind::IdleTimeout => "idle_timeout",
            AlertKind::TokenUsage => "token_usage",
            AlertKind::ConsecutiveRejects => "consecutive_rejects",
            AlertKind::AgentDisconnected => "agent_disconnected",
            AlertKind::AgentBlocked => "agent_blocked",
            AlertKind::EscalationQueue => "escalation_queue",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One raised alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub created_at_ms: u64,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        id: impl Into<String>,
        kind: AlertKind,
        agent_id: Option<String>,
        severity: Severity,
        message: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            agent_id,
            severity,
            message: message.into(),
            created_at_ms,
            acknowledged: false,
        }
    }

    /// Deterministic key identifying the alert class for cooldown
    /// suppression, e.g. `failed_tests_alpha` or `escalation_queue`.
    pub fn dedup_key(&self) -> String {
        dedup_key(self.kind, self.agent_id.as_deref())
    }
}

/// Dedup key for a (kind, agent) pair without building an `Alert` first.
pub fn dedup_key(kind: AlertKind, agent_id: Option<&str>) -> String {
    match agent_id {
        Some(agent) => format!("{}_{}", kind, agent),
        None => kind.to_string(),
    }
}

/// Alert thresholds. A threshold of 0 disables its check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub failed_tests_max: u32,
    #[serde(default)]
    pub idle_time_max_seconds: u64,
    #[serde(default)]
    pub token_usage_max: u64,
    #[serde(default)]
    pub consecutive_rejects_max: u32,
    #[serde(default)]
    pub escalation_queue_max: u32,
    /// Re-emission suppression window for identical dedup keys.
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
}

fn default_cooldown() -> u64 {
    300
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            failed_tests_max: 5,
            idle_time_max_seconds: 1800,
            token_usage_max: 0,
            consecutive_rejects_max: 3,
            escalation_queue_max: 5,
            cooldown_seconds: default_cooldown(),
        }
    }
}

#[cfg(test)]
#[path = "alert_tests.rs"]
mod tests;
