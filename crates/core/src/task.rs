// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task model and status transition lattice.

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub use crate::id::TaskId;

/// Highest task priority (most urgent).
pub const PRIORITY_HIGHEST: u8 = 1;
/// Lowest task priority.
pub const PRIORITY_LOWEST: u8 = 7;

/// Status of a task within the review workflow.
///
/// `Merged` is terminal; every other status has at least one outgoing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Review,
    ChangesRequested,
    Approved,
    Merged,
    Blocked,
}

impl TaskStatus {
    /// The set of statuses this status may transition to.
    pub fn permitted_next(&self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Pending => &[Assigned, Blocked],
            Assigned => &[InProgress, Pending, Blocked],
            InProgress => &[Review, Blocked, Assigned],
            Review => &[Approved, ChangesRequested],
            ChangesRequested => &[InProgress, Blocked],
            Approved => &[Merged],
            Merged => &[],
            Blocked => &[Pending, Assigned, InProgress],
        }
    }

    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        self.permitted_next().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Merged)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::ChangesRequested => "changes_requested",
            TaskStatus::Approved => "approved",
            TaskStatus::Merged => "merged",
            TaskStatus::Blocked => "blocked",
        };
        write!(f, "{}", s)
    }
}

/// Task domain errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("task title must not be empty")]
    EmptyTitle,

    #[error("priority {0} out of range ({PRIORITY_HIGHEST}..={PRIORITY_LOWEST})")]
    PriorityOutOfRange(u8),

    #[error("task not found: {0}")]
    NotFound(String),
}

/// Configuration for creating a new task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: u8,
    pub source: String,
    pub requirements: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl TaskConfig {
    pub fn builder(id: impl Into<String>, title: impl Into<String>) -> TaskConfigBuilder {
        TaskConfigBuilder {
            config: TaskConfig {
                id: id.into(),
                title: title.into(),
                description: String::new(),
                priority: 4,
                source: "api".to_string(),
                requirements: Vec::new(),
                metadata: HashMap::new(),
            },
        }
    }
}

pub struct TaskConfigBuilder {
    config: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.config.source = source.into();
        self
    }

    pub fn requirement(mut self, requirement: impl Into<String>) -> Self {
        self.config.requirements.push(requirement.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.config
    }
}

/// A unit of work tracked by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: u8,
    pub status: TaskStatus,
    /// Where the task came from ("api", "captain", an agent id, ...).
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
}

impl Task {
    /// Create a new pending task, validating title and priority.
    pub fn new(config: TaskConfig, clock: &impl Clock) -> Result<Self, TaskError> {
        Self::new_with_epoch_ms(config, clock.epoch_ms())
    }

    /// Create a new task with an explicit creation time (for replay).
    pub fn new_with_epoch_ms(config: TaskConfig, epoch_ms: u64) -> Result<Self, TaskError> {
        if config.title.trim().is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        if !(PRIORITY_HIGHEST..=PRIORITY_LOWEST).contains(&config.priority) {
            return Err(TaskError::PriorityOutOfRange(config.priority));
        }

        Ok(Self {
            id: config.id,
            title: config.title,
            description: config.description,
            priority: config.priority,
            status: TaskStatus::Pending,
            source: config.source,
            assignee: None,
            requirements: config.requirements,
            metadata: config.metadata,
            created_at_ms: epoch_ms,
            updated_at_ms: epoch_ms,
            started_at_ms: None,
            completed_at_ms: None,
        })
    }

    /// Move the task to `to`, enforcing the transition lattice.
    ///
    /// On success, `updated_at_ms` advances, `started_at_ms` is stamped on
    /// the first entry into `InProgress`, `completed_at_ms` on `Merged`,
    /// and the assignee is cleared when the task returns to `Pending`.
    pub fn transition_to(&mut self, to: TaskStatus, now_ms: u64) -> Result<(), TaskError> {
        if !self.status.can_transition_to(to) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.status = to;
        self.updated_at_ms = self.updated_at_ms.max(now_ms);
        match to {
            TaskStatus::InProgress => {
                if self.started_at_ms.is_none() {
                    self.started_at_ms = Some(now_ms);
                }
            }
            TaskStatus::Merged => {
                self.completed_at_ms = Some(now_ms);
            }
            TaskStatus::Pending => {
                self.assignee = None;
            }
            _ => {}
        }
        Ok(())
    }

    /// Ordering key for queue position: lower sorts first.
    pub fn queue_key(&self) -> (u8, u64, &str) {
        (self.priority, self.created_at_ms, &self.id)
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
