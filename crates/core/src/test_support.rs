// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixture builders shared by this crate's tests and, behind the
//! `test-support` feature, by other crates' tests.

// Fixtures are test code even when compiled via the feature flag
#![allow(clippy::unwrap_used)]

use crate::agent::{AgentId, AgentRecord};
use crate::config::AgentConfig;
use crate::task::{Task, TaskConfig};

/// An agent record in `Starting` status with plausible defaults.
pub fn agent_record(id: &str, now_ms: u64) -> AgentRecord {
    AgentRecord::spawned(
        &AgentId::new(id),
        "builder",
        "engineer",
        "sonnet",
        Some("cyan".to_string()),
        4242,
        "/tmp/project".into(),
        now_ms,
    )
}

/// A pending task with the given priority.
pub fn task(id: &str, priority: u8, now_ms: u64) -> Task {
    Task::new_with_epoch_ms(
        TaskConfig::builder(id, format!("task {}", id))
            .priority(priority)
            .build(),
        now_ms,
    )
    .unwrap()
}

/// A minimal roster entry named `name`.
pub fn agent_config(name: &str) -> AgentConfig {
    AgentConfig {
        name: name.to_string(),
        role: "engineer".to_string(),
        model: "sonnet".to_string(),
        color: None,
        prompt_template: "You are {role} working in {project}. Report to {supervisor_url} as {agent_id}.".to_string(),
        initial_prompt: None,
        tools: vec!["read".to_string(), "edit".to_string()],
        run: "claude".to_string(),
        heartbeat_helper: false,
    }
}
