// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Team roster and project registry configuration.
//!
//! Both documents are TOML, loaded at startup and atomically replaced on
//! reload. Readers hold an `Arc` snapshot; a failed reload leaves the old
//! config in place.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors; all fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_run() -> String {
    "claude".to_string()
}

/// One roster entry: everything needed to spawn and prompt an agent.
///
/// Read-only at spawn time; a reload replaces the whole roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub role: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// System prompt template. `{agent_id}`, `{role}`, `{project}`, and
    /// `{supervisor_url}` are interpolated at spawn time.
    pub prompt_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,
    /// Tool whitelist advertised to the agent; empty means unrestricted.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Base command used to launch the agent process.
    #[serde(default = "default_run")]
    pub run: String,
    /// Emit a sidecar script that posts heartbeats for agents whose
    /// primary transport is unavailable.
    #[serde(default)]
    pub heartbeat_helper: bool,
}

/// The agent roster plus the designated orchestrator entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Name of the roster entry acting as orchestrator. The supervisor does
    /// not spawn this entry; it is an ordinary control-plane client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captain: Option<String>,
    #[serde(default, rename = "agent")]
    pub agents: Vec<AgentConfig>,
}

impl TeamConfig {
    /// Load and validate a team config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: TeamConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn get(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::Invalid("agent name must not be empty".into()));
            }
            if agent.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' has an empty model",
                    agent.name
                )));
            }
            if agent.role.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' has an empty role",
                    agent.name
                )));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
        }
        if let Some(captain) = &self.captain {
            if self.get(captain).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "captain '{}' is not in the roster",
                    captain
                )));
            }
        }
        Ok(())
    }
}

/// One registered project agents can be spawned into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub project_id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The project registry document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectRegistry {
    #[serde(default, rename = "project")]
    pub projects: Vec<ProjectEntry>,
}

impl ProjectRegistry {
    /// Load and validate a project registry from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let registry: ProjectRegistry =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            })?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn get(&self, project_id: &str) -> Option<&ProjectEntry> {
        self.projects.iter().find(|p| p.project_id == project_id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for project in &self.projects {
            if project.project_id.trim().is_empty() {
                return Err(ConfigError::Invalid("project_id must not be empty".into()));
            }
            if !seen.insert(project.project_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate project_id '{}'",
                    project.project_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
