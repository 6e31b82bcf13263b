// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Singleton enforcement per state directory.
//!
//! The instance record (`supervisor.pid`) is JSON describing the running
//! supervisor. Readers treat a missing or unparseable record as "no
//! instance". A second supervisor starting against the same directory reads
//! the record, probes the recorded port's health endpoint, and either takes
//! over gracefully (request shutdown, wait for the port to free), aborts, or
//! clears a stale record. The record is written only after the new process
//! has confirmed its own HTTP bind with a local probe, and an `fs2`
//! exclusive lock on a sibling file closes the check-then-write race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// File name of the instance record inside the state directory.
pub const RECORD_FILE: &str = "supervisor.pid";

/// File name of the exclusive lock file.
pub const LOCK_FILE: &str = "supervisor.lock";

/// Health probe budget.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a takeover waits for the old instance to exit.
const TAKEOVER_WAIT: Duration = Duration::from_secs(10);

/// A record whose process no longer answers is abandoned after this age.
const STALE_RECORD_AGE: Duration = Duration::from_secs(15 * 60);

/// Errors from instance management.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("another supervisor is running (pid {pid}, port {port})")]
    LockContended { pid: u32, port: u16 },

    #[error("existing supervisor (pid {pid}) did not shut down within {waited:?}")]
    TakeoverFailed { pid: u32, waited: Duration },

    #[error("failed to acquire instance lock: {0}")]
    LockFailed(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk instance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub pid: u32,
    pub port: u16,
    /// RFC3339 start timestamp.
    pub start_time: DateTime<Utc>,
    pub base_path: PathBuf,
}

impl InstanceRecord {
    pub fn new(pid: u32, port: u16, base_path: PathBuf) -> Self {
        Self {
            pid,
            port,
            start_time: Utc::now(),
            base_path,
        }
    }

    /// Read a record, treating missing or unparseable files as absent.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// What `check_existing` found.
#[derive(Debug, Clone, PartialEq)]
pub enum Existing {
    None,
    Running {
        pid: u32,
        port: u16,
        start_time: DateTime<Utc>,
        responding: bool,
    },
}

/// How to resolve a conflict with a responding instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Request graceful shutdown and wait for the port to free.
    Takeover,
    /// Surface the conflict to the operator.
    Abort,
}

/// Outbound probe seam, faked in tests.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// True iff `GET /health` on 127.0.0.1:port answers 200 within budget.
    async fn is_healthy(&self, port: u16) -> bool;

    /// Ask the instance on `port` to shut down. True on a 200 response.
    async fn request_shutdown(&self, port: u16) -> bool;
}

/// Production probe over HTTP.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn is_healthy(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/health");
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn request_shutdown(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/shutdown");
        match self.client.post(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Held while this process owns the instance record.
///
/// The lock file handle keeps the `fs2` exclusive lock alive; `release`
/// removes the record. Dropping without `release` leaves the record for
/// stale-detection to clean up (crash semantics).
#[derive(Debug)]
pub struct InstanceLock {
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    record_path: PathBuf,
}

impl InstanceLock {
    /// Remove the instance record. Called before HTTP teardown so peers
    /// querying status see "not running" while the port drains.
    pub fn release(self) {
        if let Err(e) = std::fs::remove_file(&self.record_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove instance record");
            }
        }
    }
}

/// Manages the instance record and singleton lock for one state directory.
pub struct InstanceManager<P: HealthProbe = HttpProbe> {
    state_dir: PathBuf,
    probe: P,
}

impl InstanceManager<HttpProbe> {
    pub fn new(state_dir: PathBuf) -> Self {
        Self::with_probe(state_dir, HttpProbe::new())
    }
}

impl<P: HealthProbe> InstanceManager<P> {
    pub fn with_probe(state_dir: PathBuf, probe: P) -> Self {
        Self { state_dir, probe }
    }

    pub fn record_path(&self) -> PathBuf {
        self.state_dir.join(RECORD_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    /// Inspect the instance record and probe the recorded instance.
    pub async fn check_existing(&self) -> Existing {
        let Some(record) = InstanceRecord::load(&self.record_path()) else {
            return Existing::None;
        };

        let responding = self.probe.is_healthy(record.port).await;
        Existing::Running {
            pid: record.pid,
            port: record.port,
            start_time: record.start_time,
            responding,
        }
    }

    /// Resolve a conflict found by [`check_existing`].
    ///
    /// Responding instances are shut down gracefully (Takeover) or surfaced
    /// as [`InstanceError::LockContended`] (Abort). Non-responding records
    /// are removed when the process is gone or the record has gone stale;
    /// a live-but-unresponsive process is still treated as contention.
    pub async fn resolve(&self, existing: Existing, mode: ResolveMode) -> Result<(), InstanceError> {
        let Existing::Running {
            pid,
            port,
            start_time,
            responding,
        } = existing
        else {
            return Ok(());
        };

        if responding {
            match mode {
                ResolveMode::Abort => return Err(InstanceError::LockContended { pid, port }),
                ResolveMode::Takeover => {
                    info!(pid, port, "requesting graceful shutdown of existing supervisor");
                    if !self.probe.request_shutdown(port).await {
                        return Err(InstanceError::TakeoverFailed {
                            pid,
                            waited: Duration::ZERO,
                        });
                    }
                    return self.wait_for_exit(pid, port).await;
                }
            }
        }

        let age = Utc::now().signed_duration_since(start_time);
        let stale = age.num_seconds() >= STALE_RECORD_AGE.as_secs() as i64;
        if !process_exists(pid) || stale {
            warn!(pid, port, "removing stale instance record");
            if let Err(e) = std::fs::remove_file(self.record_path()) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(InstanceError::Io(e));
                }
            }
            Ok(())
        } else {
            // Alive, fresh, but not answering: do not steal the directory.
            Err(InstanceError::LockContended { pid, port })
        }
    }

    async fn wait_for_exit(&self, pid: u32, port: u16) -> Result<(), InstanceError> {
        let deadline = tokio::time::Instant::now() + TAKEOVER_WAIT;
        while tokio::time::Instant::now() < deadline {
            if !process_exists(pid) && !self.probe.is_healthy(port).await {
                // Old instance removed its own record on the way out; if it
                // crashed mid-shutdown the leftover record is ours to clear.
                let _ = std::fs::remove_file(self.record_path());
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Err(InstanceError::TakeoverFailed {
            pid,
            waited: TAKEOVER_WAIT,
        })
    }

    /// Take the exclusive lock and write the instance record.
    ///
    /// Must be called only after the HTTP bind has been confirmed by a
    /// local health probe; the record advertises a working endpoint.
    pub fn acquire(&self, record: InstanceRecord) -> Result<InstanceLock, InstanceError> {
        std::fs::create_dir_all(&self.state_dir)?;

        // Avoid truncating before the lock is held: the file may belong to
        // a live supervisor.
        let lock_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?;
        lock_file
            .try_lock_exclusive()
            .map_err(InstanceError::LockFailed)?;

        record.save(&self.record_path())?;

        Ok(InstanceLock {
            lock_file,
            record_path: self.record_path(),
        })
    }
}

/// Check if a process with the given PID exists.
pub fn process_exists(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 probes for existence without sending anything
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
