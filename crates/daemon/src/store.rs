// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared handle to the durable store: WAL plus materialized world state.
//!
//! `record()` is the single mutation path for the whole daemon: the event is
//! appended to the WAL (buffered, group-committed by the flush task) and
//! applied to the in-memory state in one step. Readers take a short lock
//! through `read()`. Neither lock is ever held across an await point or a
//! spawner call.

use parking_lot::Mutex;
use shep_core::Event;
use shep_storage::{Snapshot, SnapshotError, Wal, WalError, WorldState};
use std::path::Path;
use std::sync::Arc;

/// Shared store handle. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    wal: Arc<Mutex<Wal>>,
    state: Arc<Mutex<WorldState>>,
}

impl Store {
    pub fn new(wal: Wal, state: WorldState) -> Self {
        Self {
            wal: Arc::new(Mutex::new(wal)),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Append an event to the WAL and apply it to the world state.
    ///
    /// Returns the assigned WAL sequence number. The WAL write is buffered;
    /// durability arrives with the next group-commit flush.
    pub fn record(&self, event: &Event) -> Result<u64, WalError> {
        let seq = {
            let mut wal = self.wal.lock();
            wal.append(event)?
        };
        self.state.lock().apply_event(event);
        Ok(seq)
    }

    /// Run a closure against a read snapshot of the state.
    pub fn read<R>(&self, f: impl FnOnce(&WorldState) -> R) -> R {
        let state = self.state.lock();
        f(&state)
    }

    /// Clone the full state (for snapshotting off the lock).
    pub fn state_clone(&self) -> WorldState {
        self.state.lock().clone()
    }

    /// Highest WAL sequence number assigned so far.
    pub fn seq(&self) -> u64 {
        self.wal.lock().write_seq()
    }

    /// Whether the WAL has buffered entries due for a flush.
    pub fn needs_flush(&self) -> bool {
        self.wal.lock().needs_flush()
    }

    /// Flush buffered WAL entries to disk with a single fsync.
    pub fn flush(&self) -> Result<(), WalError> {
        self.wal.lock().flush()
    }

    /// Write a durable snapshot at the current sequence, then truncate the
    /// WAL behind it. Called by the checkpoint task and at shutdown.
    pub fn checkpoint(&self, snapshot_path: &Path) -> Result<u64, SnapshotError> {
        self.flush().map_err(wal_to_snapshot_err)?;
        let (seq, state) = {
            let wal = self.wal.lock();
            (wal.write_seq(), self.state.lock().clone())
        };
        Snapshot::new(seq, state).save(snapshot_path)?;

        // Snapshot is durable (including directory fsync); the WAL prefix
        // may now be dropped.
        let mut wal = self.wal.lock();
        wal.truncate_before(seq + 1).map_err(wal_to_snapshot_err)?;
        Ok(seq)
    }
}

fn wal_to_snapshot_err(e: WalError) -> SnapshotError {
    match e {
        WalError::Io(io) => SnapshotError::Io(io),
        WalError::Json(json) => SnapshotError::Json(json),
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
