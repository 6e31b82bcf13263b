//! Behavioral specifications for the shepherd supervisor.
//!
//! These tests are in-process and cross-crate: they wire the daemon's
//! components together the way `shepd` does and verify the end-to-end
//! scenarios the system promises (heartbeat timeout, bus backpressure,
//! the task lattice, alert dedup, restart recovery).

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/heartbeat.rs"]
mod heartbeat;

#[path = "specs/backpressure.rs"]
mod backpressure;

#[path = "specs/task_flow.rs"]
mod task_flow;

#[path = "specs/alert_dedup.rs"]
mod alert_dedup;

#[path = "specs/persistence.rs"]
mod persistence;
