// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// A PID that does not exist: PID_MAX on Linux defaults well below this.
const DEAD_PID: u32 = 3_999_999;

#[derive(Default)]
struct FakeProbe {
    healthy: Arc<AtomicBool>,
    shutdown_accepted: Arc<AtomicBool>,
    shutdown_requests: Arc<AtomicU32>,
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn is_healthy(&self, _port: u16) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn request_shutdown(&self, _port: u16) -> bool {
        self.shutdown_requests.fetch_add(1, Ordering::SeqCst);
        if self.shutdown_accepted.load(Ordering::SeqCst) {
            // The fake instance "exits" immediately
            self.healthy.store(false, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

fn manager(dir: &tempfile::TempDir, probe: FakeProbe) -> InstanceManager<FakeProbe> {
    InstanceManager::with_probe(dir.path().to_owned(), probe)
}

fn write_record(dir: &tempfile::TempDir, record: &InstanceRecord) {
    std::fs::write(
        dir.path().join(RECORD_FILE),
        serde_json::to_vec(record).unwrap(),
    )
    .unwrap();
}

#[tokio::test]
async fn no_record_means_no_instance() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, FakeProbe::default());
    assert_eq!(manager.check_existing().await, Existing::None);
}

#[tokio::test]
async fn unparseable_record_means_no_instance() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(RECORD_FILE), "{garbage").unwrap();
    let manager = manager(&dir, FakeProbe::default());
    assert_eq!(manager.check_existing().await, Existing::None);
}

#[tokio::test]
async fn responding_instance_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let probe = FakeProbe::default();
    probe.healthy.store(true, Ordering::SeqCst);
    let manager = manager(&dir, probe);
    write_record(&dir, &InstanceRecord::new(42, 3000, dir.path().to_owned()));

    match manager.check_existing().await {
        Existing::Running {
            pid,
            port,
            responding,
            ..
        } => {
            assert_eq!(pid, 42);
            assert_eq!(port, 3000);
            assert!(responding);
        }
        other => panic!("expected running, got {other:?}"),
    }
}

#[tokio::test]
async fn resolve_none_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, FakeProbe::default());
    manager
        .resolve(Existing::None, ResolveMode::Takeover)
        .await
        .unwrap();
}

#[tokio::test]
async fn resolve_abort_surfaces_contention() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, FakeProbe::default());
    let existing = Existing::Running {
        pid: 42,
        port: 3000,
        start_time: chrono::Utc::now(),
        responding: true,
    };

    let err = manager
        .resolve(existing, ResolveMode::Abort)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InstanceError::LockContended { pid: 42, port: 3000 }
    ));
}

#[tokio::test]
async fn takeover_requests_shutdown_and_waits_for_exit() {
    let dir = tempfile::tempdir().unwrap();
    let probe = FakeProbe::default();
    probe.healthy.store(true, Ordering::SeqCst);
    probe.shutdown_accepted.store(true, Ordering::SeqCst);
    let requests = Arc::clone(&probe.shutdown_requests);
    let manager = manager(&dir, probe);
    write_record(
        &dir,
        &InstanceRecord::new(DEAD_PID, 3000, dir.path().to_owned()),
    );

    let existing = manager.check_existing().await;
    manager
        .resolve(existing, ResolveMode::Takeover)
        .await
        .unwrap();

    assert_eq!(requests.load(Ordering::SeqCst), 1);
    // The old record is cleared on the way in
    assert!(!dir.path().join(RECORD_FILE).exists());
}

#[tokio::test]
async fn takeover_fails_when_shutdown_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let probe = FakeProbe::default();
    probe.healthy.store(true, Ordering::SeqCst);
    let manager = manager(&dir, probe);

    let existing = Existing::Running {
        pid: DEAD_PID,
        port: 3000,
        start_time: chrono::Utc::now(),
        responding: true,
    };
    let err = manager
        .resolve(existing, ResolveMode::Takeover)
        .await
        .unwrap_err();
    assert!(matches!(err, InstanceError::TakeoverFailed { .. }));
}

#[tokio::test]
async fn dead_process_record_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, FakeProbe::default());
    write_record(
        &dir,
        &InstanceRecord::new(DEAD_PID, 3000, dir.path().to_owned()),
    );

    let existing = manager.check_existing().await;
    manager
        .resolve(existing, ResolveMode::Takeover)
        .await
        .unwrap();
    assert!(!dir.path().join(RECORD_FILE).exists());
}

#[tokio::test]
async fn live_unresponsive_fresh_record_is_contended() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, FakeProbe::default());
    // Our own PID is definitely alive and the record is fresh
    let record = InstanceRecord::new(std::process::id(), 3000, dir.path().to_owned());
    write_record(&dir, &record);

    let existing = manager.check_existing().await;
    let err = manager
        .resolve(existing, ResolveMode::Takeover)
        .await
        .unwrap_err();
    assert!(matches!(err, InstanceError::LockContended { .. }));
}

#[tokio::test]
async fn acquire_writes_record_and_release_removes_it() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, FakeProbe::default());
    let record = InstanceRecord::new(std::process::id(), 3100, dir.path().to_owned());

    let lock = manager.acquire(record.clone()).unwrap();
    let loaded = InstanceRecord::load(&manager.record_path()).unwrap();
    assert_eq!(loaded, record);

    lock.release();
    assert!(InstanceRecord::load(&manager.record_path()).is_none());
}

#[tokio::test]
async fn second_acquire_fails_while_lock_held() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&dir, FakeProbe::default());
    let record = InstanceRecord::new(std::process::id(), 3100, dir.path().to_owned());

    let _lock = manager.acquire(record.clone()).unwrap();
    let err = manager.acquire(record).unwrap_err();
    assert!(matches!(err, InstanceError::LockFailed(_)));
}

#[test]
fn process_exists_detects_self() {
    assert!(process_exists(std::process::id()));
    assert!(!process_exists(DEAD_PID));
}
