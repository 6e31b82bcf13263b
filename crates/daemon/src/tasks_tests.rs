// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use shep_core::{FakeClock, SequentialIdGen};
use shep_storage::{Wal, WorldState};

fn queue(dir: &tempfile::TempDir) -> (TaskQueue<FakeClock, SequentialIdGen>, Store, FakeClock) {
    let wal = Wal::open(&dir.path().join("events.wal")).unwrap();
    let store = Store::new(wal, WorldState::default());
    let clock = FakeClock::new();
    let bus = EventBus::new(Some(store.clone()), clock.clone());
    let queue = TaskQueue::new(
        store.clone(),
        bus,
        clock.clone(),
        SequentialIdGen::new("task"),
    );
    (queue, store, clock)
}

fn config(id: &str, title: &str, priority: u8) -> TaskConfig {
    TaskConfig::builder(id, title).priority(priority).build()
}

#[tokio::test]
async fn add_validates_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, store, _clock) = queue(&dir);

    let task = queue.add(config("t-1", "write parser", 3)).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(store.read(|s| s.tasks.contains_key("t-1")));

    let err = queue.add(config("t-2", "", 3)).await.unwrap_err();
    assert_eq!(err, TaskError::EmptyTitle);
    let err = queue.add(config("t-3", "x", 0)).await.unwrap_err();
    assert_eq!(err, TaskError::PriorityOutOfRange(0));
    let err = queue.add(config("t-4", "x", 8)).await.unwrap_err();
    assert_eq!(err, TaskError::PriorityOutOfRange(8));
}

#[tokio::test]
async fn add_generates_id_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, _store, _clock) = queue(&dir);

    let task = queue.add(config("", "auto id", 4)).await.unwrap();
    assert_eq!(task.id, "task-1");
}

#[tokio::test]
async fn peek_and_pop_follow_priority_then_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, _store, clock) = queue(&dir);

    queue.add(config("t-normal", "normal", 4)).await.unwrap();
    clock.advance(std::time::Duration::from_secs(1));
    queue.add(config("t-urgent", "urgent", 1)).await.unwrap();
    clock.advance(std::time::Duration::from_secs(1));
    queue.add(config("t-later", "same prio", 4)).await.unwrap();

    assert_eq!(queue.peek().unwrap().id, "t-urgent");

    let popped = queue.pop().await.unwrap();
    assert_eq!(popped.id, "t-urgent");
    // Pop removes it from the queue entirely
    assert!(queue.get("t-urgent").is_none());

    assert_eq!(queue.pop().await.unwrap().id, "t-normal");
    assert_eq!(queue.pop().await.unwrap().id, "t-later");
    assert!(queue.pop().await.is_none());
}

#[tokio::test]
async fn transition_walks_the_lattice() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, _store, _clock) = queue(&dir);
    queue.add(config("t-1", "work", 3)).await.unwrap();

    queue.assign("t-1", "alpha").await.unwrap();
    for to in [
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Approved,
        TaskStatus::Merged,
    ] {
        queue.transition("t-1", to).await.unwrap();
    }

    let task = queue.get("t-1").unwrap();
    assert_eq!(task.status, TaskStatus::Merged);
    assert!(task.completed_at_ms.is_some());
}

#[tokio::test]
async fn invalid_transition_is_rejected_without_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, _store, _clock) = queue(&dir);
    queue.add(config("t-1", "work", 3)).await.unwrap();
    queue.assign("t-1", "alpha").await.unwrap();

    let err = queue
        .transition("t-1", TaskStatus::Merged)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TaskError::InvalidTransition {
            from: TaskStatus::Assigned,
            to: TaskStatus::Merged,
        }
    );
    assert_eq!(queue.get("t-1").unwrap().status, TaskStatus::Assigned);
}

#[tokio::test]
async fn transition_unknown_task_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, _store, _clock) = queue(&dir);
    let err = queue
        .transition("ghost", TaskStatus::Assigned)
        .await
        .unwrap_err();
    assert_eq!(err, TaskError::NotFound("ghost".to_string()));
}

#[tokio::test]
async fn update_checks_embedded_status_change() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, _store, _clock) = queue(&dir);
    queue.add(config("t-1", "work", 3)).await.unwrap();

    // Title edit without a status change passes through
    let mut edited = queue.get("t-1").unwrap();
    edited.title = "write the parser".to_string();
    let updated = queue.update(edited).await.unwrap();
    assert_eq!(updated.title, "write the parser");

    // An update that jumps the lattice is rejected
    let mut illegal = queue.get("t-1").unwrap();
    illegal.status = TaskStatus::Merged;
    let err = queue.update(illegal).await.unwrap_err();
    assert!(matches!(err, TaskError::InvalidTransition { .. }));

    // A legal embedded status change is accepted
    let mut legal = queue.get("t-1").unwrap();
    legal.status = TaskStatus::Blocked;
    queue.update(legal).await.unwrap();
    assert_eq!(queue.get("t-1").unwrap().status, TaskStatus::Blocked);
}

#[tokio::test]
async fn views_by_status_and_agent() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, _store, _clock) = queue(&dir);
    queue.add(config("t-1", "one", 2)).await.unwrap();
    queue.add(config("t-2", "two", 5)).await.unwrap();
    queue.assign("t-2", "alpha").await.unwrap();

    let pending = queue.get_by_status(TaskStatus::Pending);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "t-1");

    let alphas = queue.get_by_agent("alpha");
    assert_eq!(alphas.len(), 1);
    assert_eq!(alphas[0].id, "t-2");
    assert_eq!(alphas[0].status, TaskStatus::Assigned);
}

#[tokio::test]
async fn remove_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (queue, store, _clock) = queue(&dir);
    queue.add(config("t-1", "one", 2)).await.unwrap();

    queue.remove("t-1");
    queue.remove("t-1");
    queue.remove("never-existed");
    assert!(store.read(|s| s.tasks.is_empty()));
}

#[tokio::test]
async fn mutations_survive_restart_via_replay() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("events.wal");

    {
        let (queue, store, _clock) = {
            let wal = Wal::open(&wal_path).unwrap();
            let store = Store::new(wal, WorldState::default());
            let clock = FakeClock::new();
            let bus = EventBus::new(Some(store.clone()), clock.clone());
            (
                TaskQueue::new(store.clone(), bus, clock.clone(), SequentialIdGen::new("task")),
                store,
                clock,
            )
        };
        queue.add(config("t-1", "survives", 2)).await.unwrap();
        queue.assign("t-1", "alpha").await.unwrap();
        store.flush().unwrap();
    }

    // Rehydrate from the WAL alone
    let mut wal = Wal::open(&wal_path).unwrap();
    let mut state = WorldState::default();
    for entry in wal.entries_after(0).unwrap() {
        state.apply_event(&entry.event);
    }
    let task = &state.tasks["t-1"];
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assignee.as_deref(), Some("alpha"));
}

#[tokio::test]
async fn task_updates_announce_on_the_bus() {
    let dir = tempfile::tempdir().unwrap();
    let wal = Wal::open(&dir.path().join("events.wal")).unwrap();
    let store = Store::new(wal, WorldState::default());
    let clock = FakeClock::new();
    let bus: EventBus<FakeClock> = EventBus::new(Some(store.clone()), clock.clone());
    let queue = TaskQueue::new(store, bus.clone(), clock, SequentialIdGen::new("task"));

    queue.add(config("t-1", "one", 2)).await.unwrap();
    let mut updates = bus.subscribe("alpha", &[EnvelopeKind::TaskUpdate]);
    queue.assign("t-1", "alpha").await.unwrap();

    let envelope = updates.recv().await.unwrap();
    assert_eq!(envelope.kind, EnvelopeKind::TaskUpdate);
    assert_eq!(envelope.payload["task_id"], "t-1");
    assert_eq!(envelope.payload["status"], "assigned");
}
