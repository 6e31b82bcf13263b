//! The task state machine end to end: add, assign, walk to merged, and
//! rejection of transitions outside the lattice.

use crate::prelude::world;
use shep_core::{TaskConfig, TaskError, TaskStatus};

#[tokio::test]
async fn full_review_path_reaches_merged() {
    let w = world();

    let task = w
        .tasks
        .add(TaskConfig::builder("t-1", "t").priority(3).build())
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    w.tasks.assign("t-1", "alpha").await.unwrap();

    // Jumping straight to merged is rejected and mutates nothing
    let err = w.tasks.transition("t-1", TaskStatus::Merged).await.unwrap_err();
    assert_eq!(
        err,
        TaskError::InvalidTransition {
            from: TaskStatus::Assigned,
            to: TaskStatus::Merged,
        }
    );
    assert_eq!(w.tasks.get("t-1").unwrap().status, TaskStatus::Assigned);

    for to in [
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Approved,
        TaskStatus::Merged,
    ] {
        w.tasks.transition("t-1", to).await.unwrap();
    }

    let done = w.tasks.get("t-1").unwrap();
    assert_eq!(done.status, TaskStatus::Merged);
    assert!(done.completed_at_ms.is_some());

    // Merged is terminal
    let err = w.tasks.transition("t-1", TaskStatus::Pending).await.unwrap_err();
    assert!(matches!(err, TaskError::InvalidTransition { .. }));
}

#[tokio::test]
async fn changes_requested_loops_back_through_in_progress() {
    let w = world();
    w.tasks
        .add(TaskConfig::builder("t-1", "t").priority(2).build())
        .await
        .unwrap();

    w.tasks.assign("t-1", "alpha").await.unwrap();
    w.tasks.transition("t-1", TaskStatus::InProgress).await.unwrap();
    w.tasks.transition("t-1", TaskStatus::Review).await.unwrap();
    w.tasks
        .transition("t-1", TaskStatus::ChangesRequested)
        .await
        .unwrap();
    w.tasks.transition("t-1", TaskStatus::InProgress).await.unwrap();
    w.tasks.transition("t-1", TaskStatus::Review).await.unwrap();
    w.tasks.transition("t-1", TaskStatus::Approved).await.unwrap();
    w.tasks.transition("t-1", TaskStatus::Merged).await.unwrap();

    assert_eq!(w.tasks.get("t-1").unwrap().status, TaskStatus::Merged);
}

#[tokio::test]
async fn priority_boundaries() {
    let w = world();

    assert!(w
        .tasks
        .add(TaskConfig::builder("t-hi", "t").priority(1).build())
        .await
        .is_ok());
    assert!(w
        .tasks
        .add(TaskConfig::builder("t-lo", "t").priority(7).build())
        .await
        .is_ok());
    assert_eq!(
        w.tasks
            .add(TaskConfig::builder("t-0", "t").priority(0).build())
            .await
            .unwrap_err(),
        TaskError::PriorityOutOfRange(0)
    );
    assert_eq!(
        w.tasks
            .add(TaskConfig::builder("t-8", "t").priority(8).build())
            .await
            .unwrap_err(),
        TaskError::PriorityOutOfRange(8)
    );
}
