// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use shep_core::TaskStatus;

fn status_of(e: RpcError) -> StatusCode {
    error_response(e).status()
}

#[test]
fn error_statuses_follow_category() {
    assert_eq!(
        status_of(RpcError::ToolNotFound("x".into())),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status_of(RpcError::AgentNotFound("x".into())),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status_of(RpcError::Task(shep_core::TaskError::NotFound("t".into()))),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status_of(RpcError::Task(shep_core::TaskError::InvalidTransition {
            from: TaskStatus::Assigned,
            to: TaskStatus::Merged,
        })),
        StatusCode::CONFLICT
    );
    assert_eq!(
        status_of(RpcError::Task(shep_core::TaskError::EmptyTitle)),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status_of(RpcError::InvalidArgs("bad".into())),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status_of(RpcError::DeadlineExceeded),
        StatusCode::GATEWAY_TIMEOUT
    );
    assert_eq!(
        status_of(RpcError::Internal("x".into())),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn spawn_errors_are_client_errors() {
    use crate::spawner::SpawnError;
    assert_eq!(
        status_of(RpcError::Spawn(SpawnError::ConfigMissing("c".into()))),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status_of(RpcError::Spawn(SpawnError::PathInvalid("/x".into()))),
        StatusCode::BAD_REQUEST
    );
}
