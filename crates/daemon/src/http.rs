// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: health, shutdown, status, and the tool RPC routes.
//!
//! Everything the supervisor serves rides this router. `/health` answers
//! probes from peers and from the instance manager's own bind check;
//! `/shutdown` is accepted from loopback peers only and triggers the
//! graceful-shutdown sequence via the root cancellation token.

use crate::rpc::{
    HeartbeatParams, NotifyShutdownParams, PendingParams, ReportStatusParams,
    ResolveApprovalParams, RpcError, RpcSurface, StopApprovalParams, ToolCallParams,
};
use crate::store::Store;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use shep_core::{Clock, IdGen, SystemClock, UuidIdGen};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared context for all HTTP handlers.
pub struct HttpCtx<C: Clock = SystemClock, G: IdGen = UuidIdGen> {
    pub rpc: Arc<RpcSurface<C, G>>,
    pub store: Store,
    pub bus: crate::bus::EventBus<C>,
    pub port: u16,
    pub start_time: Instant,
    pub shutdown: CancellationToken,
}

/// Map RPC errors onto HTTP statuses per the error-category contract:
/// 400 client, 404 not found, 409 conflict/invalid transition, 500 other.
fn error_response(e: RpcError) -> Response {
    let status = match &e {
        RpcError::ToolNotFound(_) | RpcError::AgentNotFound(_) => StatusCode::NOT_FOUND,
        RpcError::Task(shep_core::TaskError::NotFound(_)) => StatusCode::NOT_FOUND,
        RpcError::Task(shep_core::TaskError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        RpcError::Task(_) | RpcError::InvalidArgs(_) => StatusCode::BAD_REQUEST,
        RpcError::Spawn(_) => StatusCode::BAD_REQUEST,
        RpcError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        RpcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": e.to_string()}))).into_response()
}

fn ok_json(value: serde_json::Value) -> Response {
    Json(value).into_response()
}

/// Build the axum `Router` with all supervisor routes.
pub fn build_router<C: Clock + 'static, G: IdGen + 'static>(ctx: Arc<HttpCtx<C, G>>) -> Router {
    Router::new()
        // Probes (no auth)
        .route("/health", get(health::<C, G>))
        .route("/status", get(status::<C, G>))
        // Control
        .route("/shutdown", post(shutdown::<C, G>))
        // Tool surface
        .route("/rpc/heartbeat", post(heartbeat::<C, G>))
        .route("/rpc/report_status", post(report_status::<C, G>))
        .route("/rpc/tool_call", post(tool_call::<C, G>))
        .route("/rpc/request_stop_approval", post(request_stop_approval::<C, G>))
        .route("/rpc/resolve_approval", post(resolve_approval::<C, G>))
        .route("/rpc/notify_shutdown", post(notify_shutdown::<C, G>))
        .route("/rpc/events/pending", post(events_pending::<C, G>))
        .route("/rpc/events/delivered", post(events_delivered::<C, G>))
        .with_state(ctx)
}

/// `GET /health`
async fn health<C: Clock, G: IdGen>(State(_ctx): State<Arc<HttpCtx<C, G>>>) -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// `GET /status`: summary consumed by `shepd --status` and the dashboard.
async fn status<C: Clock, G: IdGen>(State(ctx): State<Arc<HttpCtx<C, G>>>) -> impl IntoResponse {
    let (agent_counts, task_counts, open_alerts) = ctx.store.read(|state| {
        (
            state.agent_counts(),
            state.task_counts(),
            state.open_alerts().len(),
        )
    });

    let agents: HashMap<String, usize> = agent_counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let tasks: HashMap<String, usize> = task_counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    Json(json!({
        "status": "ok",
        "pid": std::process::id(),
        "port": ctx.port,
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
        "agents": agents,
        "tasks": tasks,
        "open_alerts": open_alerts,
        "subscribers": ctx.bus.subscriber_count(),
        "dropped_envelopes": ctx.bus.dropped_count(),
        "escalations_pending": ctx.rpc.escalations_pending(),
    }))
}

/// `POST /shutdown`: same-host origin only.
async fn shutdown<C: Clock, G: IdGen>(
    State(ctx): State<Arc<HttpCtx<C, G>>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if !peer.ip().is_loopback() {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "shutdown is same-host only"})),
        )
            .into_response();
    }

    tracing::info!(%peer, "shutdown requested");
    ctx.shutdown.cancel();
    ok_json(json!({"status": "shutting_down"}))
}

/// `POST /rpc/heartbeat`
async fn heartbeat<C: Clock, G: IdGen>(
    State(ctx): State<Arc<HttpCtx<C, G>>>,
    Json(params): Json<HeartbeatParams>,
) -> Response {
    match ctx.rpc.heartbeat(params).await {
        Ok(()) => ok_json(json!({"ok": true})),
        Err(e) => error_response(e),
    }
}

/// `POST /rpc/report_status`
async fn report_status<C: Clock, G: IdGen>(
    State(ctx): State<Arc<HttpCtx<C, G>>>,
    Json(params): Json<ReportStatusParams>,
) -> Response {
    match ctx.rpc.report_status(params).await {
        Ok(()) => ok_json(json!({"ok": true})),
        Err(e) => error_response(e),
    }
}

/// `POST /rpc/tool_call`
async fn tool_call<C: Clock, G: IdGen>(
    State(ctx): State<Arc<HttpCtx<C, G>>>,
    Json(params): Json<ToolCallParams>,
) -> Response {
    match ctx.rpc.tool_call(params).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /rpc/request_stop_approval`
async fn request_stop_approval<C: Clock, G: IdGen>(
    State(ctx): State<Arc<HttpCtx<C, G>>>,
    Json(params): Json<StopApprovalParams>,
) -> Response {
    match ctx.rpc.request_stop_approval(params).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /rpc/resolve_approval`
async fn resolve_approval<C: Clock, G: IdGen>(
    State(ctx): State<Arc<HttpCtx<C, G>>>,
    Json(params): Json<ResolveApprovalParams>,
) -> Response {
    match ctx.rpc.resolve_approval(params) {
        Ok(()) => ok_json(json!({"ok": true})),
        Err(e) => error_response(e),
    }
}

/// `POST /rpc/notify_shutdown`
async fn notify_shutdown<C: Clock, G: IdGen>(
    State(ctx): State<Arc<HttpCtx<C, G>>>,
    Json(params): Json<NotifyShutdownParams>,
) -> Response {
    match ctx.rpc.notify_shutdown(params).await {
        Ok(()) => ok_json(json!({"ok": true})),
        Err(e) => error_response(e),
    }
}

/// `POST /rpc/events/pending`: pull path for transport-less agents.
async fn events_pending<C: Clock, G: IdGen>(
    State(ctx): State<Arc<HttpCtx<C, G>>>,
    Json(params): Json<PendingParams>,
) -> Response {
    let envelopes = ctx.rpc.pending(params);
    Json(json!({"envelopes": envelopes})).into_response()
}

#[derive(serde::Deserialize)]
struct DeliveredParams {
    envelope_id: String,
}

/// `POST /rpc/events/delivered`
async fn events_delivered<C: Clock, G: IdGen>(
    State(ctx): State<Arc<HttpCtx<C, G>>>,
    Json(params): Json<DeliveredParams>,
) -> Response {
    ctx.rpc.mark_delivered(&params.envelope_id);
    ok_json(json!({"ok": true}))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
