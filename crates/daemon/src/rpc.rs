// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The tool/RPC surface agents and the captain call.
//!
//! Fixed contract calls (heartbeat, report_status, stop approvals, shutdown
//! notices, pending-envelope fetch) are methods on [`RpcSurface`];
//! open-ended application tools go through the [`ToolRegistry`], a flat
//! `name → handler` map with no handler hierarchy.

use crate::bus::EventBus;
use crate::reconciler::{ReconcileError, Reconciler};
use crate::spawner::SpawnError;
use crate::store::Store;
use crate::tasks::TaskQueue;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shep_core::{
    AgentId, AgentMetrics, AgentStatus, Clock, Envelope, EnvelopeKind, IdGen, Priority,
    SystemClock, UuidIdGen, BROADCAST_TARGET,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Deadline for one registered tool handler invocation.
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for a stop-approval decision.
pub const STOP_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Errors surfaced to RPC callers.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Task(#[from] shep_core::TaskError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ReconcileError> for RpcError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::NotFound(id) => RpcError::AgentNotFound(id),
            ReconcileError::DuplicateAgent(id) => {
                RpcError::InvalidArgs(format!("agent already in fleet: {id}"))
            }
            ReconcileError::Spawn(e) => RpcError::Spawn(e),
            ReconcileError::Store(e) => RpcError::Internal(e.to_string()),
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;
type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Open-ended tool dispatch: `tool_name → handler(args) -> result`.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Later registrations replace earlier ones.
    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| Box::pin(handler(args)));
        self.handlers.write().insert(name.to_string(), handler);
    }

    /// Dispatch a tool call. Completes or times out; agent threads are
    /// never parked indefinitely.
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value, RpcError> {
        let handler = self
            .handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::ToolNotFound(name.to_string()))?;

        tokio::time::timeout(TOOL_CALL_TIMEOUT, handler(args))
            .await
            .map_err(|_| RpcError::DeadlineExceeded)?
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

// -- Request/response DTOs ----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HeartbeatParams {
    pub agent_id: String,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub metrics: Option<AgentMetrics>,
}

#[derive(Debug, Deserialize)]
pub struct ReportStatusParams {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub agent_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopApprovalParams {
    pub agent_id: String,
    pub reason: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub work_completed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopApprovalReply {
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveApprovalParams {
    pub approval_id: String,
    pub approved: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotifyShutdownParams {
    pub agent_id: String,
    pub reason: String,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct PendingParams {
    pub target: String,
    #[serde(default)]
    pub kinds: Option<Vec<EnvelopeKind>>,
}

/// One approval waiting for a decision; visible to the alert engine's
/// escalation-queue check.
struct PendingApproval {
    tx: oneshot::Sender<StopApprovalReply>,
}

/// The supervisor-side RPC surface.
pub struct RpcSurface<C: Clock = SystemClock, G: IdGen = UuidIdGen> {
    store: Store,
    bus: EventBus<C>,
    reconciler: Arc<Reconciler<C, G>>,
    tasks: Arc<TaskQueue<C, G>>,
    registry: ToolRegistry,
    approvals: Mutex<HashMap<String, PendingApproval>>,
    approval_timeout: Duration,
    clock: C,
    idgen: G,
}

impl<C: Clock, G: IdGen> RpcSurface<C, G> {
    pub fn new(
        store: Store,
        bus: EventBus<C>,
        reconciler: Arc<Reconciler<C, G>>,
        tasks: Arc<TaskQueue<C, G>>,
        registry: ToolRegistry,
        clock: C,
        idgen: G,
    ) -> Self {
        Self {
            store,
            bus,
            reconciler,
            tasks,
            registry,
            approvals: Mutex::new(HashMap::new()),
            approval_timeout: STOP_APPROVAL_TIMEOUT,
            clock,
            idgen,
        }
    }

    /// Shorten the approval deadline (tests).
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tasks(&self) -> &TaskQueue<C, G> {
        &self.tasks
    }

    /// Number of stop approvals currently parked.
    pub fn escalations_pending(&self) -> usize {
        self.approvals.lock().len()
    }

    /// `heartbeat(agent_id, status?, current_task?)`
    pub async fn heartbeat(&self, params: HeartbeatParams) -> Result<(), RpcError> {
        self.reconciler
            .heartbeat(
                &AgentId::new(&params.agent_id),
                params.status,
                params.current_task,
                params.metrics,
            )
            .await?;
        Ok(())
    }

    /// `report_status(agent_id, status, message?)`
    pub async fn report_status(&self, params: ReportStatusParams) -> Result<(), RpcError> {
        self.reconciler
            .report_status(
                &AgentId::new(&params.agent_id),
                params.status,
                params.message,
            )
            .await?;
        Ok(())
    }

    /// `tool_call(agent_id, tool_name, args)`: forwarded to the registry.
    ///
    /// Handler failures come back as `{success: false, error}` rather than
    /// a transport error; unknown agents and unknown tools are errors.
    pub async fn tool_call(&self, params: ToolCallParams) -> Result<ToolCallResult, RpcError> {
        let agent_id = AgentId::new(&params.agent_id);
        self.reconciler.activity(&agent_id).await?;

        match self.registry.dispatch(&params.tool_name, params.args).await {
            Ok(result) => Ok(ToolCallResult {
                success: true,
                result: Some(result),
                error: None,
            }),
            Err(RpcError::ToolNotFound(name)) => Err(RpcError::ToolNotFound(name)),
            Err(e) => Ok(ToolCallResult {
                success: false,
                result: None,
                error: Some(e.to_string()),
            }),
        }
    }

    /// `request_stop_approval(agent_id, reason, context, work_completed?)`
    ///
    /// Parks the caller until an operator resolves the approval or the
    /// deadline passes; the timeout decision is a denial with message
    /// "timeout".
    pub async fn request_stop_approval(
        &self,
        params: StopApprovalParams,
    ) -> Result<StopApprovalReply, RpcError> {
        let known = self
            .store
            .read(|state| state.agents.contains_key(&params.agent_id));
        if !known {
            return Err(RpcError::AgentNotFound(params.agent_id));
        }

        let approval_id = self.idgen.next();
        let (tx, rx) = oneshot::channel();
        self.approvals
            .lock()
            .insert(approval_id.clone(), PendingApproval { tx });

        info!(
            agent_id = %params.agent_id,
            approval_id = %approval_id,
            reason = %params.reason,
            "stop approval requested"
        );

        let envelope = Envelope::new(
            approval_id.clone(),
            EnvelopeKind::Approval,
            params.agent_id.as_str(),
            BROADCAST_TARGET,
            self.clock.epoch_ms(),
        )
        .with_priority(Priority::High)
        .with_payload(json!({
            "approval_id": approval_id,
            "agent_id": params.agent_id,
            "reason": params.reason,
            "context": params.context,
            "work_completed": params.work_completed,
        }));
        self.bus.publish(envelope).await;

        let reply = match tokio::time::timeout(self.approval_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // Timeout or resolver dropped: deny by default
            _ => StopApprovalReply {
                approved: false,
                message: Some("timeout".to_string()),
            },
        };
        self.approvals.lock().remove(&approval_id);
        Ok(reply)
    }

    /// Resolve a parked stop approval (operator/captain action).
    pub fn resolve_approval(&self, params: ResolveApprovalParams) -> Result<(), RpcError> {
        let pending = self
            .approvals
            .lock()
            .remove(&params.approval_id)
            .ok_or_else(|| RpcError::InvalidArgs(format!(
                "no pending approval: {}",
                params.approval_id
            )))?;

        let _ = pending.tx.send(StopApprovalReply {
            approved: params.approved,
            message: params.message,
        });
        Ok(())
    }

    /// `notify_shutdown(agent_id, reason, approved, force)`: one-way.
    pub async fn notify_shutdown(&self, params: NotifyShutdownParams) -> Result<(), RpcError> {
        let agent_id = AgentId::new(&params.agent_id);
        info!(
            agent_id = %params.agent_id,
            reason = %params.reason,
            approved = params.approved,
            force = params.force,
            "agent announced shutdown"
        );

        // The agent is on its way out; record the transition now instead of
        // waiting out the liveness window.
        if let Err(e) = self
            .reconciler
            .report_status(
                &agent_id,
                AgentStatus::Disconnected,
                Some(params.reason.clone()),
            )
            .await
        {
            warn!(agent_id = %params.agent_id, error = %e, "shutdown notice for unknown agent");
        }

        let envelope = Envelope::new(
            self.idgen.next(),
            EnvelopeKind::AgentSignal,
            params.agent_id.as_str(),
            BROADCAST_TARGET,
            self.clock.epoch_ms(),
        )
        .with_payload(json!({
            "agent_id": params.agent_id,
            "shutdown": {"reason": params.reason, "approved": params.approved, "force": params.force},
        }));
        self.bus.publish(envelope).await;
        Ok(())
    }

    /// Undelivered durable envelopes for a target (pull path for agents
    /// without a live subscription).
    pub fn pending(&self, params: PendingParams) -> Vec<Envelope> {
        self.bus
            .pending_for(&params.target, params.kinds.as_deref())
    }

    /// Acknowledge a pulled envelope.
    pub fn mark_delivered(&self, envelope_id: &str) {
        self.bus.mark_delivered(envelope_id);
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
