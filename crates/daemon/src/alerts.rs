// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Threshold evaluation with time-windowed deduplication.
//!
//! The engine is stateless per cycle apart from the dedup table: each check
//! compares one metric against its threshold and emits at most one alert
//! per dedup key per cooldown window. Checks with a zero threshold are
//! disabled. The caller persists and publishes whatever is returned.

use parking_lot::{Mutex, RwLock};
use shep_core::{
    alert::dedup_key, Alert, AlertKind, AgentRecord, AgentStatus, Clock, IdGen, Severity,
    SystemClock, Thresholds, UuidIdGen,
};
use std::collections::HashMap;
use std::sync::Arc;

/// The alert engine.
pub struct AlertEngine<C: Clock = SystemClock, G: IdGen = UuidIdGen> {
    thresholds: RwLock<Arc<Thresholds>>,
    /// dedup key → epoch ms of last emission
    last_emitted: Mutex<HashMap<String, u64>>,
    clock: C,
    idgen: G,
}

impl<C: Clock, G: IdGen> AlertEngine<C, G> {
    pub fn new(thresholds: Thresholds, clock: C, idgen: G) -> Self {
        Self {
            thresholds: RwLock::new(Arc::new(thresholds)),
            last_emitted: Mutex::new(HashMap::new()),
            clock,
            idgen,
        }
    }

    /// Atomically replace the thresholds.
    pub fn set_thresholds(&self, thresholds: Thresholds) {
        *self.thresholds.write() = Arc::new(thresholds);
    }

    pub fn thresholds(&self) -> Arc<Thresholds> {
        Arc::clone(&self.thresholds.read())
    }

    /// Evaluate every check against the fleet and the escalation queue
    /// depth. Returns newly-created alerts, not yet persisted.
    pub fn check(&self, agents: &[AgentRecord], escalations_pending: usize) -> Vec<Alert> {
        let thresholds = self.thresholds();
        let now_ms = self.clock.epoch_ms();
        self.gc(now_ms, thresholds.cooldown_seconds);

        let mut alerts = Vec::new();

        for record in agents {
            self.check_agent(record, &thresholds, now_ms, &mut alerts);
        }

        if thresholds.escalation_queue_max > 0
            && escalations_pending >= thresholds.escalation_queue_max as usize
        {
            self.emit(
                AlertKind::EscalationQueue,
                None,
                Severity::Critical,
                format!("{} stop approvals pending", escalations_pending),
                now_ms,
                thresholds.cooldown_seconds,
                &mut alerts,
            );
        }

        alerts
    }

    fn check_agent(
        &self,
        record: &AgentRecord,
        thresholds: &Thresholds,
        now_ms: u64,
        alerts: &mut Vec<Alert>,
    ) {
        let cooldown = thresholds.cooldown_seconds;
        let agent = Some(record.id.as_str());

        if thresholds.failed_tests_max > 0
            && record.metrics.failed_tests >= thresholds.failed_tests_max
        {
            self.emit(
                AlertKind::FailedTests,
                agent,
                Severity::Warning,
                format!("{} failed tests", record.metrics.failed_tests),
                now_ms,
                cooldown,
                alerts,
            );
        }

        if thresholds.idle_time_max_seconds > 0 {
            if let Some(idle_since_ms) = record.metrics.idle_since_ms {
                let idle_for_s = now_ms.saturating_sub(idle_since_ms) / 1000;
                if idle_for_s >= thresholds.idle_time_max_seconds {
                    self.emit(
                        AlertKind::IdleTimeout,
                        agent,
                        Severity::Warning,
                        format!("idle for {}s", idle_for_s),
                        now_ms,
                        cooldown,
                        alerts,
                    );
                }
            }
        }

        if thresholds.token_usage_max > 0 && record.metrics.tokens_used >= thresholds.token_usage_max
        {
            self.emit(
                AlertKind::TokenUsage,
                agent,
                Severity::Warning,
                format!("{} tokens used", record.metrics.tokens_used),
                now_ms,
                cooldown,
                alerts,
            );
        }

        if thresholds.consecutive_rejects_max > 0
            && record.metrics.consecutive_rejects >= thresholds.consecutive_rejects_max
        {
            self.emit(
                AlertKind::ConsecutiveRejects,
                agent,
                Severity::Critical,
                format!("{} consecutive rejects", record.metrics.consecutive_rejects),
                now_ms,
                cooldown,
                alerts,
            );
        }

        match record.status {
            AgentStatus::Disconnected => {
                self.emit(
                    AlertKind::AgentDisconnected,
                    agent,
                    Severity::Critical,
                    "agent disconnected".to_string(),
                    now_ms,
                    cooldown,
                    alerts,
                );
            }
            AgentStatus::Blocked => {
                let message = record
                    .blocked_reason
                    .clone()
                    .unwrap_or_else(|| "agent blocked".to_string());
                self.emit(
                    AlertKind::AgentBlocked,
                    agent,
                    Severity::Warning,
                    message,
                    now_ms,
                    cooldown,
                    alerts,
                );
            }
            _ => {}
        }
    }

    /// Emit unless the dedup key fired within the cooldown window.
    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        kind: AlertKind,
        agent_id: Option<&str>,
        severity: Severity,
        message: String,
        now_ms: u64,
        cooldown_seconds: u64,
        alerts: &mut Vec<Alert>,
    ) {
        let key = dedup_key(kind, agent_id);
        let mut last_emitted = self.last_emitted.lock();
        if let Some(&last) = last_emitted.get(&key) {
            if now_ms.saturating_sub(last) < cooldown_seconds * 1000 {
                return;
            }
        }
        last_emitted.insert(key, now_ms);
        alerts.push(Alert::new(
            self.idgen.next(),
            kind,
            agent_id.map(str::to_string),
            severity,
            message,
            now_ms,
        ));
    }

    /// Drop dedup entries older than the cooldown window.
    fn gc(&self, now_ms: u64, cooldown_seconds: u64) {
        let cutoff = cooldown_seconds * 1000;
        self.last_emitted
            .lock()
            .retain(|_, &mut at| now_ms.saturating_sub(at) < cutoff);
    }
}

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;
