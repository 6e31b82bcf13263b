// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted priority task queue.
//!
//! All mutations write through the store, so the queue state survives
//! restarts; rehydration is just WAL replay into the world state. Ordering
//! is `(priority, created_at, id)`: priority 1 first, FIFO within a
//! priority. Status changes go through the transition lattice without
//! exception; an invalid transition mutates nothing.

use crate::bus::EventBus;
use crate::store::Store;
use serde_json::json;
use shep_core::{
    Clock, Envelope, EnvelopeKind, Event, IdGen, SystemClock, Task, TaskConfig, TaskError,
    TaskStatus, UuidIdGen, BROADCAST_TARGET,
};
use tracing::warn;

/// The task queue. Mutations are serialized by the store's state lock.
pub struct TaskQueue<C: Clock = SystemClock, G: IdGen = UuidIdGen> {
    store: Store,
    bus: EventBus<C>,
    clock: C,
    idgen: G,
}

impl<C: Clock, G: IdGen> TaskQueue<C, G> {
    pub fn new(store: Store, bus: EventBus<C>, clock: C, idgen: G) -> Self {
        Self {
            store,
            bus,
            clock,
            idgen,
        }
    }

    /// Insert a new pending task. Rejects empty titles and out-of-range
    /// priorities before anything is persisted.
    pub async fn add(&self, mut config: TaskConfig) -> Result<Task, TaskError> {
        if config.id.is_empty() {
            config.id = self.idgen.next();
        }
        let task = Task::new(config, &self.clock)?;
        self.persist(Event::TaskAdded { task: task.clone() });
        self.announce(&task).await;
        Ok(task)
    }

    /// Head of the pending queue without removing it.
    pub fn peek(&self) -> Option<Task> {
        self.store
            .read(|state| state.tasks_by_status(TaskStatus::Pending).into_iter().next())
    }

    /// Remove and return the head of the pending queue.
    pub async fn pop(&self) -> Option<Task> {
        let task = self.peek()?;
        self.persist(Event::TaskRemoved {
            task_id: shep_core::TaskId::new(&task.id),
        });
        Some(task)
    }

    /// Replace a task wholesale. A status change embedded in the update is
    /// validated against the lattice; everything else is taken as-is.
    pub async fn update(&self, task: Task) -> Result<Task, TaskError> {
        let current = self
            .store
            .read(|state| state.tasks.get(&task.id).cloned())
            .ok_or_else(|| TaskError::NotFound(task.id.clone()))?;

        if task.status != current.status && !current.status.can_transition_to(task.status) {
            return Err(TaskError::InvalidTransition {
                from: current.status,
                to: task.status,
            });
        }

        let mut task = task;
        task.created_at_ms = current.created_at_ms;
        task.updated_at_ms = task.updated_at_ms.max(self.clock.epoch_ms());
        self.persist(Event::TaskUpdated { task: task.clone() });
        self.announce(&task).await;
        Ok(task)
    }

    /// Move a task along one edge of the lattice.
    pub async fn transition(&self, task_id: &str, to: TaskStatus) -> Result<Task, TaskError> {
        let mut task = self
            .store
            .read(|state| state.tasks.get(task_id).cloned())
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        task.transition_to(to, self.clock.epoch_ms())?;
        self.persist(Event::TaskUpdated { task: task.clone() });
        self.announce(&task).await;
        Ok(task)
    }

    /// Assign a pending (or blocked) task to an agent.
    pub async fn assign(&self, task_id: &str, agent_id: &str) -> Result<Task, TaskError> {
        let mut task = self
            .store
            .read(|state| state.tasks.get(task_id).cloned())
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        task.transition_to(TaskStatus::Assigned, self.clock.epoch_ms())?;
        task.assignee = Some(agent_id.to_string());
        self.persist(Event::TaskUpdated { task: task.clone() });
        self.announce(&task).await;
        Ok(task)
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.store.read(|state| state.tasks.get(task_id).cloned())
    }

    pub fn get_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.store.read(|state| state.tasks_by_status(status))
    }

    pub fn get_by_agent(&self, agent_id: &str) -> Vec<Task> {
        self.store.read(|state| state.tasks_by_agent(agent_id))
    }

    /// Remove a task. Idempotent: removing an absent id is a no-op.
    pub fn remove(&self, task_id: &str) {
        let exists = self.store.read(|state| state.tasks.contains_key(task_id));
        if exists {
            self.persist(Event::TaskRemoved {
                task_id: shep_core::TaskId::new(task_id),
            });
        }
    }

    fn persist(&self, event: Event) {
        if let Err(e) = self.store.record(&event) {
            warn!(error = %e, "failed to persist task mutation");
        }
    }

    async fn announce(&self, task: &Task) {
        let target = task
            .assignee
            .clone()
            .unwrap_or_else(|| BROADCAST_TARGET.to_string());
        let envelope = Envelope::new(
            self.idgen.next(),
            EnvelopeKind::TaskUpdate,
            "supervisor",
            target,
            self.clock.epoch_ms(),
        )
        .with_payload(json!({
            "task_id": task.id,
            "status": task.status.to_string(),
            "priority": task.priority,
        }));
        self.bus.publish(envelope).await;
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
