// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory envelope fan-out over a durable layer.
//!
//! Subscribers register interest by (target, kinds) and receive envelopes on
//! bounded queues. Publishing persists to the store first (best-effort: a
//! store failure is logged and fan-out proceeds), then enumerates a snapshot
//! of the subscriber list, so per-publisher ordering holds and subscription
//! churn during a publish becomes visible only to later publishes.
//!
//! Backpressure: a full subscriber queue is retried a few times with a fixed
//! delay, then the envelope is dropped for that subscriber and counted. The
//! durable copy of a dropped (or never-subscribed) envelope stays pending
//! and is fetchable via `pending_for`; a copy that reached a live queue is
//! stamped delivered at publish time, since in-memory subscribers never ack.

use crate::store::Store;
use parking_lot::RwLock;
use shep_core::{Clock, Envelope, EnvelopeKind, Event, SystemClock, BROADCAST_TARGET};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Default capacity of a subscriber's receive queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Attempts to enqueue on a full subscriber queue before dropping.
const PUBLISH_MAX_RETRIES: u32 = 3;

/// Delay between enqueue attempts.
const PUBLISH_RETRY_DELAY: Duration = Duration::from_millis(10);

struct Subscriber {
    id: u64,
    target: String,
    /// Empty set admits every kind.
    kinds: HashSet<EnvelopeKind>,
    tx: mpsc::Sender<Envelope>,
}

impl Subscriber {
    fn wants(&self, envelope: &Envelope) -> bool {
        let target_match = envelope.is_broadcast()
            || self.target == BROADCAST_TARGET
            || self.target == envelope.target;
        target_match && (self.kinds.is_empty() || self.kinds.contains(&envelope.kind))
    }
}

struct BusInner {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    store: Option<Store>,
}

/// Envelope fan-out bus. Cheap to clone; all clones share subscribers.
#[derive(Clone)]
pub struct EventBus<C: Clock = SystemClock> {
    inner: Arc<BusInner>,
    clock: C,
}

/// Receive end of a subscription. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Envelope>,
    inner: Arc<BusInner>,
}

impl Subscription {
    /// Wait for the next envelope. Returns `None` if the bus dropped the
    /// send side (subscriber was removed).
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner
            .subscribers
            .write()
            .retain(|sub| sub.id != self.id);
    }
}

impl<C: Clock> EventBus<C> {
    /// Create a bus. With a store attached, every publish is persisted
    /// before fan-out and `pending_for`/`mark_delivered` are available.
    pub fn new(store: Option<Store>, clock: C) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
                store,
            }),
            clock,
        }
    }

    /// Subscribe to envelopes for `target` with the default queue capacity.
    ///
    /// An empty `kinds` slice admits all kinds. Subscribing to
    /// [`BROADCAST_TARGET`] receives everything.
    pub fn subscribe(&self, target: &str, kinds: &[EnvelopeKind]) -> Subscription {
        self.subscribe_with_capacity(target, kinds, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn subscribe_with_capacity(
        &self,
        target: &str,
        kinds: &[EnvelopeKind],
        capacity: usize,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let subscriber = Arc::new(Subscriber {
            id,
            target: target.to_string(),
            kinds: kinds.iter().copied().collect(),
            tx,
        });
        self.inner.subscribers.write().push(subscriber);
        Subscription {
            id,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Publish an envelope to all interested subscribers.
    ///
    /// Never returns an error: persistence failures are logged at WARN and
    /// a saturated subscriber drops the envelope after bounded retries.
    pub async fn publish(&self, envelope: Envelope) {
        if let Some(store) = &self.inner.store {
            let event = Event::EnvelopePublished {
                envelope: envelope.clone(),
            };
            if let Err(e) = store.record(&event) {
                warn!(
                    envelope_id = %envelope.id,
                    error = %e,
                    "failed to persist envelope, delivering in-memory only"
                );
            }
        }

        // Snapshot the subscriber list; mutations during fan-out apply to
        // subsequent publishes only.
        let recipients: Vec<Arc<Subscriber>> = {
            let subs = self.inner.subscribers.read();
            subs.iter()
                .filter(|sub| sub.wants(&envelope))
                .cloned()
                .collect()
        };

        let mut delivered_any = false;
        for subscriber in recipients {
            delivered_any |= self.offer(&subscriber, envelope.clone()).await;
        }

        // A copy that reached a live queue is done; the durable row is only
        // kept pending for drops and for targets nobody is subscribed to,
        // where the pull path picks it up later.
        if delivered_any {
            self.mark_delivered(&envelope.id);
        }
    }

    /// Try to enqueue on one subscriber, retrying briefly on a full queue.
    /// Returns true when the envelope reached the queue.
    async fn offer(&self, subscriber: &Subscriber, envelope: Envelope) -> bool {
        let mut envelope = envelope;
        for attempt in 0..=PUBLISH_MAX_RETRIES {
            match subscriber.tx.try_send(envelope) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
                Err(mpsc::error::TrySendError::Full(back)) => {
                    envelope = back;
                    if attempt < PUBLISH_MAX_RETRIES {
                        tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
                    }
                }
            }
        }

        let total = self.inner.dropped.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            kind = %envelope.kind,
            target = %envelope.target,
            source = %envelope.source,
            envelope_id = %envelope.id,
            total_dropped = total,
            "subscriber queue full, dropping envelope"
        );
        false
    }

    /// Total envelopes dropped to saturated subscribers since startup.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }

    /// Number of live subscribers (for the status endpoint).
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Undelivered durable envelopes for `target`, most urgent first.
    pub fn pending_for(&self, target: &str, kinds: Option<&[EnvelopeKind]>) -> Vec<Envelope> {
        match &self.inner.store {
            Some(store) => store.read(|state| state.pending_for(target, kinds)),
            None => Vec::new(),
        }
    }

    /// Acknowledge delivery of a durable envelope. Idempotent: the stamp is
    /// set only on the first call.
    pub fn mark_delivered(&self, envelope_id: &str) {
        if let Some(store) = &self.inner.store {
            let event = Event::EnvelopeDelivered {
                envelope_id: envelope_id.to_string(),
                at_ms: self.clock.epoch_ms(),
            };
            if let Err(e) = store.record(&event) {
                warn!(envelope_id, error = %e, "failed to persist delivery ack");
            }
        }
    }

    /// Drop delivered envelopes older than `retention`.
    pub fn compact(&self, retention: Duration) {
        if let Some(store) = &self.inner.store {
            let before_ms = self
                .clock
                .epoch_ms()
                .saturating_sub(retention.as_millis() as u64);
            let event = Event::EnvelopesCompacted { before_ms };
            if let Err(e) = store.record(&event) {
                warn!(error = %e, "failed to persist envelope compaction");
            }
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
