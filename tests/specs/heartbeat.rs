//! Heartbeat liveness: an agent that stops heartbeating is marked
//! disconnected within one reconcile tick of crossing the threshold, and
//! exactly one agent signal goes out.

use crate::prelude::world;
use shep_core::{AgentId, AgentStatus, EnvelopeKind};
use std::time::Duration;

#[tokio::test]
async fn silence_past_threshold_disconnects_within_one_tick() {
    let w = world(); // liveness threshold: 10s
    w.seed_agent("alpha");

    // Heartbeats at t=0, 2, 4, then silence
    for _ in 0..3 {
        w.reconciler
            .heartbeat(&AgentId::new("alpha"), None, None, None)
            .await
            .unwrap();
        w.clock.advance(Duration::from_secs(2));
    }

    let mut signals = w.bus.subscribe("alpha", &[EnvelopeKind::AgentSignal]);

    // t=15: the next tick must observe the expired liveness window
    w.clock.advance(Duration::from_secs(9));
    w.reconciler.tick().await;

    let status = w.store.read(|s| s.agents["alpha"].status);
    assert_eq!(status, AgentStatus::Disconnected);

    let signal = signals.recv().await.unwrap();
    assert_eq!(signal.kind, EnvelopeKind::AgentSignal);
    assert_eq!(signal.target, "alpha");

    // Further ticks do not emit duplicate signals
    w.reconciler.tick().await;
    w.reconciler.tick().await;
    assert!(signals.try_recv().is_none());
}

#[tokio::test]
async fn heartbeats_inside_threshold_keep_agent_live() {
    let w = world();
    w.seed_agent("alpha");

    for _ in 0..20 {
        w.reconciler
            .heartbeat(&AgentId::new("alpha"), None, None, None)
            .await
            .unwrap();
        w.clock.advance(Duration::from_secs(5));
        w.reconciler.tick().await;
    }

    let status = w.store.read(|s| s.agents["alpha"].status);
    assert!(status.is_live());
}
