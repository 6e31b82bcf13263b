//! Bus backpressure: a saturated subscriber loses exactly the overflow,
//! the drop counter accounts for it, and the durable copy of the dropped
//! envelope remains fetchable.

use crate::prelude::world;
use shep_core::{Clock, Envelope, EnvelopeKind};

#[tokio::test]
async fn saturated_subscriber_drops_exactly_the_overflow() {
    let w = world();
    let mut sub = w
        .bus
        .subscribe_with_capacity("beta", &[EnvelopeKind::Message], 100);

    for i in 0..101 {
        w.bus
            .publish(Envelope::new(
                format!("m-{i:03}"),
                EnvelopeKind::Message,
                "captain",
                "beta",
                w.clock.epoch_ms() + i,
            ))
            .await;
    }

    assert_eq!(w.bus.dropped_count(), 1);

    // The first 100 arrive in publish order
    for i in 0..100 {
        assert_eq!(sub.recv().await.unwrap().id, format!("m-{i:03}"));
    }
    assert!(sub.try_recv().is_none());

    // The 101st survives in the durable store
    let pending = w.bus.pending_for("beta", Some(&[EnvelopeKind::Message]));
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "m-100");

    // Acking it clears the pending view
    w.bus.mark_delivered("m-100");
    assert!(w.bus.pending_for("beta", None).is_empty());
}

#[tokio::test]
async fn publishes_without_subscribers_stay_durable() {
    let w = world();

    w.bus
        .publish(Envelope::new(
            "m-1",
            EnvelopeKind::Message,
            "captain",
            "nobody-yet",
            w.clock.epoch_ms(),
        ))
        .await;

    assert_eq!(w.bus.dropped_count(), 0);
    assert_eq!(w.bus.pending_for("nobody-yet", None).len(), 1);
}
