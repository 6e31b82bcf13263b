//! Shared harness: the supervisor component graph on a temp state dir,
//! with a fake clock and sequential ids so timing is deterministic.

use shep_core::{Clock, FakeClock, SequentialIdGen, TeamConfig};
use shep_daemon::bus::EventBus;
use shep_daemon::reconciler::{ReconcilePolicy, Reconciler};
use shep_daemon::spawner::{Spawner, SpawnerConfig};
use shep_daemon::store::Store;
use shep_daemon::tasks::TaskQueue;
use shep_storage::{Wal, WorldState};
use std::sync::Arc;
use std::time::Duration;

pub struct World {
    pub store: Store,
    pub bus: EventBus<FakeClock>,
    pub reconciler: Reconciler<FakeClock, SequentialIdGen>,
    pub tasks: TaskQueue<FakeClock, SequentialIdGen>,
    pub clock: FakeClock,
    pub dir: tempfile::TempDir,
}

pub fn world() -> World {
    world_with_policy(ReconcilePolicy {
        liveness_threshold: Duration::from_secs(10),
        ..ReconcilePolicy::default()
    })
}

pub fn world_with_policy(policy: ReconcilePolicy) -> World {
    let dir = tempfile::tempdir().unwrap();
    let wal = Wal::open(&dir.path().join("wal").join("events.wal")).unwrap();
    let store = Store::new(wal, WorldState::default());
    let clock = FakeClock::new();
    let idgen = SequentialIdGen::new("spec");
    let bus = EventBus::new(Some(store.clone()), clock.clone());

    let mut roster_entry = shep_core::test_support::agent_config("builder");
    roster_entry.run = "true".to_string();
    let team = Arc::new(parking_lot::RwLock::new(Arc::new(TeamConfig {
        captain: None,
        agents: vec![roster_entry],
    })));

    let spawner = Arc::new(Spawner::new(SpawnerConfig {
        artifacts_dir: dir.path().join("agents"),
        supervisor_url: "http://127.0.0.1:3000".to_string(),
    }));

    let reconciler = Reconciler::new(
        store.clone(),
        bus.clone(),
        spawner,
        team,
        policy,
        clock.clone(),
        idgen.clone(),
    );
    let tasks = TaskQueue::new(store.clone(), bus.clone(), clock.clone(), idgen);

    World {
        store,
        bus,
        reconciler,
        tasks,
        clock,
        dir,
    }
}

impl World {
    /// Put an agent in the fleet without spawning a process.
    pub fn seed_agent(&self, id: &str) {
        let mut record = shep_core::test_support::agent_record(id, self.clock.epoch_ms());
        // A PID nothing on the host uses
        record.pid = Some(3_999_999);
        self.store
            .record(&shep_core::Event::AgentRegistered { record })
            .unwrap();
    }
}
