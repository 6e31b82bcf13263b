//! Alert deduplication across check cycles: one alert per key per
//! cooldown window, re-armed after the window passes.

use shep_core::test_support::agent_record;
use shep_core::{Clock, FakeClock, SequentialIdGen, Thresholds};
use shep_daemon::alerts::AlertEngine;
use std::time::Duration;

#[test]
fn same_input_yields_one_alert_per_window() {
    let clock = FakeClock::new();
    let engine = AlertEngine::new(
        Thresholds {
            failed_tests_max: 5,
            cooldown_seconds: 300,
            ..Thresholds::default()
        },
        clock.clone(),
        SequentialIdGen::new("alert"),
    );

    let mut agents = vec![agent_record("alpha", clock.epoch_ms())];
    agents[0].metrics.failed_tests = 10;

    assert_eq!(engine.check(&agents, 0).len(), 1);
    assert_eq!(engine.check(&agents, 0).len(), 0);

    clock.advance(Duration::from_secs(301));
    assert_eq!(engine.check(&agents, 0).len(), 1);
}

#[test]
fn distinct_agents_do_not_suppress_each_other() {
    let clock = FakeClock::new();
    let engine = AlertEngine::new(
        Thresholds {
            failed_tests_max: 1,
            cooldown_seconds: 300,
            ..Thresholds::default()
        },
        clock.clone(),
        SequentialIdGen::new("alert"),
    );

    let mut alpha = agent_record("alpha", clock.epoch_ms());
    let mut beta = agent_record("beta", clock.epoch_ms());
    alpha.metrics.failed_tests = 3;
    beta.metrics.failed_tests = 3;

    assert_eq!(engine.check(&[alpha.clone()], 0).len(), 1);
    // alpha is suppressed, beta is fresh
    assert_eq!(engine.check(&[alpha, beta], 0).len(), 1);
}
