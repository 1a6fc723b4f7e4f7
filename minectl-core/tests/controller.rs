mod common;

use std::time::{Duration, Instant};

use common::{device, harness, harness_with, prices, supervisor_config, Behavior};
use minectl_core::{
    AlgorithmId, DeviceId, ReoptimizeOutcome, SessionError, SessionEvent, SessionState, Settings,
    StartupError, SupervisorConfig,
};

fn alg(id: &str) -> AlgorithmId {
    AlgorithmId::from(id)
}

#[tokio::test]
async fn test_start_picks_most_profitable() {
    // x: 100 @ 1, y: 50 @ 3 -> y on both devices
    let h = harness(
        vec![device(0, &["x", "y"]), device(1, &["x", "y"])],
        &[("x", 100.0), ("y", 50.0)],
        prices(&[("x", 1.0), ("y", 3.0)]),
    );

    h.controller.start(Settings::default()).await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Mining);

    let assignment = h.controller.assignment().await.unwrap();
    assert_eq!(assignment.devices(&alg("y")), &[DeviceId::nvidia(0), DeviceId::nvidia(1)]);
    // y is single-device: one instance per device
    assert_eq!(h.controller.running_instances().await.len(), 2);
    assert_eq!(h.backend.live(), 2);

    let report = h.controller.tick().await;
    assert_eq!(report.polled, 2);

    let snapshot = h.controller.snapshot();
    let y = &snapshot.algorithms[&alg("y")];
    assert_eq!(y.devices.len(), 2);
    assert_eq!(snapshot.total_revenue, 300.0);
    assert_eq!(snapshot.balance, Some(0.001));

    h.controller.stop().await;
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.backend.live(), 0);
    assert!(h.controller.snapshot().is_empty());
}

#[tokio::test]
async fn test_poolable_algorithm_single_process() {
    let h = harness(
        vec![device(0, &["z"]), device(1, &["z"])],
        &[("z", 10.0)],
        prices(&[("z", 1.0)]),
    );

    h.controller.start(Settings::default()).await.unwrap();

    let instances = h.controller.running_instances().await;
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].devices, vec![DeviceId::nvidia(0), DeviceId::nvidia(1)]);
    assert_eq!(h.backend.count("launch"), 1);
}

#[tokio::test]
async fn test_startup_failure_rolls_back() {
    // Device 0 only runs x (ready), device 1 only runs y (never ready)
    let h = harness(
        vec![device(0, &["x"]), device(1, &["y"])],
        &[("x", 10.0), ("y", 10.0)],
        prices(&[("x", 1.0), ("y", 1.0)]),
    );
    h.backend.set_behavior("y", Behavior { ready_after: None, ..Default::default() });
    let mut events = h.controller.subscribe_events();

    let result = h.controller.start(Settings::default()).await;
    assert!(matches!(
        result,
        Err(SessionError::StartFailed(StartupError::Timeout { .. }))
    ));
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(h.controller.running_instances().await.is_empty());
    assert_eq!(h.backend.live(), 0);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::StartFailed(_)) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn test_no_usable_devices() {
    let h = harness(vec![device(0, &["x"])], &[("x", 1.0)], prices(&[("x", 1.0)]));

    let mut settings = Settings::default();
    settings.disabled_devices.insert(DeviceId::nvidia(0));

    let result = h.controller.start(settings).await;
    assert!(matches!(result, Err(SessionError::NoUsableDevices)));
    assert_eq!(h.controller.state(), SessionState::Idle);

    // Controller is reusable afterwards
    h.controller.start(Settings::default()).await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Mining);
}

#[tokio::test]
async fn test_start_without_prices_mines_nothing() {
    let h = harness(vec![device(0, &["x"])], &[("x", 1.0)], prices(&[]));
    h.prices.clear();

    h.controller.start(Settings::default()).await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Mining);
    assert!(h.controller.assignment().await.unwrap().is_empty());
    assert_eq!(h.backend.live(), 0);

    // Reoptimize without prices is skipped
    assert_eq!(h.controller.reoptimize().await.unwrap(), ReoptimizeOutcome::Skipped);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let h = harness(vec![device(0, &["x"])], &[("x", 1.0)], prices(&[("x", 1.0)]));
    h.controller.start(Settings::default()).await.unwrap();

    let result = h.controller.start(Settings::default()).await;
    assert!(matches!(
        result,
        Err(SessionError::InvalidState { actual: SessionState::Mining, .. })
    ));
}

#[tokio::test]
async fn test_reoptimize_requires_mining() {
    let h = harness(vec![device(0, &["x"])], &[("x", 1.0)], prices(&[("x", 1.0)]));
    assert!(matches!(
        h.controller.reoptimize().await,
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_unchanged_reoptimize_touches_nothing() {
    let h = harness(
        vec![device(0, &["x", "y"]), device(1, &["x", "y"])],
        &[("x", 100.0), ("y", 50.0)],
        prices(&[("x", 1.0), ("y", 3.0)]),
    );
    h.controller.start(Settings::default()).await.unwrap();
    let calls_before = h.backend.log().len();

    let outcome = h.controller.reoptimize().await.unwrap();
    assert_eq!(outcome, ReoptimizeOutcome::Unchanged);
    assert_eq!(h.backend.log().len(), calls_before);
    assert_eq!(h.controller.state(), SessionState::Mining);
}

#[tokio::test]
async fn test_reoptimize_stops_before_starting() {
    let h = harness(
        vec![device(0, &["x", "y"]), device(1, &["x", "y"])],
        &[("x", 100.0), ("y", 50.0)],
        prices(&[("x", 1.0), ("y", 3.0)]),
    );
    h.controller.start(Settings::default()).await.unwrap();
    let launches_before = h.backend.count("launch");

    // x now pays far more than y
    h.prices.set(prices(&[("x", 10.0), ("y", 3.0)]));
    let outcome = h.controller.reoptimize().await.unwrap();
    assert_eq!(
        outcome,
        ReoptimizeOutcome::Applied {
            stopped: 2,
            started: 2,
            failed: 0
        }
    );

    let log = h.backend.log();
    let last_terminate = log.iter().rposition(|l| l.starts_with("terminate")).unwrap();
    let first_new_launch = log
        .iter()
        .enumerate()
        .filter(|(_, l)| l.starts_with("launch"))
        .nth(launches_before)
        .map(|(i, _)| i)
        .unwrap();
    assert!(last_terminate < first_new_launch);

    let assignment = h.controller.assignment().await.unwrap();
    assert_eq!(assignment.devices(&alg("x")).len(), 2);
    assert_eq!(h.backend.live(), 2);
}

#[tokio::test]
async fn test_reoptimize_only_touches_changed_devices() {
    // Device 0 only supports x, device 1 supports both
    let h = harness(
        vec![device(0, &["x"]), device(1, &["x", "y"])],
        &[("x", 100.0), ("y", 50.0)],
        prices(&[("x", 1.0), ("y", 1.0)]),
    );
    h.controller.start(Settings::default()).await.unwrap();
    assert_eq!(h.backend.count("launch"), 2);

    h.prices.set(prices(&[("x", 1.0), ("y", 10.0)]));
    let outcome = h.controller.reoptimize().await.unwrap();
    assert_eq!(
        outcome,
        ReoptimizeOutcome::Applied {
            stopped: 1,
            started: 1,
            failed: 0
        }
    );
    assert_eq!(h.backend.count("terminate"), 1);
    assert!(h.backend.log().last().unwrap().starts_with("launch y nvidia:1"));
}

#[tokio::test]
async fn test_switching_threshold_keeps_running_algorithm() {
    let h = harness(
        vec![device(0, &["x", "y"])],
        &[("x", 100.0), ("y", 105.0)],
        prices(&[("x", 1.0), ("y", 0.5)]),
    );
    h.controller.start(Settings::default()).await.unwrap();
    assert_eq!(h.controller.assignment().await.unwrap().algorithm_for(&DeviceId::nvidia(0)), Some(&alg("x")));

    // y now beats x by 5%, under the default 10% threshold
    h.prices.set(prices(&[("x", 1.0), ("y", 1.0)]));
    assert_eq!(h.controller.reoptimize().await.unwrap(), ReoptimizeOutcome::Unchanged);
}

#[tokio::test]
async fn test_concurrent_reoptimize_is_coalesced() {
    let h = harness(
        vec![device(0, &["x", "y"])],
        &[("x", 100.0), ("y", 50.0)],
        prices(&[("x", 1.0), ("y", 1.0)]),
    );
    h.controller.start(Settings::default()).await.unwrap();
    let cycles_before = h.controller.stats().optimize_cycles;

    // Make the switch to y slow so the first request is still in flight
    h.backend.set_behavior(
        "y",
        Behavior {
            launch_delay: Duration::from_millis(50),
            ..Default::default()
        },
    );
    h.prices.set(prices(&[("x", 1.0), ("y", 10.0)]));

    let (first, second) = tokio::join!(h.controller.reoptimize(), h.controller.reoptimize());
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, ReoptimizeOutcome::Applied { .. }))
            .count(),
        1
    );
    assert!(outcomes.contains(&ReoptimizeOutcome::Coalesced));

    let stats = h.controller.stats();
    assert_eq!(stats.optimize_cycles, cycles_before + 1);
    assert_eq!(stats.coalesced, 1);
    assert_eq!(
        h.controller.assignment().await.unwrap().algorithm_for(&DeviceId::nvidia(0)),
        Some(&alg("y"))
    );
}

#[tokio::test]
async fn test_coalesced_request_applies_latest_prices() {
    let h = harness(
        vec![device(0, &["x", "y"])],
        &[("x", 100.0), ("y", 50.0)],
        prices(&[("x", 1.0), ("y", 1.0)]),
    );
    h.controller.start(Settings::default()).await.unwrap();
    let cycles_before = h.controller.stats().optimize_cycles;

    h.backend.set_behavior(
        "y",
        Behavior {
            launch_delay: Duration::from_millis(200),
            ..Default::default()
        },
    );
    h.prices.set(prices(&[("x", 1.0), ("y", 10.0)]));

    let controller = h.controller.clone();
    let first = tokio::spawn(async move { controller.reoptimize().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Prices move back while the switch to y is still launching
    h.prices.set(prices(&[("x", 10.0), ("y", 1.0)]));
    let second = h.controller.reoptimize().await.unwrap();
    assert_eq!(second, ReoptimizeOutcome::Coalesced);

    let first = first.await.unwrap().unwrap();
    assert_eq!(
        first,
        ReoptimizeOutcome::Applied {
            stopped: 2,
            started: 2,
            failed: 0
        }
    );
    assert_eq!(h.controller.stats().optimize_cycles, cycles_before + 2);
    assert_eq!(
        h.controller.assignment().await.unwrap().algorithm_for(&DeviceId::nvidia(0)),
        Some(&alg("x"))
    );
    assert_eq!(h.backend.live(), 1);
}

#[tokio::test]
async fn test_pool_growth_keeps_running_instance() {
    // Devices 0 and 1 only mine the pooled z; device 2 moves between x and z
    let h = harness(
        vec![device(0, &["z"]), device(1, &["z"]), device(2, &["x", "z"])],
        &[("x", 100.0), ("z", 10.0)],
        prices(&[("x", 1.0), ("z", 1.0)]),
    );
    h.controller.start(Settings::default()).await.unwrap();
    assert_eq!(
        h.backend.log(),
        vec!["launch x nvidia:2", "launch z nvidia:0,nvidia:1"]
    );

    // z now pays 200 on device 2 against 100 for x
    h.prices.set(prices(&[("x", 1.0), ("z", 20.0)]));
    let outcome = h.controller.reoptimize().await.unwrap();
    assert_eq!(
        outcome,
        ReoptimizeOutcome::Applied {
            stopped: 1,
            started: 1,
            failed: 0
        }
    );
    assert_eq!(
        h.backend.log()[2..].to_vec(),
        vec!["terminate 0", "launch z nvidia:2"]
    );
    assert_eq!(
        h.controller.assignment().await.unwrap().devices(&alg("z")),
        &[DeviceId::nvidia(0), DeviceId::nvidia(1), DeviceId::nvidia(2)]
    );
    assert_eq!(h.backend.live(), 2);

    // Device 2 leaves again; the original pool keeps running
    h.prices.set(prices(&[("x", 1.0), ("z", 1.0)]));
    h.controller.reoptimize().await.unwrap();
    assert_eq!(
        h.backend.log()[4..].to_vec(),
        vec!["terminate 2", "launch x nvidia:2"]
    );
    let instances = h.controller.running_instances().await;
    assert_eq!(instances.len(), 2);
    assert!(instances
        .iter()
        .any(|e| e.algorithm == alg("z") && e.devices == vec![DeviceId::nvidia(0), DeviceId::nvidia(1)]));
}

#[tokio::test]
async fn test_crash_restarts_only_that_instance() {
    let h = harness(
        vec![device(0, &["x"]), device(1, &["y"])],
        &[("x", 10.0), ("y", 10.0)],
        prices(&[("x", 1.0), ("y", 2.0)]),
    );
    h.controller.start(Settings::default()).await.unwrap();
    h.controller.tick().await;

    let before = h.controller.snapshot();
    let y_before = before.algorithms[&alg("y")].clone();
    let mut events = h.controller.subscribe_events();

    h.backend.crash("x");
    let report = h.controller.tick().await;
    assert_eq!(report.crashed, 1);
    assert_eq!(report.restarted, 1);

    let after = h.controller.snapshot();
    assert_eq!(after.algorithms[&alg("y")], y_before);
    assert_eq!(h.controller.stats().restarts, 1);
    assert_eq!(h.backend.live(), 2);
    // Only x was relaunched
    assert_eq!(h.backend.count("launch x"), 2);
    assert_eq!(h.backend.count("launch y"), 1);

    let mut crashed = None;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::ProcessCrashed(crash) = event {
            crashed = Some(crash);
        }
    }
    assert_eq!(crashed.unwrap().algorithm, alg("x"));

    // x reports again on the next tick
    h.controller.tick().await;
    assert!(h.controller.snapshot().algorithms.contains_key(&alg("x")));
}

#[tokio::test]
async fn test_failed_restart_leaves_devices_idle() {
    let h = harness(
        vec![device(0, &["x"]), device(1, &["y"])],
        &[("x", 10.0), ("y", 10.0)],
        prices(&[("x", 1.0), ("y", 1.0)]),
    );
    h.controller.start(Settings::default()).await.unwrap();

    h.backend.set_behavior("x", Behavior { exit_on_start: true, ..Default::default() });
    h.backend.crash("x");
    let report = h.controller.tick().await;
    assert_eq!(report.crashed, 1);
    assert_eq!(report.restarted, 0);

    let assignment = h.controller.assignment().await.unwrap();
    assert!(assignment.algorithm_for(&DeviceId::nvidia(0)).is_none());
    assert_eq!(h.controller.state(), SessionState::Mining);

    // The next reoptimization picks the device up again
    h.backend.set_behavior("x", Behavior::default());
    let outcome = h.controller.reoptimize().await.unwrap();
    assert!(matches!(outcome, ReoptimizeOutcome::Applied { started: 1, .. }));
}

#[tokio::test]
async fn test_stop_interrupts_start() {
    let config = SupervisorConfig {
        startup_timeout_ms: 10_000,
        ..supervisor_config()
    };
    let h = harness_with(
        vec![device(0, &["x"])],
        &[("x", 10.0)],
        prices(&[("x", 1.0)]),
        config,
    );
    h.backend.set_behavior("x", Behavior { ready_after: None, ..Default::default() });

    let controller = h.controller.clone();
    let started = Instant::now();
    let start = tokio::spawn(async move { controller.start(Settings::default()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.controller.stop().await;

    let result = start.await.unwrap();
    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.backend.live(), 0);
}

#[tokio::test]
async fn test_settings_apply_on_reoptimize() {
    let h = harness(
        vec![device(0, &["x"]), device(1, &["x"])],
        &[("x", 10.0)],
        prices(&[("x", 1.0)]),
    );
    h.controller.start(Settings::default()).await.unwrap();
    assert_eq!(h.backend.live(), 2);

    let mut settings = Settings::default();
    settings.disabled_devices.insert(DeviceId::nvidia(1));
    h.controller.update_settings(settings);

    // Not applied until reoptimization
    h.controller.tick().await;
    assert_eq!(h.backend.live(), 2);

    let outcome = h.controller.reoptimize().await.unwrap();
    assert_eq!(
        outcome,
        ReoptimizeOutcome::Applied {
            stopped: 1,
            started: 0,
            failed: 0
        }
    );
    assert_eq!(h.backend.live(), 1);
    assert!(h
        .controller
        .settings()
        .await
        .unwrap()
        .disabled_devices
        .contains(&DeviceId::nvidia(1)));
}

#[tokio::test]
async fn test_status_subscription_and_driver() {
    let h = harness(vec![device(0, &["x"])], &[("x", 10.0)], prices(&[("x", 1.0)]));
    let mut status = h.controller.subscribe_status();
    let mut state = h.controller.subscribe_state();

    h.controller.start(Settings::default()).await.unwrap();
    assert_eq!(*state.borrow_and_update(), SessionState::Mining);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let driver = h.controller.spawn_driver(shutdown.clone());

    // Wait for the first snapshot carrying telemetry
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            status.changed().await.unwrap();
            if status.borrow_and_update().total_revenue > 0.0 {
                break;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(status.borrow().total_revenue, 50.0);

    // A price change triggers reoptimization through the driver
    let cycles = h.controller.stats().optimize_cycles;
    h.controller.notify_price_change();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.controller.stats().optimize_cycles > cycles);

    shutdown.cancel();
    driver.await.unwrap();
    h.controller.stop().await;
    assert_eq!(*state.borrow_and_update(), SessionState::Idle);
}
