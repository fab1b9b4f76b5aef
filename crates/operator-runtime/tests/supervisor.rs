//! Supervisor lifecycle: cache sync gate, shutdown and leaf-level failures.

use operator_runtime::testing::{ControllerProbe, MockCache, MockController, RecordingPublisher};
use operator_runtime::{
    CacheKey, CacheLayer, ConditionStatus, ConditionType, Controller, ControllerHealth,
    ControllerRegistry, ControllerSpec, ControllerState, HealthBoard, QueueController,
    RelatedObject, StatusSync, Supervisor, SupervisorError, VersionGetter,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn spec(name: &str, controller: MockController) -> ControllerSpec {
    ControllerSpec::new(name, move |_| Ok(Box::new(controller) as Box<dyn Controller>))
}

fn cancel_after(cancel: &CancellationToken, delay: Duration) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        cancel.cancel();
    });
}

#[tokio::test]
async fn test_wait_for_cache_sync_returns_false_when_cancelled() {
    let mut layer = CacheLayer::new();
    for ns in ["a", "b"] {
        let key = CacheKey::namespaced("Secret", ns);
        layer
            .register(key.clone(), || {
                MockCache::synced_after(key.clone(), Duration::from_millis(10))
            })
            .expect("cache");
    }
    let stalled = CacheKey::namespaced("Secret", "c");
    layer
        .register(stalled.clone(), || MockCache::never_syncs(stalled.clone()))
        .expect("cache");

    let cancel = CancellationToken::new();
    layer.start_all(&cancel);
    cancel_after(&cancel, Duration::from_millis(50));

    let started = Instant::now();
    assert!(!layer.wait_for_cache_sync(&cancel).await);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(45), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "returned late: {elapsed:?}");

    let synced = layer
        .snapshot()
        .iter()
        .filter(|c| c.state == operator_runtime::SyncState::Synced)
        .count();
    assert_eq!(synced, 2);
}

#[tokio::test]
async fn test_cancel_before_sync_starts_no_controller() {
    let mut layer = CacheLayer::new();
    let fast_a = CacheKey::namespaced("ConfigMap", "openshift-config");
    let fast_b = CacheKey::namespaced("Secret", "openshift-config");
    let stalled = CacheKey::cluster("Namespace");
    for key in [&fast_a, &fast_b] {
        layer
            .register(key.clone(), || {
                MockCache::synced_after(key.clone(), Duration::from_millis(10))
            })
            .expect("cache");
    }
    layer
        .register(stalled.clone(), || MockCache::never_syncs(stalled.clone()))
        .expect("cache");

    let controller = MockController::until_cancelled();
    let probe = controller.probe();
    let mut registry = ControllerRegistry::new();
    registry.add(spec("observer", controller).caches([fast_a, fast_b, stalled]));
    let wired = registry.wire(&layer).expect("wire");

    let supervisor = Supervisor::new(Arc::new(layer), wired, HealthBoard::new());
    let lifecycle = supervisor.lifecycle();
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(50));

    let result = supervisor.run(cancel).await;

    assert!(matches!(result, Err(SupervisorError::Stopped)));
    assert_eq!(lifecycle.state("observer"), Some(ControllerState::Constructed));
    assert!(probe.started_at().is_none());
}

#[tokio::test]
async fn test_cancellation_stops_every_controller() {
    let mut layer = CacheLayer::new();
    let key = CacheKey::cluster("Namespace");
    layer
        .register(key.clone(), || MockCache::synced(key.clone()))
        .expect("cache");

    let names = ["one", "two", "three", "four", "five"];
    let mut probes: Vec<ControllerProbe> = Vec::new();
    let mut registry = ControllerRegistry::new();
    for name in names {
        let controller = MockController::until_cancelled();
        probes.push(controller.probe());
        registry.add(spec(name, controller).cache(key.clone()).workers(2));
    }
    let wired = registry.wire(&layer).expect("wire");

    let supervisor = Supervisor::new(Arc::new(layer), wired, HealthBoard::new())
        .with_grace(Duration::from_millis(200));
    let lifecycle = supervisor.lifecycle();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(supervisor.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    for name in names {
        assert_eq!(lifecycle.state(name), Some(ControllerState::Running), "{name}");
    }

    let cancelled_at = Instant::now();
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("supervisor returned")
        .expect("join");

    assert!(matches!(result, Err(SupervisorError::Stopped)));
    for (name, probe) in names.iter().zip(&probes) {
        assert!(probe.observed_cancel(), "{name} did not observe cancellation");
        assert_eq!(probe.workers(), 2);
        let stopped_at = probe.stopped_at().expect("stopped");
        assert!(
            stopped_at.saturating_duration_since(cancelled_at) < Duration::from_millis(100),
            "{name} took too long to stop"
        );
        assert_eq!(lifecycle.state(name), Some(ControllerState::Stopped));
    }
}

#[tokio::test]
async fn test_controller_starts_only_after_its_caches_sync() {
    let mut layer = CacheLayer::new();
    let key = CacheKey::namespaced("Secret", "openshift-apiserver");
    layer
        .register(key.clone(), || MockCache::synced_after(key.clone(), Duration::from_millis(30)))
        .expect("cache");

    let controller = MockController::until_cancelled();
    let probe = controller.probe();
    let mut registry = ControllerRegistry::new();
    registry.add(spec("revision", controller).cache(key));
    let wired = registry.wire(&layer).expect("wire");

    let supervisor = Supervisor::new(Arc::new(layer), wired, HealthBoard::new());
    let cancel = CancellationToken::new();
    let began = Instant::now();
    let run = tokio::spawn(supervisor.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(80)).await;
    cancel.cancel();
    let _ = run.await.expect("join");

    let started_at = probe.started_at().expect("controller started");
    assert!(started_at.duration_since(began) >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_failing_controller_degrades_status_without_touching_siblings() {
    let mut layer = CacheLayer::new();
    let key = CacheKey::cluster("Namespace");
    layer
        .register(key.clone(), || MockCache::synced(key.clone()))
        .expect("cache");

    let health = HealthBoard::new();
    let versions = VersionGetter::new();
    let publisher = Arc::new(RecordingPublisher::new());

    let mut registry = ControllerRegistry::new();
    let siblings = ["workload", "prune", "revision", "finalizer"];
    for name in siblings {
        registry.add(
            spec(name, MockController::until_cancelled().reporting_to(health.clone(), name))
                .cache(key.clone()),
        );
    }
    registry.add(
        spec(
            "failing",
            MockController::fails_after(Duration::from_millis(60))
                .reporting_to(health.clone(), "failing"),
        )
        .cache(key.clone()),
    );
    {
        let health = health.clone();
        let versions = versions.clone();
        let publisher = Arc::clone(&publisher);
        registry.add(ControllerSpec::new("status", move |_| {
            let sync = StatusSync::new(
                health.clone(),
                versions.clone(),
                vec![RelatedObject::namespace("openshift-apiserver")],
                publisher,
            );
            Ok(Box::new(
                QueueController::new("status", sync, health.clone())
                    .watch(health.subscribe())
                    .watch(versions.subscribe()),
            ) as Box<dyn Controller>)
        }));
    }
    let wired = registry.wire(&layer).expect("wire");

    let supervisor = Supervisor::new(Arc::new(layer), wired, health.clone())
        .with_grace(Duration::from_millis(200));
    let lifecycle = supervisor.lifecycle();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(supervisor.run(cancel.clone()));

    let degraded = publisher
        .wait_for(Duration::from_secs(2), |status| {
            status.is(ConditionType::Degraded, ConditionStatus::True)
        })
        .await
        .expect("degraded status published");
    let first = publisher.published().first().cloned().expect("published");
    assert!(first.is(ConditionType::Available, ConditionStatus::True));
    assert!(first.is(ConditionType::Degraded, ConditionStatus::False));

    let condition = degraded.condition(ConditionType::Degraded).expect("condition");
    assert_eq!(condition.reason, "FailingDegraded");
    assert!(condition.message.contains("scripted failure"));

    assert_eq!(lifecycle.state("failing"), Some(ControllerState::Stopped));
    let expected = ControllerHealth::healthy().with_available(true, "AsExpected", "");
    for name in siblings {
        assert_eq!(lifecycle.state(name), Some(ControllerState::Running), "{name}");
        assert_eq!(health.get(name).as_ref(), Some(&expected), "{name}");
    }

    cancel.cancel();
    let result = run.await.expect("join");
    assert!(matches!(result, Err(SupervisorError::Stopped)));
}
