//! Supervisor.
//!
//! Runs the wired controllers against the shared cache layer:
//!
//! 1. start every cache and wait for all of them to sync
//! 2. start each controller as its own task, never restarting it
//! 3. absorb controllers that exit early, reporting them on the health board
//! 4. on cancellation, give tasks a grace period, abort stragglers and return
//!    [`SupervisorError::Stopped`]

use crate::cache::CacheLayer;
use crate::controller::{ControllerState, LifecycleBoard};
use crate::error::{ControllerError, SupervisorError};
use crate::metrics::SupervisorMetrics;
use crate::status::{ControllerHealth, HealthBoard};
use crate::wiring::WiredControllers;
use futures::FutureExt;
use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default time controllers get to return after cancellation.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Outcome = Result<Result<(), ControllerError>, Box<dyn Any + Send>>;

/// Owns the cache layer and the wired controllers for one process lifetime.
#[derive(Debug)]
pub struct Supervisor {
    caches: Arc<CacheLayer>,
    controllers: WiredControllers,
    health: HealthBoard,
    lifecycle: LifecycleBoard,
    grace: Duration,
    metrics: Option<SupervisorMetrics>,
}

impl Supervisor {
    /// Creates a supervisor. Every controller starts out `Constructed`.
    pub fn new(
        caches: Arc<CacheLayer>,
        controllers: WiredControllers,
        health: HealthBoard,
    ) -> Self {
        let lifecycle = LifecycleBoard::new();
        for controller in controllers.iter() {
            lifecycle.register(&controller.name);
        }
        Self {
            caches,
            controllers,
            health,
            lifecycle,
            grace: DEFAULT_SHUTDOWN_GRACE,
            metrics: None,
        }
    }

    /// Time controllers get to return after cancellation before being aborted.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Records cache and controller state in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SupervisorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shared lifecycle view, for introspection and tests.
    pub fn lifecycle(&self) -> LifecycleBoard {
        self.lifecycle.clone()
    }

    /// Runs until `cancel` fires. Always ends with [`SupervisorError::Stopped`].
    pub async fn run(self, cancel: CancellationToken) -> Result<Infallible, SupervisorError> {
        let Self {
            caches,
            controllers,
            health,
            lifecycle,
            grace,
            metrics,
        } = self;

        info!(caches = caches.len(), "starting caches");
        caches.start_all(&cancel);
        if !caches.wait_for_cache_sync(&cancel).await {
            info!("cancelled before caches synced, no controller was started");
            return Err(SupervisorError::Stopped);
        }
        if let Some(metrics) = &metrics {
            metrics.observe_caches(&caches.snapshot());
        }

        let mut tasks: JoinSet<(String, Outcome)> = JoinSet::new();
        for wired in controllers {
            lifecycle.transition(&wired.name, ControllerState::Started);
            debug!(controller = %wired.name, workers = wired.workers, "starting controller");

            let lifecycle = lifecycle.clone();
            let metrics = metrics.clone();
            let token = cancel.clone();
            tasks.spawn(async move {
                lifecycle.transition(&wired.name, ControllerState::Running);
                if let Some(metrics) = &metrics {
                    metrics.set_running(&wired.name, true);
                }
                let outcome = AssertUnwindSafe(wired.controller.run(token, wired.workers))
                    .catch_unwind()
                    .await;
                (wired.name, outcome)
            });
        }
        info!(controllers = tasks.len(), "all controllers started");

        let exited = |name: &str, outcome: Outcome, cancelled: bool| {
            lifecycle.transition(name, ControllerState::Stopped);
            if let Some(metrics) = &metrics {
                metrics.set_running(name, false);
            }
            let message = match outcome {
                Ok(Ok(())) if cancelled => {
                    debug!(controller = name, "controller stopped");
                    return;
                }
                Ok(Ok(())) => {
                    warn!(controller = name, "controller exited unexpectedly");
                    "controller exited".to_string()
                }
                Ok(Err(e)) => {
                    error!(controller = name, error = %e, "controller failed");
                    format!("controller failed: {e}")
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(controller = name, panic = %reason, "controller panicked");
                    format!("controller panicked: {reason}")
                }
            };
            if !cancelled {
                health.report(name, ControllerHealth::stopped(message));
            }
        };

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                joined = tasks.join_next() => match joined {
                    Some(Ok((name, outcome))) => exited(&name, outcome, false),
                    Some(Err(e)) => error!(error = %e, "controller task failed to join"),
                    None => {
                        warn!("every controller has exited, waiting for shutdown");
                        cancel.cancelled().await;
                        break;
                    }
                },
            }
        }

        info!(grace_ms = grace.as_millis(), "shutting down controllers");
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                joined = tasks.join_next() => match joined {
                    Some(Ok((name, outcome))) => exited(&name, outcome, true),
                    Some(Err(e)) => debug!(error = %e, "controller task ended during shutdown"),
                    None => break,
                },
                () = &mut deadline => {
                    warn!(remaining = tasks.len(), "grace period elapsed, aborting controllers");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        for name in lifecycle.not_stopped() {
            lifecycle.transition(&name, ControllerState::Stopped);
            if let Some(metrics) = &metrics {
                metrics.set_running(&name, false);
            }
        }
        info!("supervisor stopped");
        Err(SupervisorError::Stopped)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::controller::Controller;
    use crate::testing::{MockCache, MockController};
    use crate::wiring::{ControllerRegistry, ControllerSpec};

    fn spec(name: &str, controller: MockController) -> ControllerSpec {
        ControllerSpec::new(name, move |_| Ok(Box::new(controller) as Box<dyn Controller>))
    }

    #[tokio::test]
    async fn test_panicking_controller_is_contained() {
        let health = HealthBoard::new();
        let mut layer = CacheLayer::new();
        let key = CacheKey::cluster("Namespace");
        layer
            .register(key.clone(), || MockCache::synced(key.clone()))
            .expect("cache");

        let steady = MockController::until_cancelled();
        let steady_probe = steady.probe();
        let mut registry = ControllerRegistry::new();
        registry
            .add(
                spec("panicky", MockController::panics_after(Duration::from_millis(5)))
                    .cache(key.clone()),
            )
            .add(spec("steady", steady).cache(key));
        let wired = registry.wire(&layer).expect("wire");

        let supervisor = Supervisor::new(Arc::new(layer), wired, health.clone())
            .with_grace(Duration::from_millis(200));
        let lifecycle = supervisor.lifecycle();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(supervisor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lifecycle.state("panicky"), Some(ControllerState::Stopped));
        assert_eq!(lifecycle.state("steady"), Some(ControllerState::Running));
        let reported = health.get("panicky").expect("panicky health");
        assert!(
            reported
                .degraded
                .is_some_and(|d| d.status && d.message.contains("scripted panic"))
        );

        cancel.cancel();
        let result = run.await.expect("join");
        assert!(matches!(result, Err(SupervisorError::Stopped)));
        assert!(steady_probe.observed_cancel());
        assert_eq!(lifecycle.state("steady"), Some(ControllerState::Stopped));
    }

    #[tokio::test]
    async fn test_stragglers_are_aborted_after_grace() {
        struct Stubborn;

        #[async_trait::async_trait]
        impl Controller for Stubborn {
            async fn run(
                &self,
                _cancel: CancellationToken,
                _workers: usize,
            ) -> Result<(), ControllerError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let mut registry = ControllerRegistry::new();
        registry.add(ControllerSpec::new("stubborn", |_| {
            Ok(Box::new(Stubborn) as Box<dyn Controller>)
        }));
        let layer = CacheLayer::new();
        let wired = registry.wire(&layer).expect("wire");
        let supervisor = Supervisor::new(Arc::new(layer), wired, HealthBoard::new())
            .with_grace(Duration::from_millis(20));
        let lifecycle = supervisor.lifecycle();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(supervisor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("supervisor returned within grace")
            .expect("join");
        assert!(result.is_err());
        assert_eq!(lifecycle.state("stubborn"), Some(ControllerState::Stopped));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
