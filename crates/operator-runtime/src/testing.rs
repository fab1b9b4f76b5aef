//! In-memory test doubles.
//!
//! Available to this crate's tests and, through the `test-util` feature, to
//! downstream crates that want to exercise supervision without a cluster.

use crate::cache::{Cache, CacheKey, SyncState, SyncTracker};
use crate::controller::Controller;
use crate::error::ControllerError;
use crate::status::{AggregatedStatus, ControllerHealth, HealthBoard, StatusPublisher};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Cache whose sync timing is scripted.
#[derive(Debug)]
pub struct MockCache {
    key: CacheKey,
    tracker: Arc<SyncTracker>,
    sync_after: Option<Duration>,
}

impl MockCache {
    /// Cache that syncs as soon as it is started.
    pub fn synced(key: CacheKey) -> Self {
        Self::synced_after(key, Duration::ZERO)
    }

    /// Cache that syncs `delay` after it is started.
    pub fn synced_after(key: CacheKey, delay: Duration) -> Self {
        Self {
            key,
            tracker: Arc::new(SyncTracker::new()),
            sync_after: Some(delay),
        }
    }

    /// Cache that never completes its initial list.
    pub fn never_syncs(key: CacheKey) -> Self {
        Self {
            key,
            tracker: Arc::new(SyncTracker::new()),
            sync_after: None,
        }
    }

    /// Completes the initial list now.
    pub fn mark_synced(&self) {
        self.tracker.mark_synced();
    }

    /// Simulates a change to the cache contents.
    pub fn touch(&self) {
        self.tracker.bump();
    }
}

impl Cache for MockCache {
    fn key(&self) -> &CacheKey {
        &self.key
    }

    fn start(&self, cancel: CancellationToken) {
        if !self.tracker.try_start() {
            return;
        }
        match self.sync_after {
            None => {}
            Some(delay) if delay.is_zero() => self.tracker.mark_synced(),
            Some(delay) => {
                let tracker = Arc::clone(&self.tracker);
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(delay) => tracker.mark_synced(),
                    }
                });
            }
        }
    }

    fn sync_state(&self) -> SyncState {
        self.tracker.state()
    }

    fn pending(&self) -> usize {
        self.tracker.pending()
    }

    fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.tracker.subscribe_state()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.tracker.subscribe()
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    observed_cancel: bool,
    workers: usize,
}

/// Records what a [`MockController`] went through.
#[derive(Debug, Clone, Default)]
pub struct ControllerProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl ControllerProbe {
    fn update(&self, f: impl FnOnce(&mut ProbeState)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn read<T>(&self, f: impl FnOnce(&ProbeState) -> T) -> T {
        f(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// When `run` was entered.
    pub fn started_at(&self) -> Option<Instant> {
        self.read(|s| s.started_at)
    }

    /// When `run` returned.
    pub fn stopped_at(&self) -> Option<Instant> {
        self.read(|s| s.stopped_at)
    }

    /// Whether `run` returned because the token fired.
    pub fn observed_cancel(&self) -> bool {
        self.read(|s| s.observed_cancel)
    }

    /// Worker width `run` was called with.
    pub fn workers(&self) -> usize {
        self.read(|s| s.workers)
    }
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    UntilCancelled,
    FailAfter(Duration),
    ReturnAfter(Duration),
    PanicAfter(Duration),
}

/// Controller with scripted behaviour.
#[derive(Debug)]
pub struct MockController {
    behaviour: Behaviour,
    probe: ControllerProbe,
    health: Option<(HealthBoard, String)>,
}

impl MockController {
    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            probe: ControllerProbe::default(),
            health: None,
        }
    }

    /// Runs until cancelled.
    pub fn until_cancelled() -> Self {
        Self::with(Behaviour::UntilCancelled)
    }

    /// Returns an error `delay` after starting.
    pub fn fails_after(delay: Duration) -> Self {
        Self::with(Behaviour::FailAfter(delay))
    }

    /// Returns `Ok` `delay` after starting.
    pub fn returns_after(delay: Duration) -> Self {
        Self::with(Behaviour::ReturnAfter(delay))
    }

    /// Panics `delay` after starting.
    pub fn panics_after(delay: Duration) -> Self {
        Self::with(Behaviour::PanicAfter(delay))
    }

    /// Reports healthy and available under `name` when it starts running.
    #[must_use]
    pub fn reporting_to(mut self, health: HealthBoard, name: impl Into<String>) -> Self {
        self.health = Some((health, name.into()));
        self
    }

    /// Probe shared with this controller.
    pub fn probe(&self) -> ControllerProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl Controller for MockController {
    async fn run(&self, cancel: CancellationToken, workers: usize) -> Result<(), ControllerError> {
        self.probe.update(|s| {
            s.started_at = Some(Instant::now());
            s.workers = workers;
        });
        if let Some((health, name)) = &self.health {
            health.report(
                name,
                ControllerHealth::healthy().with_available(true, "AsExpected", ""),
            );
        }

        let delay = match self.behaviour {
            Behaviour::UntilCancelled => None,
            Behaviour::FailAfter(d) | Behaviour::ReturnAfter(d) | Behaviour::PanicAfter(d) => {
                Some(d)
            }
        };
        let cancelled = match delay {
            None => {
                cancel.cancelled().await;
                true
            }
            Some(delay) => tokio::select! {
                biased;
                () = cancel.cancelled() => true,
                () = tokio::time::sleep(delay) => false,
            },
        };

        self.probe.update(|s| {
            s.stopped_at = Some(Instant::now());
            s.observed_cancel = cancelled;
        });
        if cancelled {
            return Ok(());
        }
        match self.behaviour {
            Behaviour::FailAfter(_) => Err(ControllerError::Sync("scripted failure".to_string())),
            Behaviour::PanicAfter(_) => panic!("scripted panic"),
            Behaviour::UntilCancelled | Behaviour::ReturnAfter(_) => Ok(()),
        }
    }
}

/// Status publisher that keeps every published record.
#[derive(Debug)]
pub struct RecordingPublisher {
    published: watch::Sender<Vec<AggregatedStatus>>,
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPublisher {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        let (published, _) = watch::channel(Vec::new());
        Self { published }
    }

    /// Every record published so far.
    pub fn published(&self) -> Vec<AggregatedStatus> {
        self.published.borrow().clone()
    }

    /// Most recent record.
    pub fn last(&self) -> Option<AggregatedStatus> {
        self.published.borrow().last().cloned()
    }

    /// Waits until a published record satisfies `predicate`.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Option<AggregatedStatus>
    where
        F: Fn(&AggregatedStatus) -> bool,
    {
        let mut rx = self.published.subscribe();
        tokio::time::timeout(timeout, async {
            loop {
                let found = rx.borrow_and_update().iter().rev().find(|s| predicate(s)).cloned();
                if found.is_some() {
                    return found;
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await
        .ok()
        .flatten()
    }
}

#[async_trait]
impl StatusPublisher for RecordingPublisher {
    async fn publish(&self, status: &AggregatedStatus) -> Result<(), ControllerError> {
        self.published.send_modify(|published| published.push(status.clone()));
        Ok(())
    }
}
