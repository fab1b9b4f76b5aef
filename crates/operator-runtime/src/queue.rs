//! Work queue and the queue-driven controller base.
//!
//! A [`QueueController`] turns change notifications from its caches (or any
//! other `watch` channel) into queue keys and runs a [`SyncHandler`] for each
//! key with `workers` parallel workers. A key is never processed by two
//! workers at once; a key added while it is being processed is queued again
//! once the current pass finishes. Failed passes are requeued with a
//! Fibonacci backoff and reported as Degraded on the health board.

use crate::backoff::FibonacciBackoff;
use crate::cache::Cache;
use crate::controller::Controller;
use crate::error::ControllerError;
use crate::metrics::SupervisorMetrics;
use crate::status::{ControllerHealth, HealthBoard};
use async_trait::async_trait;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::{self, BoxStream};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Key used by controllers that reconcile a single logical object.
pub const DEFAULT_KEY: &str = "key";

const DEFAULT_BACKOFF_MIN: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
}

/// De-duplicating work queue.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `key` unless it is already waiting.
    pub fn add(&self, key: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.dirty.insert(key.to_string()) {
            return;
        }
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Queues `key` after `delay`, unless `cancel` fires first.
    pub fn add_after(self: &Arc<Self>, key: String, delay: Duration, cancel: &CancellationToken) {
        let queue = Arc::clone(self);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => queue.add(&key),
            }
        });
    }

    /// Waits for the next key. Returns `None` once `cancel` fires.
    ///
    /// The caller must call [`WorkQueue::done`] when it finishes the key.
    pub async fn get(&self, cancel: &CancellationToken) -> Option<String> {
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = self.notify.notified() => {}
            }
        }
    }

    /// Marks `key` as finished, requeueing it if it was added meanwhile.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Number of keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .len()
    }

    /// Whether no keys are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One reconciliation pass for a queue key.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Reconciles `key` and returns the controller's resulting health.
    async fn sync(&self, key: &str) -> Result<ControllerHealth, ControllerError>;

    /// Runs once the health returned by a successful pass is on the health
    /// board. Component versions confirmed by the pass are recorded here, so
    /// status computed from them never carries the previous pass's health.
    fn reported(&self, _key: &str, _health: &ControllerHealth) {}
}

type Trigger = Box<dyn Fn() -> BoxStream<'static, ()> + Send + Sync>;

fn changes<T>(rx: watch::Receiver<T>) -> BoxStream<'static, ()>
where
    T: Send + Sync + 'static,
{
    stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok().map(|()| ((), rx))
    })
    .boxed()
}

/// Controller that runs a [`SyncHandler`] off a [`WorkQueue`].
pub struct QueueController<H> {
    name: String,
    handler: Arc<H>,
    health: HealthBoard,
    triggers: Vec<Trigger>,
    resync: Option<Duration>,
    backoff_min: Duration,
    backoff_max: Duration,
    metrics: Option<SupervisorMetrics>,
}

impl<H> fmt::Debug for QueueController<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueController")
            .field("name", &self.name)
            .field("triggers", &self.triggers.len())
            .field("resync", &self.resync)
            .finish_non_exhaustive()
    }
}

impl<H: SyncHandler + 'static> QueueController<H> {
    /// Creates a controller reporting its health under `name`.
    pub fn new(name: impl Into<String>, handler: H, health: HealthBoard) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            health,
            triggers: Vec::new(),
            resync: None,
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_max: DEFAULT_BACKOFF_MAX,
            metrics: None,
        }
    }

    /// Queues [`DEFAULT_KEY`] whenever `rx` changes.
    #[must_use]
    pub fn watch<T>(mut self, rx: watch::Receiver<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.triggers.push(Box::new(move || changes(rx.clone())));
        self
    }

    /// Queues [`DEFAULT_KEY`] whenever the cache contents change.
    #[must_use]
    pub fn watch_cache(self, cache: &dyn Cache) -> Self {
        self.watch(cache.subscribe())
    }

    /// Queues [`DEFAULT_KEY`] periodically.
    #[must_use]
    pub fn resync_every(mut self, period: Duration) -> Self {
        self.resync = Some(period);
        self
    }

    /// Bounds of the requeue backoff after failed passes.
    #[must_use]
    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    /// Records sync results in `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: SupervisorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    async fn forward(
        &self,
        mut trigger: BoxStream<'static, ()>,
        queue: &WorkQueue,
        cancel: &CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = trigger.next() => match changed {
                    Some(()) => queue.add(DEFAULT_KEY),
                    None => return,
                },
            }
        }
    }

    async fn resync_loop(&self, queue: &WorkQueue, cancel: &CancellationToken) {
        let Some(period) = self.resync else {
            return;
        };
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                _ = ticker.tick() => queue.add(DEFAULT_KEY),
            }
        }
    }

    async fn worker(
        &self,
        worker: usize,
        queue: &Arc<WorkQueue>,
        failures: &Mutex<HashMap<String, u32>>,
        cancel: &CancellationToken,
    ) {
        debug!(controller = %self.name, worker, "worker started");
        while let Some(key) = queue.get(cancel).await {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    queue.done(&key);
                    break;
                }
                result = self.handler.sync(&key) => result,
            };

            match result {
                Ok(health) => {
                    failures
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&key);
                    self.health.report(&self.name, health.clone());
                    self.handler.reported(&key, &health);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_sync(&self.name, true);
                    }
                }
                Err(e) => {
                    let attempt = {
                        let mut failures = failures.lock().unwrap_or_else(PoisonError::into_inner);
                        let count = failures.entry(key.clone()).or_insert(0);
                        *count = count.saturating_add(1);
                        *count
                    };
                    let delay = FibonacciBackoff::calculate_for_error_count(
                        attempt - 1,
                        self.backoff_min,
                        self.backoff_max,
                    );
                    warn!(
                        controller = %self.name,
                        key = %key,
                        attempt,
                        retry_in_ms = delay.as_millis(),
                        error = %e,
                        "sync failed"
                    );
                    self.health
                        .report(&self.name, ControllerHealth::degraded("SyncError", e.to_string()));
                    if let Some(metrics) = &self.metrics {
                        metrics.record_sync(&self.name, false);
                    }
                    queue.add_after(key.clone(), delay, cancel);
                }
            }
            queue.done(&key);
        }
        debug!(controller = %self.name, worker, "worker stopped");
    }
}

#[async_trait]
impl<H: SyncHandler + 'static> Controller for QueueController<H> {
    async fn run(&self, cancel: CancellationToken, workers: usize) -> Result<(), ControllerError> {
        info!(controller = %self.name, workers, "starting controller");
        let queue = Arc::new(WorkQueue::new());
        let failures = Mutex::new(HashMap::new());
        queue.add(DEFAULT_KEY);

        let forwarders = join_all(
            self.triggers
                .iter()
                .map(|trigger| self.forward(trigger(), &queue, &cancel)),
        );
        let workers = join_all(
            (0..workers.max(1)).map(|id| self.worker(id, &queue, &failures, &cancel)),
        );
        futures::join!(forwarders, workers, self.resync_loop(&queue, &cancel));

        info!(controller = %self.name, "controller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_queue_deduplicates_waiting_keys() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.len(), 2);

        let cancel = CancellationToken::new();
        assert_eq!(queue.get(&cancel).await.as_deref(), Some("a"));
        assert_eq!(queue.get(&cancel).await.as_deref(), Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_added_while_processing_is_requeued_on_done() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        queue.add("a");
        let key = queue.get(&cancel).await.expect("key");

        queue.add("a");
        assert!(queue.is_empty(), "key in flight must not be handed out twice");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_get_returns_none_on_cancel() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(queue.get(&cancel).await.is_none());
    }

    struct Counting {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl SyncHandler for Counting {
        async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(ControllerError::Sync(format!("attempt {call}")));
            }
            Ok(ControllerHealth::healthy())
        }
    }

    #[tokio::test]
    async fn test_failed_sync_is_retried_and_recovers() {
        let health = HealthBoard::new();
        let controller = QueueController::new(
            "retry",
            Counting {
                calls: AtomicUsize::new(0),
                fail_first: 2,
            },
            health.clone(),
        )
        .backoff(Duration::from_millis(5), Duration::from_millis(20));

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let mut rx = health.subscribe();
        let run = tokio::spawn(async move { controller.run(stop, 1).await });

        let recovered = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let healthy = rx
                    .borrow_and_update()
                    .get("retry")
                    .is_some_and(|h| *h == ControllerHealth::healthy());
                if healthy {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(recovered.is_ok(), "controller never recovered");

        cancel.cancel();
        let result = run.await.expect("join");
        assert!(result.is_ok());
    }

    struct Observing {
        health: HealthBoard,
        seen: Mutex<Vec<Option<ControllerHealth>>>,
    }

    #[async_trait]
    impl SyncHandler for Observing {
        async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
            Ok(ControllerHealth::healthy().with_progressing(false, "AsExpected", ""))
        }

        fn reported(&self, _key: &str, _health: &ControllerHealth) {
            self.seen
                .lock()
                .expect("seen")
                .push(self.health.get("observing"));
        }
    }

    #[tokio::test]
    async fn test_reported_runs_after_health_is_on_the_board() {
        let health = HealthBoard::new();
        let controller = Arc::new(QueueController::new(
            "observing",
            Observing {
                health: health.clone(),
                seen: Mutex::new(Vec::new()),
            },
            health.clone(),
        ));

        let cancel = CancellationToken::new();
        let run = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.run(cancel, 1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        run.await.expect("join").expect("run");

        let seen = controller.handler().seen.lock().expect("seen").clone();
        assert_eq!(
            seen,
            vec![Some(ControllerHealth::healthy().with_progressing(false, "AsExpected", ""))]
        );
    }

    #[tokio::test]
    async fn test_trigger_queues_another_pass() {
        let health = HealthBoard::new();
        let (tx, rx) = watch::channel(0_u64);
        let controller = Arc::new(
            QueueController::new(
                "triggered",
                Counting {
                    calls: AtomicUsize::new(0),
                    fail_first: 0,
                },
                health,
            )
            .watch(rx),
        );

        let cancel = CancellationToken::new();
        let run = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.run(cancel, 2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send_replace(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        run.await.expect("join").expect("run");

        assert!(controller.handler().calls.load(Ordering::SeqCst) >= 2);
    }
}
