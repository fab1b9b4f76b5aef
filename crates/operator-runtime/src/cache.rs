//! Shared cache layer.
//!
//! One cache exists per `(kind, scope)` pair. Caches are registered once
//! during startup, started together by the supervisor and handed to every
//! controller that declares them. Controllers only ever read from a cache.
//!
//! Reads before a cache reports [`SyncState::Synced`] return whatever has been
//! observed so far; they never fail.

use crate::error::CacheError;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scope of a cache: the whole cluster or a single namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    /// Cluster-scoped resources, or namespaced resources across all namespaces
    Cluster,
    /// A single namespace
    Namespace(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Cluster => f.write_str("cluster"),
            Scope::Namespace(ns) => f.write_str(ns),
        }
    }
}

/// Identity of a cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    /// Resource kind, e.g. `ConfigMap`
    pub kind: String,
    /// Scope the cache mirrors
    pub scope: Scope,
}

impl CacheKey {
    /// Key for a cluster-wide cache.
    pub fn cluster(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scope: Scope::Cluster,
        }
    }

    /// Key for a cache of one namespace.
    pub fn namespaced(kind: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scope: Scope::Namespace(namespace.into()),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.scope)
    }
}

/// Synchronization state of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    /// `start` has not been called
    NotStarted,
    /// The initial list is in progress
    Syncing,
    /// The initial list completed at least once
    Synced,
}

/// A locally held, eventually consistent mirror of one class of remote objects.
pub trait Cache: Send + Sync {
    /// Identity of this cache.
    fn key(&self) -> &CacheKey;

    /// Begins background synchronization. Calling it again is a no-op.
    fn start(&self, cancel: CancellationToken);

    /// Current synchronization state.
    fn sync_state(&self) -> SyncState;

    /// Whether the initial list has completed.
    fn has_synced(&self) -> bool {
        self.sync_state() == SyncState::Synced
    }

    /// Items received during the current initial list that are not yet visible to readers.
    fn pending(&self) -> usize;

    /// Receiver that changes whenever the sync state changes.
    fn subscribe_state(&self) -> watch::Receiver<SyncState>;

    /// Receiver whose value is bumped on every observed change to the cache contents.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Bookkeeping shared by cache implementations: sync state, change generation
/// and pending item count.
#[derive(Debug)]
pub struct SyncTracker {
    state: watch::Sender<SyncState>,
    changes: watch::Sender<u64>,
    pending: AtomicUsize,
    started: AtomicBool,
}

impl Default for SyncTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTracker {
    /// Creates a tracker in the `NotStarted` state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(SyncState::NotStarted);
        let (changes, _) = watch::channel(0);
        Self {
            state,
            changes,
            pending: AtomicUsize::new(0),
            started: AtomicBool::new(false),
        }
    }

    /// Marks the tracker as started. Returns false if it was already started.
    pub fn try_start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.send_replace(SyncState::Syncing);
        true
    }

    /// Marks the initial list as complete. A synced cache never goes back to syncing.
    pub fn mark_synced(&self) {
        self.pending.store(0, Ordering::SeqCst);
        self.state.send_if_modified(|state| {
            if *state == SyncState::Synced {
                return false;
            }
            *state = SyncState::Synced;
            true
        });
        self.bump();
    }

    /// Records a change to the cache contents.
    pub fn bump(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Resets the pending counter at the start of a (re)list.
    pub fn reset_pending(&self) {
        self.pending.store(0, Ordering::SeqCst);
    }

    /// Counts one item buffered by the current list.
    pub fn add_pending(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Current sync state.
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Current pending count.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Subscribes to sync state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Subscribes to content changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

/// Point-in-time view of one cache, used by the debug endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    /// Resource kind
    pub kind: String,
    /// Cache scope
    pub scope: Scope,
    /// Sync state
    pub state: SyncState,
    /// Pending item count
    pub pending: usize,
}

struct Entry {
    cache: Arc<dyn Cache>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// The set of shared caches, keyed by `(kind, scope)`.
#[derive(Default)]
pub struct CacheLayer {
    caches: BTreeMap<CacheKey, Entry>,
}

impl fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLayer")
            .field("caches", &self.caches.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CacheLayer {
    /// Creates an empty cache layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cache registered for `key`, building it with `make` the first time.
    ///
    /// Every consumer of a key receives the same instance.
    pub fn register<C, F>(&mut self, key: CacheKey, make: F) -> Result<Arc<C>, CacheError>
    where
        C: Cache + 'static,
        F: FnOnce() -> C,
    {
        if let Some(entry) = self.caches.get(&key) {
            return Arc::clone(&entry.typed)
                .downcast::<C>()
                .map_err(|_| CacheError::TypeMismatch(key));
        }

        let cache = Arc::new(make());
        if cache.key() != &key {
            return Err(CacheError::KeyMismatch {
                expected: key,
                actual: cache.key().clone(),
            });
        }

        debug!(cache = %key, "registered cache");
        let dyn_cache: Arc<dyn Cache> = cache.clone();
        let typed: Arc<dyn Any + Send + Sync> = cache.clone();
        self.caches.insert(key, Entry { cache: dyn_cache, typed });
        Ok(cache)
    }

    /// Typed lookup of a registered cache.
    pub fn get<C: Cache + 'static>(&self, key: &CacheKey) -> Result<Arc<C>, CacheError> {
        let entry = self
            .caches
            .get(key)
            .ok_or_else(|| CacheError::NotRegistered(key.clone()))?;
        Arc::clone(&entry.typed)
            .downcast::<C>()
            .map_err(|_| CacheError::TypeMismatch(key.clone()))
    }

    /// Untyped lookup of a registered cache.
    pub fn cache(&self, key: &CacheKey) -> Option<Arc<dyn Cache>> {
        self.caches.get(key).map(|entry| Arc::clone(&entry.cache))
    }

    /// Whether a cache is registered for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.caches.contains_key(key)
    }

    /// All registered keys, in sorted order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.caches.keys().cloned().collect()
    }

    /// Number of registered caches.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether no caches are registered.
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Starts background synchronization of every registered cache.
    pub fn start_all(&self, cancel: &CancellationToken) {
        for (key, entry) in &self.caches {
            debug!(cache = %key, "starting cache");
            entry.cache.start(cancel.clone());
        }
    }

    /// Waits until every registered cache has synced.
    ///
    /// Returns false as soon as `cancel` fires, regardless of sync progress.
    pub async fn wait_for_cache_sync(&self, cancel: &CancellationToken) -> bool {
        let started = Instant::now();
        let keys = self.keys();
        let synced = self.wait_for(&keys, cancel).await;
        if synced {
            info!(
                caches = keys.len(),
                elapsed_ms = started.elapsed().as_millis(),
                "all caches synced"
            );
        }
        synced
    }

    /// Waits until the given caches have synced. Unknown keys never sync.
    pub async fn wait_for(&self, keys: &[CacheKey], cancel: &CancellationToken) -> bool {
        for key in keys {
            let Some(cache) = self.cache(key) else {
                warn!(cache = %key, "waiting on a cache that was never registered");
                return false;
            };
            let mut state = cache.subscribe_state();
            loop {
                if *state.borrow_and_update() == SyncState::Synced {
                    break;
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return false,
                    changed = state.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    /// Sync state and pending count of every cache.
    pub fn snapshot(&self) -> Vec<CacheSnapshot> {
        self.caches
            .iter()
            .map(|(key, entry)| CacheSnapshot {
                kind: key.kind.clone(),
                scope: key.scope.clone(),
                state: entry.cache.sync_state(),
                pending: entry.cache.pending(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticCache {
        key: CacheKey,
        tracker: SyncTracker,
    }

    impl StaticCache {
        fn new(key: CacheKey) -> Self {
            Self {
                key,
                tracker: SyncTracker::new(),
            }
        }
    }

    impl Cache for StaticCache {
        fn key(&self) -> &CacheKey {
            &self.key
        }
        fn start(&self, _cancel: CancellationToken) {
            if self.tracker.try_start() {
                self.tracker.mark_synced();
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

    struct OtherCache(StaticCache);

    impl Cache for OtherCache {
        fn key(&self) -> &CacheKey {
            self.0.key()
        }
        fn start(&self, cancel: CancellationToken) {
            self.0.start(cancel);
        }
        fn sync_state(&self) -> SyncState {
            self.0.sync_state()
        }
        fn pending(&self) -> usize {
            self.0.pending()
        }
        fn subscribe_state(&self) -> watch::Receiver<SyncState> {
            self.0.subscribe_state()
        }
        fn subscribe(&self) -> watch::Receiver<u64> {
            self.0.subscribe()
        }
    }

    #[test]
    fn test_register_returns_same_instance_per_key() {
        let mut layer = CacheLayer::new();
        let key = CacheKey::namespaced("ConfigMap", "openshift-config");

        let first = layer
            .register(key.clone(), || StaticCache::new(key.clone()))
            .expect("first registration");
        let second = layer
            .register(key.clone(), || StaticCache::new(key.clone()))
            .expect("second registration");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn test_register_rejects_type_mismatch() {
        let mut layer = CacheLayer::new();
        let key = CacheKey::cluster("Namespace");
        layer
            .register(key.clone(), || StaticCache::new(key.clone()))
            .expect("registration");

        let result = layer.register(key.clone(), || OtherCache(StaticCache::new(key.clone())));
        assert!(matches!(result, Err(CacheError::TypeMismatch(_))));
    }

    #[test]
    fn test_register_rejects_key_mismatch() {
        let mut layer = CacheLayer::new();
        let key = CacheKey::cluster("Namespace");
        let result = layer.register(key, || StaticCache::new(CacheKey::cluster("Node")));
        assert!(matches!(result, Err(CacheError::KeyMismatch { .. })));
        assert!(layer.is_empty());
    }

    #[tokio::test]
    async fn test_start_all_and_wait() {
        let mut layer = CacheLayer::new();
        for ns in ["a", "b"] {
            let key = CacheKey::namespaced("Secret", ns);
            layer
                .register(key.clone(), || StaticCache::new(key.clone()))
                .expect("registration");
        }
        let cancel = CancellationToken::new();

        assert!(layer.snapshot().iter().all(|s| s.state == SyncState::NotStarted));
        layer.start_all(&cancel);
        assert!(layer.wait_for_cache_sync(&cancel).await);
        assert!(layer.snapshot().iter().all(|s| s.state == SyncState::Synced));
    }

    #[tokio::test]
    async fn test_wait_for_unknown_key_is_false() {
        let layer = CacheLayer::new();
        let cancel = CancellationToken::new();
        assert!(!layer.wait_for(&[CacheKey::cluster("Node")], &cancel).await);
    }

    #[test]
    fn test_cache_key_display() {
        assert_eq!(CacheKey::cluster("Node").to_string(), "Node@cluster");
        assert_eq!(
            CacheKey::namespaced("Secret", "openshift-apiserver").to_string(),
            "Secret@openshift-apiserver"
        );
    }
}
