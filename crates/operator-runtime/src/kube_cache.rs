//! Kubernetes-backed cache.
//!
//! `KubeCache<K>` mirrors one resource kind in one scope using a
//! kube-runtime reflector. The watch stream runs in a background task bound to
//! the shared cancellation token and reconnects with the default backoff.

use crate::cache::{Cache, CacheKey, Scope, SyncTracker};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use kube_runtime::reflector::{self, ObjectRef, Store, store::Writer};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reflector-backed cache of one resource kind in one scope.
pub struct KubeCache<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    key: CacheKey,
    api: Api<K>,
    store: Store<K>,
    writer: Mutex<Option<Writer<K>>>,
    tracker: Arc<SyncTracker>,
}

impl<K> Debug for KubeCache<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCache")
            .field("key", &self.key)
            .field("state", &self.tracker.state())
            .finish_non_exhaustive()
    }
}

impl<K> KubeCache<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Cache key for this kind in the given scope.
    pub fn key_for(scope: Scope) -> CacheKey {
        CacheKey {
            kind: K::kind(&()).into_owned(),
            scope,
        }
    }

    /// Cache covering the whole cluster.
    pub fn cluster(client: Client) -> Self {
        Self::with_api(Api::all(client), Scope::Cluster)
    }

    fn with_api(api: Api<K>, scope: Scope) -> Self {
        let (store, writer) = reflector::store();
        Self {
            key: Self::key_for(scope),
            api,
            store,
            writer: Mutex::new(Some(writer)),
            tracker: Arc::new(SyncTracker::new()),
        }
    }

    /// All objects currently in the cache. Partial until the cache has synced.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Looks up an object by name within this cache's scope.
    pub fn get(&self, name: &str) -> Option<Arc<K>> {
        let object_ref = match &self.key.scope {
            Scope::Cluster => ObjectRef::new(name),
            Scope::Namespace(ns) => ObjectRef::new(name).within(ns),
        };
        self.store.get(&object_ref)
    }

    /// Namespace covered by this cache, if namespaced.
    pub fn namespace(&self) -> Option<&str> {
        match &self.key.scope {
            Scope::Cluster => None,
            Scope::Namespace(ns) => Some(ns),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl<K> KubeCache<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Synced cache holding `objects`. The watch never starts, so the
    /// contents only change when the test replaces the cache.
    pub fn preloaded(api: Api<K>, scope: Scope, objects: impl IntoIterator<Item = K>) -> Self {
        let cache = Self::with_api(api, scope);
        let writer = cache
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut writer) = writer {
            for object in objects {
                writer.apply_watcher_event(&watcher::Event::Apply(object));
            }
        }
        cache.tracker.mark_synced();
        cache
    }
}

impl<K> KubeCache<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    /// Cache covering a single namespace.
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self::with_api(
            Api::namespaced(client, namespace),
            Scope::Namespace(namespace.to_string()),
        )
    }
}

impl<K> Cache for KubeCache<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn key(&self) -> &CacheKey {
        &self.key
    }

    fn start(&self, cancel: CancellationToken) {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(writer) = writer else {
            return;
        };
        if !self.tracker.try_start() {
            return;
        }

        let api = self.api.clone();
        let tracker = Arc::clone(&self.tracker);
        let key = self.key.clone();

        tokio::spawn(async move {
            info!(cache = %key, "starting cache watch");
            let mut stream = Box::pin(
                watcher(api, watcher::Config::default())
                    .default_backoff()
                    .reflect(writer),
            );

            loop {
                let event = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = stream.next() => event,
                };
                match event {
                    Some(Ok(watcher::Event::Init)) => tracker.reset_pending(),
                    Some(Ok(watcher::Event::InitApply(_))) => tracker.add_pending(),
                    Some(Ok(watcher::Event::InitDone)) => {
                        debug!(cache = %key, "cache list complete");
                        tracker.mark_synced();
                    }
                    Some(Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_))) => {
                        tracker.bump();
                    }
                    Some(Err(e)) => warn!(cache = %key, error = %e, "cache watch error, retrying"),
                    None => break,
                }
            }

            debug!(cache = %key, "cache watch stopped");
        });
    }

    fn sync_state(&self) -> crate::cache::SyncState {
        self.tracker.state()
    }

    fn pending(&self) -> usize {
        self.tracker.pending()
    }

    fn subscribe_state(&self) -> watch::Receiver<crate::cache::SyncState> {
        self.tracker.subscribe_state()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.tracker.subscribe()
    }
}
