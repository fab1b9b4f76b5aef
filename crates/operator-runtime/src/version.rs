//! Version tracker.
//!
//! Holds the component → version map reported in the external status. The
//! map is seeded from the last published status at startup so a restart does
//! not regress reported versions before a controller re-confirms them.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Records and reads component versions.
pub trait VersionRecorder: Send + Sync {
    /// Sets the version of a component. Last write wins.
    fn set_version(&self, component: &str, version: &str);

    /// Snapshot of every recorded version.
    fn all_versions(&self) -> BTreeMap<String, String>;
}

/// Watch-channel backed [`VersionRecorder`].
///
/// Each update replaces one key under the channel's lock, so concurrent
/// writers to distinct keys never lose updates and readers always see a
/// consistent snapshot.
#[derive(Debug, Clone)]
pub struct VersionGetter {
    versions: Arc<watch::Sender<BTreeMap<String, String>>>,
}

impl Default for VersionGetter {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionGetter {
    /// Creates an empty version map.
    pub fn new() -> Self {
        let (versions, _) = watch::channel(BTreeMap::new());
        Self {
            versions: Arc::new(versions),
        }
    }

    /// Seeds entries from previously published versions.
    pub fn seed<I, N, V>(&self, versions: I)
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        for (name, version) in versions {
            let (name, version) = (name.into(), version.into());
            self.set_version(&name, &version);
        }
    }

    /// Receiver notified whenever a version changes.
    pub fn subscribe(&self) -> watch::Receiver<BTreeMap<String, String>> {
        self.versions.subscribe()
    }

    /// Handle that can only set the version of `component`.
    pub fn component(&self, component: impl Into<String>) -> ComponentVersion {
        ComponentVersion {
            component: component.into(),
            recorder: self.clone(),
        }
    }
}

impl VersionRecorder for VersionGetter {
    fn set_version(&self, component: &str, version: &str) {
        let changed = self.versions.send_if_modified(|versions| {
            if versions.get(component).map(String::as_str) == Some(version) {
                return false;
            }
            versions.insert(component.to_string(), version.to_string());
            true
        });
        if changed {
            debug!(component, version, "recorded version");
        }
    }

    fn all_versions(&self) -> BTreeMap<String, String> {
        self.versions.borrow().clone()
    }
}

/// Version handle scoped to a single component.
#[derive(Debug, Clone)]
pub struct ComponentVersion {
    component: String,
    recorder: VersionGetter,
}

impl ComponentVersion {
    /// Component this handle writes.
    pub fn name(&self) -> &str {
        &self.component
    }

    /// Sets this component's version.
    pub fn set(&self, version: &str) {
        self.recorder.set_version(&self.component, version);
    }

    /// Currently recorded version of this component.
    pub fn current(&self) -> Option<String> {
        self.recorder.all_versions().get(&self.component).cloned()
    }
}
