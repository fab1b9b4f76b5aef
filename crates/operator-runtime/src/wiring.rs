//! Controller registry and dependency wiring.
//!
//! Controllers are declared as [`ControllerSpec`]s: a name, a worker width,
//! the caches they read and the peers whose published output they consume.
//! [`ControllerRegistry::wire`] validates every declaration, orders the
//! builders so each runs after the peers it requires and then builds the
//! controllers. Any failure aborts wiring before a single controller exists.

use crate::cache::{Cache, CacheKey, CacheLayer};
use crate::controller::Controller;
use crate::error::{ControllerError, WiringError};
use crate::graph::DependencyGraph;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds a controller once its dependencies are available.
pub type BuildFn =
    Box<dyn FnOnce(&mut WiringContext<'_>) -> Result<Box<dyn Controller>, ControllerError> + Send>;

/// Declaration of one supervised controller.
pub struct ControllerSpec {
    name: String,
    workers: usize,
    caches: Vec<CacheKey>,
    requires: Vec<String>,
    build: BuildFn,
}

impl fmt::Debug for ControllerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerSpec")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("caches", &self.caches)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

impl ControllerSpec {
    /// Declares a controller with one worker and no dependencies.
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut WiringContext<'_>) -> Result<Box<dyn Controller>, ControllerError>
            + Send
            + 'static,
    {
        Self {
            name: name.into(),
            workers: 1,
            caches: Vec::new(),
            requires: Vec::new(),
            build: Box::new(build),
        }
    }

    /// Number of parallel workers.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Declares a cache the controller reads.
    #[must_use]
    pub fn cache(mut self, key: CacheKey) -> Self {
        if !self.caches.contains(&key) {
            self.caches.push(key);
        }
        self
    }

    /// Declares several caches the controller reads.
    #[must_use]
    pub fn caches(self, keys: impl IntoIterator<Item = CacheKey>) -> Self {
        keys.into_iter().fold(self, Self::cache)
    }

    /// Declares a peer whose published output this controller consumes.
    #[must_use]
    pub fn requires(mut self, peer: impl Into<String>) -> Self {
        let peer = peer.into();
        if !self.requires.contains(&peer) {
            self.requires.push(peer);
        }
        self
    }

    /// Controller name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

type Artifacts = HashMap<String, Vec<Arc<dyn Any + Send + Sync>>>;

/// What a controller builder may access: its declared caches, the artifacts
/// of its declared peers, and a slot to publish its own artifacts.
pub struct WiringContext<'a> {
    name: &'a str,
    caches: &'a CacheLayer,
    declared_caches: &'a [CacheKey],
    requires: &'a [String],
    artifacts: &'a mut Artifacts,
}

impl fmt::Debug for WiringContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WiringContext")
            .field("name", &self.name)
            .field("caches", &self.declared_caches)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

impl WiringContext<'_> {
    /// Name of the controller being built.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Typed handle to a declared cache.
    pub fn cache<C: Cache + 'static>(&self, key: &CacheKey) -> Result<Arc<C>, ControllerError> {
        if !self.declared_caches.contains(key) {
            return Err(ControllerError::Dependency(format!(
                "cache {key} is not declared by {}",
                self.name
            )));
        }
        self.caches
            .get::<C>(key)
            .map_err(|e| ControllerError::Dependency(e.to_string()))
    }

    /// Artifact of type `T` published by a declared peer.
    pub fn artifact<T: Any + Send + Sync>(&self, peer: &str) -> Result<Arc<T>, ControllerError> {
        if !self.requires.iter().any(|p| p == peer) {
            return Err(ControllerError::Dependency(format!(
                "{} does not declare a dependency on {peer}",
                self.name
            )));
        }
        self.artifacts
            .get(peer)
            .into_iter()
            .flatten()
            .find_map(|artifact| Arc::clone(artifact).downcast::<T>().ok())
            .ok_or_else(|| {
                ControllerError::Dependency(format!(
                    "{peer} published no {} artifact",
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Publishes an artifact for controllers that require this one.
    pub fn publish<T: Any + Send + Sync>(&mut self, artifact: Arc<T>) {
        self.artifacts
            .entry(self.name.to_string())
            .or_default()
            .push(artifact);
    }
}

/// A built controller together with its declaration.
pub struct WiredController {
    /// Controller name
    pub name: String,
    /// Number of parallel workers
    pub workers: usize,
    /// Caches that must sync before the controller starts
    pub caches: Vec<CacheKey>,
    /// Peers it was built after
    pub requires: Vec<String>,
    /// The controller
    pub controller: Arc<dyn Controller>,
}

impl fmt::Debug for WiredController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WiredController")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("caches", &self.caches)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

/// Controllers in construction order.
#[derive(Debug, Default)]
pub struct WiredControllers {
    controllers: Vec<WiredController>,
}

impl WiredControllers {
    /// Controller names in construction order.
    pub fn names(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of controllers.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Whether no controllers were wired.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Iterates in construction order.
    pub fn iter(&self) -> std::slice::Iter<'_, WiredController> {
        self.controllers.iter()
    }
}

impl IntoIterator for WiredControllers {
    type Item = WiredController;
    type IntoIter = std::vec::IntoIter<WiredController>;

    fn into_iter(self) -> Self::IntoIter {
        self.controllers.into_iter()
    }
}

/// Collects controller declarations.
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    specs: Vec<ControllerSpec>,
}

impl ControllerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a declaration.
    pub fn add(&mut self, spec: ControllerSpec) -> &mut Self {
        self.specs.push(spec);
        self
    }

    /// Number of declared controllers.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Validates every declaration, then builds the controllers in dependency order.
    pub fn wire(self, caches: &CacheLayer) -> Result<WiredControllers, WiringError> {
        let mut graph = DependencyGraph::new();
        for spec in &self.specs {
            graph.add_node(&spec.name)?;
            if spec.workers == 0 {
                return Err(WiringError::ZeroWorkers(spec.name.clone()));
            }
            if let Some(missing) = spec.caches.iter().find(|key| !caches.contains(key)) {
                return Err(WiringError::MissingCache {
                    controller: spec.name.clone(),
                    cache: missing.clone(),
                });
            }
        }
        for spec in &self.specs {
            for peer in &spec.requires {
                graph.add_edge(&spec.name, peer)?;
            }
        }
        let order = graph.order()?;
        debug!(
            order = ?order.iter().filter_map(|&id| graph.name(id)).collect::<Vec<_>>(),
            "controller construction order"
        );

        let mut pending: Vec<Option<ControllerSpec>> = self.specs.into_iter().map(Some).collect();
        let mut artifacts = Artifacts::new();
        let mut controllers = Vec::with_capacity(pending.len());

        for id in order {
            let Some(spec) = pending.get_mut(id).and_then(Option::take) else {
                continue;
            };
            let ControllerSpec {
                name,
                workers,
                caches: declared,
                requires,
                build,
            } = spec;

            let mut ctx = WiringContext {
                name: &name,
                caches,
                declared_caches: &declared,
                requires: &requires,
                artifacts: &mut artifacts,
            };
            let controller = build(&mut ctx).map_err(|source| WiringError::Build {
                controller: name.clone(),
                source,
            })?;
            debug!(controller = %name, workers, "built controller");

            controllers.push(WiredController {
                name,
                workers,
                caches: declared,
                requires,
                controller: Arc::from(controller),
            });
        }

        info!(controllers = controllers.len(), "wired controllers");
        Ok(WiredControllers { controllers })
    }
}
