//! Runtime error types.
//!
//! Errors are split by the phase they belong to: cache registration and
//! wiring errors are fatal startup errors, controller errors stay local to
//! the controller that produced them, and the supervisor only ever reports
//! that it stopped.

use crate::cache::CacheKey;
use thiserror::Error;

/// Errors produced by a controller while syncing or while being built.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization error while building a patch or a status record
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A sync pass failed for a controller-specific reason
    #[error("Sync failed: {0}")]
    Sync(String),

    /// A cache or peer artifact the controller needs is not available
    #[error("Missing dependency: {0}")]
    Dependency(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors produced while registering or looking up shared caches.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key was registered before with a different cache type
    #[error("cache {0} is registered with a different type")]
    TypeMismatch(CacheKey),

    /// The cache built for a key reports a different key
    #[error("cache built for {expected} reports key {actual}")]
    KeyMismatch {
        /// Key the cache was registered under
        expected: CacheKey,
        /// Key the cache reports
        actual: CacheKey,
    },

    /// No cache is registered for the key
    #[error("cache {0} is not registered")]
    NotRegistered(CacheKey),
}

/// Fatal errors raised while wiring controllers. Nothing has been started
/// when one of these is returned.
#[derive(Debug, Error)]
pub enum WiringError {
    /// Two controller declarations share a name
    #[error("controller {0} is declared more than once")]
    DuplicateController(String),

    /// A controller requires a peer that was never declared
    #[error("controller {controller} requires unknown controller {dependency}")]
    UnknownDependency {
        /// Controller declaring the dependency
        controller: String,
        /// Name of the missing peer
        dependency: String,
    },

    /// A controller declares a cache that does not exist in the cache layer
    #[error("controller {controller} requires cache {cache} which was never registered")]
    MissingCache {
        /// Controller declaring the cache
        controller: String,
        /// Missing cache key
        cache: CacheKey,
    },

    /// A controller was declared with no workers
    #[error("controller {0} must run at least one worker")]
    ZeroWorkers(String),

    /// The declared dependencies form a cycle
    #[error("dependency cycle between controllers: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// A controller builder failed
    #[error("failed to build controller {controller}: {source}")]
    Build {
        /// Controller whose builder failed
        controller: String,
        /// Underlying error
        #[source]
        source: ControllerError,
    },
}

/// Terminal outcome of the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The shared cancellation signal fired. Always fatal for the host.
    #[error("stopped")]
    Stopped,
}
