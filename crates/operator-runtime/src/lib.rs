//! Operator Runtime
//!
//! Building blocks for an operator process that runs a fixed set of
//! independent controllers against one shared, cached view of cluster state
//! and publishes a single aggregated status.
//!
//! # Overview
//!
//! - [`cache`]: one cache per `(kind, scope)`, shared by every controller
//!   that declares it ([`kube_cache::KubeCache`] mirrors Kubernetes objects)
//! - [`wiring`]: controller declarations, dependency ordering and construction
//! - [`supervisor`]: cache sync gate, controller tasks, shutdown on cancellation
//! - [`version`]: component version map, seeded from the last published status
//! - [`status`]: per-controller health and the pure aggregation into one status
//! - [`queue`]: work-queue controller base with Fibonacci requeue backoff
//! - [`debug`]: optional introspection router
//!
//! # Example
//!
//! ```no_run
//! use operator_runtime::{CacheLayer, ControllerRegistry, HealthBoard, Supervisor};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let caches = CacheLayer::new();
//! let registry = ControllerRegistry::new();
//! let wired = registry.wire(&caches)?;
//!
//! let cancel = CancellationToken::new();
//! operator_runtime::shutdown::cancel_on_signal(cancel.clone());
//!
//! let supervisor = Supervisor::new(Arc::new(caches), wired, HealthBoard::new());
//! let stopped = supervisor.run(cancel).await;
//! # let _ = stopped;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cache;
pub mod controller;
pub mod debug;
pub mod error;
pub mod graph;
pub mod kube_cache;
pub mod metrics;
pub mod queue;
pub mod shutdown;
pub mod status;
pub mod supervisor;
pub mod version;
pub mod wiring;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cache::{Cache, CacheKey, CacheLayer, CacheSnapshot, Scope, SyncState, SyncTracker};
pub use controller::{Controller, ControllerState, LifecycleBoard};
pub use error::{CacheError, ControllerError, SupervisorError, WiringError};
pub use kube_cache::KubeCache;
pub use metrics::SupervisorMetrics;
pub use queue::{DEFAULT_KEY, QueueController, SyncHandler, WorkQueue};
pub use status::{
    AggregatedStatus, ConditionStatus, ConditionType, ControllerHealth, HealthBoard, RelatedObject,
    StatusPublisher, StatusSync, aggregate,
};
pub use supervisor::Supervisor;
pub use version::{ComponentVersion, VersionGetter, VersionRecorder};
pub use wiring::{ControllerRegistry, ControllerSpec, WiringContext};
