//! Controllers supervised by the operator.
//!
//! Every controller is a [`QueueController`] around a narrow [`SyncHandler`];
//! each module exposes `spec(..)` returning its [`ControllerSpec`].

pub mod config_observer;
pub mod config_overrides;
pub mod encryption;
pub mod finalizer;
pub mod log_level;
pub mod prune;
pub mod resource_sync;
pub mod revision;
pub mod status;
pub mod workload;

#[cfg(test)]
mod testing;

use crate::config::OperatorConfig;
use crate::logging::LogLevelSetter;
use kube::api::DeleteParams;
use kube::{Api, Client};
use operator_runtime::{
    ControllerRegistry, HealthBoard, QueueController, RelatedObject, SupervisorMetrics, SyncHandler,
    VersionGetter,
};
use resource_sync::ResourceSyncRules;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Shared inputs of every controller.
#[derive(Clone)]
pub struct OperatorContext {
    /// Client used for writes; reads go through the caches
    pub client: Client,
    /// Health board the controllers report to
    pub health: HealthBoard,
    /// Component versions
    pub versions: VersionGetter,
    /// Supervisor metrics
    pub metrics: SupervisorMetrics,
    /// Process configuration
    pub config: Arc<OperatorConfig>,
}

impl OperatorContext {
    /// Wraps `handler` in a queue controller with the operator defaults.
    pub fn queue<H: SyncHandler + 'static>(&self, name: &str, handler: H) -> QueueController<H> {
        QueueController::new(name, handler, self.health.clone())
            .resync_every(self.config.resync)
            .metrics(self.metrics.clone())
    }
}

/// Deletes `name`. An object that is already gone counts as deleted.
///
/// Returns whether this call removed the object.
pub async fn delete_if_present<K>(api: &Api<K>, name: &str) -> Result<bool, kube::Error>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ref e)) if e.code == 404 => {
            debug!(name, "already deleted");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Registers all controllers of the operator.
pub fn register(
    registry: &mut ControllerRegistry,
    ctx: &OperatorContext,
    rules: Arc<ResourceSyncRules>,
    log_level: Arc<dyn LogLevelSetter>,
    related: Vec<RelatedObject>,
) {
    registry
        .add(resource_sync::spec(ctx, rules))
        .add(config_observer::spec(ctx))
        .add(workload::spec(ctx))
        .add(finalizer::spec(ctx))
        .add(revision::spec(ctx))
        .add(encryption::spec(ctx))
        .add(prune::spec(ctx))
        .add(config_overrides::spec(ctx))
        .add(log_level::spec(ctx, log_level))
        .add(status::spec(ctx, related));
}
