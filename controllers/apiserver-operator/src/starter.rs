//! Operator startup: caches, versions, controllers and the supervisor.

use crate::caches;
use crate::config::OperatorConfig;
use crate::controllers::resource_sync::{self, ResourceSyncRules};
use crate::controllers::{self, OperatorContext, status};
use crate::error::OperatorError;
use crate::logging::LogLevelSetter;
use crate::names::{CLUSTER_OPERATOR_NAME, OPERATOR_VERSION_NAME};
use crds::ClusterOperator;
use kube::{Api, Client};
use operator_runtime::debug::{DebugState, debug_router, serve};
use operator_runtime::{
    CacheLayer, ControllerRegistry, HealthBoard, Supervisor, SupervisorMetrics, VersionGetter,
    VersionRecorder,
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Seeds `versions` from the previously published record, if any.
///
/// Versions only move forward once an operand reports a completed rollout;
/// seeding keeps the published versions stable across restarts.
pub async fn seed_versions(
    api: &Api<ClusterOperator>,
    versions: &VersionGetter,
) -> Result<(), OperatorError> {
    match api.get_opt(CLUSTER_OPERATOR_NAME).await? {
        Some(record) => {
            let status = record.status.unwrap_or_default();
            info!(versions = status.versions.len(), "seeding versions from ClusterOperator");
            versions.seed(status.version_pairs());
        }
        None => debug!(clusteroperator = CLUSTER_OPERATOR_NAME, "no previous ClusterOperator"),
    }
    Ok(())
}

/// Runs the operator until `cancel` fires.
///
/// Only returns once the supervisor stopped; the outcome is always an error.
pub async fn run(
    config: OperatorConfig,
    log_level: Arc<dyn LogLevelSetter>,
    cancel: CancellationToken,
) -> Result<Infallible, OperatorError> {
    let client = Client::try_default().await?;
    let config = Arc::new(config);

    let versions = VersionGetter::new();
    seed_versions(&Api::all(client.clone()), &versions).await?;
    if !config.operator_version.is_empty() {
        versions.set_version(OPERATOR_VERSION_NAME, &config.operator_version);
    }

    let mut layer = CacheLayer::new();
    caches::register_all(&mut layer, &client)?;

    let health = HealthBoard::new();
    let metrics = SupervisorMetrics::new()?;
    let ctx = OperatorContext {
        client,
        health: health.clone(),
        versions,
        metrics: metrics.clone(),
        config: Arc::clone(&config),
    };

    let rules = Arc::new(ResourceSyncRules::new());
    let mut registry = ControllerRegistry::new();
    controllers::register(
        &mut registry,
        &ctx,
        Arc::clone(&rules),
        log_level,
        status::related_objects(),
    );
    let wired = registry.wire(&layer)?;
    info!(controllers = ?wired.names(), caches = layer.len(), "controllers wired");

    let layer = Arc::new(layer);
    let supervisor = Supervisor::new(Arc::clone(&layer), wired, health)
        .with_grace(config.shutdown_grace)
        .with_metrics(metrics.clone());

    if let Some(addr) = config.debug_bind_address {
        let router = debug_router(
            DebugState::new(Arc::clone(&layer), supervisor.lifecycle()).with_metrics(metrics),
        )
        .merge(resource_sync::debug_routes(rules));
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(router, addr, cancel).await {
                error!(%addr, error = %e, "debug server failed");
            }
        });
    }

    Ok(supervisor.run(cancel).await?)
}
