//! Namespace finalizer controller
//!
//! Releases the operator's finalizer on the terminating target namespace
//! once the operand DaemonSets are gone.

use super::OperatorContext;
use crate::caches;
use crate::names::{NAMESPACE_FINALIZER, TARGET_NAMESPACE};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use operator_runtime::{
    Controller, ControllerError, ControllerHealth, ControllerSpec, KubeCache, SyncHandler,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Controller name.
pub const NAME: &str = "finalizer";

/// Finalizers left after removing ours, or `None` when nothing should change.
pub fn released_finalizers(
    namespace: &Namespace,
    remaining_daemon_sets: usize,
) -> Option<Vec<String>> {
    let terminating = namespace.metadata.deletion_timestamp.is_some();
    let finalizers = namespace.metadata.finalizers.as_deref().unwrap_or_default();
    if !terminating
        || remaining_daemon_sets > 0
        || !finalizers.iter().any(|f| f == NAMESPACE_FINALIZER)
    {
        return None;
    }
    Some(
        finalizers
            .iter()
            .filter(|f| *f != NAMESPACE_FINALIZER)
            .cloned()
            .collect(),
    )
}

/// Sync handler releasing the namespace finalizer.
pub struct NamespaceFinalizer {
    namespaces: Arc<KubeCache<Namespace>>,
    daemon_sets: Arc<KubeCache<DaemonSet>>,
    client: Client,
}

#[async_trait]
impl SyncHandler for NamespaceFinalizer {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        let Some(namespace) = self.namespaces.get(TARGET_NAMESPACE) else {
            return Ok(ControllerHealth::healthy());
        };
        let remaining = self.daemon_sets.list().len();
        let Some(finalizers) = released_finalizers(&namespace, remaining) else {
            if namespace.metadata.deletion_timestamp.is_some() {
                debug!(remaining, "namespace terminating, waiting for daemonsets");
            }
            return Ok(ControllerHealth::healthy());
        };

        info!(namespace = TARGET_NAMESPACE, "releasing namespace finalizer");
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.patch(TARGET_NAMESPACE, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(ControllerHealth::healthy())
    }
}

/// Declares the controller.
pub fn spec(ctx: &OperatorContext) -> ControllerSpec {
    let ctx = ctx.clone();
    ControllerSpec::new(NAME, move |wiring| {
        let namespaces = wiring.cache::<KubeCache<Namespace>>(&caches::namespaces())?;
        let daemon_sets = wiring.cache::<KubeCache<DaemonSet>>(&caches::daemon_sets())?;

        let controller = ctx
            .queue(NAME, NamespaceFinalizer {
                namespaces: Arc::clone(&namespaces),
                daemon_sets: Arc::clone(&daemon_sets),
                client: ctx.client.clone(),
            })
            .watch_cache(namespaces.as_ref())
            .watch_cache(daemon_sets.as_ref());
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .cache(caches::namespaces())
    .cache(caches::daemon_sets())
}
