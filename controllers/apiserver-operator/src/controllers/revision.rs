//! Revision controller
//!
//! Snapshots the encryption configuration into numbered copies so the operand
//! can roll forward atomically. The configuration is optional: without it
//! only the first revision is created.

use super::OperatorContext;
use crate::caches;
use crate::names::{
    ENCRYPTION_CONFIG, ENCRYPTION_CONFIG_REVISION_PREFIX, FIELD_MANAGER, TARGET_NAMESPACE,
};
use async_trait::async_trait;
use crds::{OPERATOR_CONFIG_NAME, OpenShiftAPIServer};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use operator_runtime::{
    Controller, ControllerError, ControllerHealth, ControllerSpec, KubeCache, SyncHandler,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Controller name.
pub const NAME: &str = "revision";

/// Name of the snapshot for `revision`.
pub fn revision_name(revision: i32) -> String {
    format!("{ENCRYPTION_CONFIG_REVISION_PREFIX}{revision}")
}

/// A new revision to create.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionBump {
    /// Revision number
    pub revision: i32,
    /// Snapshot content, `None` when the configuration does not exist
    pub data: Option<BTreeMap<String, ByteString>>,
}

/// Decides whether a new revision is needed.
pub fn plan_revision(
    latest: i32,
    current: Option<&Secret>,
    latest_snapshot: Option<&Secret>,
) -> Option<RevisionBump> {
    match current {
        Some(current) => {
            let unchanged = latest > 0
                && latest_snapshot.is_some_and(|snapshot| snapshot.data == current.data);
            (!unchanged).then(|| RevisionBump {
                revision: latest + 1,
                data: Some(current.data.clone().unwrap_or_default()),
            })
        }
        None => (latest == 0).then_some(RevisionBump {
            revision: 1,
            data: None,
        }),
    }
}

/// Sync handler creating encryption config revisions.
pub struct Revision {
    config: Arc<KubeCache<OpenShiftAPIServer>>,
    secrets: Arc<KubeCache<Secret>>,
    client: Client,
}

#[async_trait]
impl SyncHandler for Revision {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        let Some(config) = self.config.get(OPERATOR_CONFIG_NAME) else {
            return Ok(ControllerHealth::healthy());
        };
        let latest = config.latest_available_revision();
        let current = self.secrets.get(ENCRYPTION_CONFIG);
        let snapshot = self.secrets.get(&revision_name(latest));
        let Some(bump) = plan_revision(latest, current.as_deref(), snapshot.as_deref()) else {
            return Ok(ControllerHealth::healthy());
        };

        if let Some(data) = bump.data {
            let name = revision_name(bump.revision);
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(TARGET_NAMESPACE.to_string()),
                    ..Default::default()
                },
                data: Some(data),
                ..Default::default()
            };
            let secrets: Api<Secret> = Api::namespaced(self.client.clone(), TARGET_NAMESPACE);
            secrets
                .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&secret))
                .await?;
        }

        info!(revision = bump.revision, "new revision available");
        let patch = json!({ "status": { "latestAvailableRevision": bump.revision } });
        let api: Api<OpenShiftAPIServer> = Api::all(self.client.clone());
        api.patch_status(OPERATOR_CONFIG_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(ControllerHealth::healthy())
    }
}

/// Declares the controller.
pub fn spec(ctx: &OperatorContext) -> ControllerSpec {
    let ctx = ctx.clone();
    ControllerSpec::new(NAME, move |wiring| {
        let config = wiring.cache::<KubeCache<OpenShiftAPIServer>>(&caches::operator_config())?;
        let secrets = wiring.cache::<KubeCache<Secret>>(&caches::secrets(TARGET_NAMESPACE))?;

        let controller = ctx
            .queue(NAME, Revision {
                config: Arc::clone(&config),
                secrets: Arc::clone(&secrets),
                client: ctx.client.clone(),
            })
            .watch_cache(config.as_ref())
            .watch_cache(secrets.as_ref());
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .cache(caches::operator_config())
    .cache(caches::secrets(TARGET_NAMESPACE))
}
