//! Encryption config controller
//!
//! Deploys the managed encryption configuration into the target namespace
//! through a resource sync rule, and reports Progressing until the copy
//! matches its source.

use super::OperatorContext;
use super::resource_sync::{self, ResourceLocation, ResourceSyncRules};
use crate::caches;
use crate::names::{
    ENCRYPTION_CONFIG, MANAGED_CONFIG_NAMESPACE, MANAGED_ENCRYPTION_CONFIG, TARGET_NAMESPACE,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use operator_runtime::{
    Controller, ControllerError, ControllerHealth, ControllerSpec, KubeCache, SyncHandler,
};
use std::sync::Arc;

/// Controller name.
pub const NAME: &str = "encryption";

/// Health for the managed source and the deployed copy.
pub fn deployment_health(source: Option<&Secret>, deployed: Option<&Secret>) -> ControllerHealth {
    match (source, deployed) {
        (None, _) => ControllerHealth::healthy().with_progressing(false, "EncryptionDisabled", ""),
        (Some(source), Some(deployed)) if source.data == deployed.data => {
            ControllerHealth::healthy().with_progressing(false, "AsExpected", "")
        }
        (Some(_), _) => ControllerHealth::healthy().with_progressing(
            true,
            "EncryptionConfigSyncing",
            format!("secret {TARGET_NAMESPACE}/{ENCRYPTION_CONFIG} does not match {MANAGED_CONFIG_NAMESPACE}/{MANAGED_ENCRYPTION_CONFIG} yet"),
        ),
    }
}

/// Sync handler tracking the deployed encryption configuration.
pub struct EncryptionConfig {
    managed: Arc<KubeCache<Secret>>,
    target: Arc<KubeCache<Secret>>,
}

#[async_trait]
impl SyncHandler for EncryptionConfig {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        let source = self.managed.get(MANAGED_ENCRYPTION_CONFIG);
        let deployed = self.target.get(ENCRYPTION_CONFIG);
        Ok(deployment_health(source.as_deref(), deployed.as_deref()))
    }
}

/// Declares the controller.
pub fn spec(ctx: &OperatorContext) -> ControllerSpec {
    let ctx = ctx.clone();
    ControllerSpec::new(NAME, move |wiring| {
        let managed =
            wiring.cache::<KubeCache<Secret>>(&caches::secrets(MANAGED_CONFIG_NAMESPACE))?;
        let target = wiring.cache::<KubeCache<Secret>>(&caches::secrets(TARGET_NAMESPACE))?;
        let rules = wiring.artifact::<ResourceSyncRules>(resource_sync::NAME)?;
        rules.sync_secret(
            ResourceLocation::new(TARGET_NAMESPACE, ENCRYPTION_CONFIG),
            ResourceLocation::new(MANAGED_CONFIG_NAMESPACE, MANAGED_ENCRYPTION_CONFIG),
        );

        let controller = ctx
            .queue(NAME, EncryptionConfig {
                managed: Arc::clone(&managed),
                target: Arc::clone(&target),
            })
            .watch_cache(managed.as_ref())
            .watch_cache(target.as_ref());
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .cache(caches::secrets(MANAGED_CONFIG_NAMESPACE))
    .cache(caches::secrets(TARGET_NAMESPACE))
    .requires(resource_sync::NAME)
}
