//! Config observer controller
//!
//! Derives the operand's observed configuration from cluster state and
//! writes it to `spec.observedConfig` of the operator configuration. Today it
//! observes the user CA bundle, which also needs a sync rule so the operand
//! can mount a copy from its own namespace.

use super::OperatorContext;
use super::resource_sync::{self, ResourceLocation, ResourceSyncRules};
use crate::caches;
use crate::names::{TARGET_NAMESPACE, TRUSTED_CA_BUNDLE, USER_CA_BUNDLE, USER_CONFIG_NAMESPACE};
use async_trait::async_trait;
use crds::{OPERATOR_CONFIG_NAME, OpenShiftAPIServer};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use operator_runtime::{
    Controller, ControllerError, ControllerHealth, ControllerSpec, KubeCache, SyncHandler,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::info;

/// Controller name.
pub const NAME: &str = "config-observer";

/// Observed configuration for the given cluster state.
pub fn observe(user_ca_bundle_present: bool) -> Value {
    if user_ca_bundle_present {
        json!({ "trustedCA": { "configMap": TRUSTED_CA_BUNDLE } })
    } else {
        json!({})
    }
}

/// JSON merge patch turning `current` into `desired`.
///
/// Keys missing from `desired` are set to `null` so the server removes them.
pub fn merge_patch(current: &Value, desired: &Value) -> Value {
    match (current, desired) {
        (Value::Object(current), Value::Object(desired)) => {
            let mut patch = Map::new();
            for key in current.keys().filter(|key| !desired.contains_key(*key)) {
                patch.insert(key.clone(), Value::Null);
            }
            for (key, value) in desired {
                match current.get(key) {
                    Some(existing) if existing == value => {}
                    Some(existing) => {
                        patch.insert(key.clone(), merge_patch(existing, value));
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        (_, desired) => desired.clone(),
    }
}

fn trusted_ca_destination() -> ResourceLocation {
    ResourceLocation::new(TARGET_NAMESPACE, TRUSTED_CA_BUNDLE)
}

/// Sync handler observing the user CA bundle.
pub struct ConfigObserver {
    config: Arc<KubeCache<OpenShiftAPIServer>>,
    user_config_maps: Arc<KubeCache<ConfigMap>>,
    rules: Arc<ResourceSyncRules>,
    client: Client,
}

#[async_trait]
impl SyncHandler for ConfigObserver {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        let present = self.user_config_maps.get(USER_CA_BUNDLE).is_some();
        if present {
            self.rules.sync_config_map(
                trusted_ca_destination(),
                ResourceLocation::new(USER_CONFIG_NAMESPACE, USER_CA_BUNDLE),
            );
        } else {
            self.rules.delete_config_map(trusted_ca_destination());
        }

        let Some(config) = self.config.get(OPERATOR_CONFIG_NAME) else {
            return Ok(ControllerHealth::healthy());
        };
        let current = config
            .spec
            .observed_config
            .clone()
            .unwrap_or_else(|| json!({}));
        let desired = observe(present);
        if current == desired {
            return Ok(ControllerHealth::healthy());
        }

        info!(observed = %desired, "writing observed config");
        let patch = json!({ "spec": { "observedConfig": merge_patch(&current, &desired) } });
        let api: Api<OpenShiftAPIServer> = Api::all(self.client.clone());
        api.patch(OPERATOR_CONFIG_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(ControllerHealth::healthy())
    }
}

/// Declares the controller.
pub fn spec(ctx: &OperatorContext) -> ControllerSpec {
    let ctx = ctx.clone();
    ControllerSpec::new(NAME, move |wiring| {
        let config = wiring.cache::<KubeCache<OpenShiftAPIServer>>(&caches::operator_config())?;
        let user_config_maps =
            wiring.cache::<KubeCache<ConfigMap>>(&caches::config_maps(USER_CONFIG_NAMESPACE))?;
        let rules = wiring.artifact::<ResourceSyncRules>(resource_sync::NAME)?;

        let controller = ctx
            .queue(NAME, ConfigObserver {
                config: Arc::clone(&config),
                user_config_maps: Arc::clone(&user_config_maps),
                rules,
                client: ctx.client.clone(),
            })
            .watch_cache(config.as_ref())
            .watch_cache(user_config_maps.as_ref());
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .cache(caches::operator_config())
    .cache(caches::config_maps(USER_CONFIG_NAMESPACE))
    .requires(resource_sync::NAME)
}
