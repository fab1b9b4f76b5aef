//! Blocks upgrades while unsupported config overrides are set.

use super::OperatorContext;
use crate::caches;
use async_trait::async_trait;
use crds::{OPERATOR_CONFIG_NAME, OpenShiftAPIServer};
use operator_runtime::{
    Controller, ControllerError, ControllerHealth, ControllerSpec, KubeCache, SyncHandler,
};
use std::sync::Arc;

/// Controller name.
pub const NAME: &str = "config-overrides";

/// Upgradeable health for the operator configuration.
pub fn upgradeable(config: &OpenShiftAPIServer) -> ControllerHealth {
    if config.has_unsupported_overrides() {
        ControllerHealth::healthy().with_upgradeable(
            false,
            "UnsupportedConfigOverridesSet",
            "spec.unsupportedConfigOverrides is set, upgrades are blocked",
        )
    } else {
        ControllerHealth::healthy().with_upgradeable(true, "AsExpected", "")
    }
}

/// Sync handler watching `spec.unsupportedConfigOverrides`.
pub struct ConfigOverrides {
    config: Arc<KubeCache<OpenShiftAPIServer>>,
}

#[async_trait]
impl SyncHandler for ConfigOverrides {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        Ok(self
            .config
            .get(OPERATOR_CONFIG_NAME)
            .map_or_else(ControllerHealth::healthy, |config| upgradeable(&config)))
    }
}

/// Declares the controller.
pub fn spec(ctx: &OperatorContext) -> ControllerSpec {
    let ctx = ctx.clone();
    ControllerSpec::new(NAME, move |wiring| {
        let config = wiring.cache::<KubeCache<OpenShiftAPIServer>>(&caches::operator_config())?;
        let controller = ctx
            .queue(NAME, ConfigOverrides {
                config: Arc::clone(&config),
            })
            .watch_cache(config.as_ref());
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .cache(caches::operator_config())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::OpenShiftAPIServerSpec;
    use serde_json::json;

    #[test]
    fn test_overrides_block_upgrades() {
        let mut config =
            OpenShiftAPIServer::new(OPERATOR_CONFIG_NAME, OpenShiftAPIServerSpec::default());
        assert!(upgradeable(&config).upgradeable.expect("upgradeable").status);

        config.spec.unsupported_config_overrides =
            Some(json!({ "admission": { "enabled": false } }));
        let fragment = upgradeable(&config).upgradeable.expect("upgradeable");
        assert!(!fragment.status);
        assert_eq!(fragment.reason, "UnsupportedConfigOverridesSet");
    }

    #[test]
    fn test_empty_overrides_are_ignored() {
        let mut config =
            OpenShiftAPIServer::new(OPERATOR_CONFIG_NAME, OpenShiftAPIServerSpec::default());
        config.spec.unsupported_config_overrides = Some(json!({}));
        assert!(upgradeable(&config).upgradeable.expect("upgradeable").status);
    }
}
