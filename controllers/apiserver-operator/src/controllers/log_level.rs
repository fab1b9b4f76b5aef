//! Applies `spec.operatorLogLevel` to the process log filter.

use super::OperatorContext;
use crate::caches;
use crate::logging::LogLevelSetter;
use async_trait::async_trait;
use crds::{OPERATOR_CONFIG_NAME, OpenShiftAPIServer};
use operator_runtime::{
    Controller, ControllerError, ControllerHealth, ControllerSpec, KubeCache, SyncHandler,
};
use std::sync::Arc;
use tracing::info;

/// Controller name.
pub const NAME: &str = "log-level";

/// Filter wanted for the configuration; unset falls back to the startup filter.
pub fn desired_filter(config: Option<&OpenShiftAPIServer>, initial: &str) -> String {
    config
        .and_then(|config| config.spec.operator_log_level)
        .map_or_else(|| initial.to_string(), |level| level.as_filter().to_string())
}

/// Sync handler swapping the log filter.
pub struct LogLevel {
    config: Arc<KubeCache<OpenShiftAPIServer>>,
    setter: Arc<dyn LogLevelSetter>,
}

impl LogLevel {
    /// Creates the handler.
    pub fn new(
        config: Arc<KubeCache<OpenShiftAPIServer>>,
        setter: Arc<dyn LogLevelSetter>,
    ) -> Self {
        Self { config, setter }
    }
}

/// Applies the desired filter through `setter` if it differs from the current one.
pub fn apply(setter: &dyn LogLevelSetter, desired: &str) -> Result<bool, ControllerError> {
    let current = setter.current();
    if current == desired {
        return Ok(false);
    }
    setter
        .set(desired)
        .map_err(|e| ControllerError::InvalidConfig(format!("log filter {desired:?}: {e}")))?;
    info!(from = %current, to = %desired, "operator log level changed");
    Ok(true)
}

#[async_trait]
impl SyncHandler for LogLevel {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        let config = self.config.get(OPERATOR_CONFIG_NAME);
        let desired = desired_filter(config.as_deref(), &self.setter.initial());
        apply(self.setter.as_ref(), &desired)?;
        Ok(ControllerHealth::healthy())
    }
}

/// Declares the controller.
pub fn spec(ctx: &OperatorContext, setter: Arc<dyn LogLevelSetter>) -> ControllerSpec {
    let ctx = ctx.clone();
    ControllerSpec::new(NAME, move |wiring| {
        let config = wiring.cache::<KubeCache<OpenShiftAPIServer>>(&caches::operator_config())?;
        let controller = ctx
            .queue(NAME, LogLevel::new(Arc::clone(&config), setter))
            .watch_cache(config.as_ref());
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .cache(caches::operator_config())
}
