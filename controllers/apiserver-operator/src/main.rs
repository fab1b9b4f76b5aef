//! OpenShift API Server Operator
//!
//! Supervises the controllers that manage the OpenShift API server operand:
//! - resource sync, config observation and encryption config deployment
//! - operand workload rollout, revisions and pruning
//! - namespace finalizer, config overrides and operator log level
//! - aggregated status published to `ClusterOperator/openshift-apiserver`

mod caches;
mod config;
mod controllers;
mod error;
mod logging;
mod names;
mod publisher;
mod starter;

use crate::config::OperatorConfig;
use anyhow::Context;
use operator_runtime::shutdown::cancel_on_signal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = logging::init().context("failed to initialize logging")?;

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        anyhow::bail!("a rustls crypto provider is already installed");
    }

    info!("Starting OpenShift API Server Operator");

    let config = OperatorConfig::from_env().context("failed to load configuration")?;
    info!("Configuration:");
    info!("  Operand image: {}", config.image.as_deref().unwrap_or("<unset>"));
    info!("  Operator image: {}", config.operator_image.as_deref().unwrap_or("<unset>"));
    info!("  Operator version: {}", config.operator_version);
    info!("  Operand version: {}", config.operand_version);
    info!("  Shutdown grace: {:?}", config.shutdown_grace);

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    let stopped = starter::run(config, Arc::new(log_level), cancel)
        .await
        .context("operator stopped")?;
    match stopped {}
}
