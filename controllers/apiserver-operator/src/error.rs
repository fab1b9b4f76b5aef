//! Operator startup error types.
//!
//! Everything here is fatal: these errors abort the process, either before
//! any controller runs or once the supervisor stops. Errors raised while
//! controllers run are
//! [`operator_runtime::ControllerError`]s and stay local to the controller.

use operator_runtime::{CacheError, SupervisorError, WiringError};
use thiserror::Error;

/// Errors that can occur while starting the operator.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Conflicting cache registration
    #[error("Cache registration failed: {0}")]
    Cache(#[from] CacheError),

    /// Controller wiring failed
    #[error("Controller wiring failed: {0}")]
    Wiring(#[from] WiringError),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The supervisor stopped
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Logging setup error
    #[error("Logging error: {0}")]
    Logging(String),
}
