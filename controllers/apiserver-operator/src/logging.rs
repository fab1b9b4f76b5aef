//! Tracing setup with a filter the log-level controller can swap at runtime.

use crate::error::OperatorError;
use std::sync::{Mutex, PoisonError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Changes the process log filter.
pub trait LogLevelSetter: Send + Sync {
    /// Filter installed at startup.
    fn initial(&self) -> String;

    /// Filter currently installed.
    fn current(&self) -> String;

    /// Installs `directive` as the process filter.
    fn set(&self, directive: &str) -> Result<(), String>;
}

/// Handle to the reloadable filter of the global subscriber.
pub struct LogLevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    initial: String,
    current: Mutex<String>,
}

impl std::fmt::Debug for LogLevelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLevelHandle")
            .field("initial", &self.initial)
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

/// Installs the global subscriber.
///
/// The initial filter comes from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
pub fn init() -> Result<LogLevelHandle, OperatorError> {
    let initial = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    let filter = EnvFilter::try_new(&initial)
        .map_err(|e| OperatorError::Logging(format!("invalid filter {initial:?}: {e}")))?;
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| OperatorError::Logging(e.to_string()))?;

    Ok(LogLevelHandle {
        handle,
        current: Mutex::new(initial.clone()),
        initial,
    })
}

impl LogLevelSetter for LogLevelHandle {
    fn initial(&self) -> String {
        self.initial.clone()
    }

    fn current(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, directive: &str) -> Result<(), String> {
        let filter = EnvFilter::try_new(directive).map_err(|e| e.to_string())?;
        self.handle.reload(filter).map_err(|e| e.to_string())?;
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = directive.to_string();
        Ok(())
    }
}
