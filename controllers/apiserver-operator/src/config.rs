//! Operator configuration.
//!
//! Loaded once from environment variables at startup:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `IMAGE` | operand image | unset |
//! | `OPERATOR_IMAGE` | operator image | unset |
//! | `OPERATOR_IMAGE_VERSION` | version reported for `operator` | empty |
//! | `OPERAND_IMAGE_VERSION` | version reported for the operand once rolled out | `OPERATOR_IMAGE_VERSION` |
//! | `DEBUG_BIND_ADDRESS` | address of the debug/metrics server | disabled |
//! | `SHUTDOWN_GRACE_SECONDS` | time controllers get to stop | 5 |
//! | `RESYNC_SECONDS` | periodic resync of every controller | 600 |

use crate::error::OperatorError;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 5;
const DEFAULT_RESYNC_SECONDS: u64 = 600;

/// Process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Operand image
    pub image: Option<String>,
    /// Operator image
    pub operator_image: Option<String>,
    /// Version reported for the operator
    pub operator_version: String,
    /// Version reported for the operand once it is rolled out
    pub operand_version: String,
    /// Debug server address
    pub debug_bind_address: Option<SocketAddr>,
    /// Shutdown grace period
    pub shutdown_grace: Duration,
    /// Periodic resync interval
    pub resync: Duration,
}

impl OperatorConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, OperatorError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, OperatorError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let operator_version = non_empty("OPERATOR_IMAGE_VERSION").unwrap_or_default();
        let operand_version =
            non_empty("OPERAND_IMAGE_VERSION").unwrap_or_else(|| operator_version.clone());

        let debug_bind_address = non_empty("DEBUG_BIND_ADDRESS")
            .map(|addr| {
                addr.parse::<SocketAddr>().map_err(|e| {
                    OperatorError::InvalidConfig(format!("DEBUG_BIND_ADDRESS {addr:?}: {e}"))
                })
            })
            .transpose()?;

        let seconds = |key: &str, default: u64| -> Result<Duration, OperatorError> {
            match non_empty(key) {
                None => Ok(Duration::from_secs(default)),
                Some(value) => value
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| OperatorError::InvalidConfig(format!("{key} {value:?}: {e}"))),
            }
        };

        let resync = seconds("RESYNC_SECONDS", DEFAULT_RESYNC_SECONDS)?;
        if resync.is_zero() {
            return Err(OperatorError::InvalidConfig(
                "RESYNC_SECONDS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            image: non_empty("IMAGE"),
            operator_image: non_empty("OPERATOR_IMAGE"),
            operator_version,
            operand_version,
            debug_bind_address,
            shutdown_grace: seconds("SHUTDOWN_GRACE_SECONDS", DEFAULT_SHUTDOWN_GRACE_SECONDS)?,
            resync,
        })
    }
}
