//! OpenShiftAPIServer CRD
//!
//! Cluster-scoped operator configuration (`operator.openshift.io/v1`). The
//! singleton named `cluster` drives every controller of the operator.

use crate::conditions::StatusCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the singleton operator configuration.
pub const OPERATOR_CONFIG_NAME: &str = "cluster";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "OpenShiftAPIServer",
    plural = "openshiftapiservers",
    status = "OpenShiftAPIServerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct OpenShiftAPIServerSpec {
    /// Whether and how the operator manages the operand
    #[serde(default)]
    pub management_state: ManagementState,

    /// Verbosity of the operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Verbosity of the operator itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_log_level: Option<LogLevel>,

    /// Unsupported configuration merged over the observed config.
    /// Setting it blocks upgrades.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::schema::preserve_unknown_fields")]
    pub unsupported_config_overrides: Option<serde_json::Value>,

    /// Configuration observed from cluster state by the config observer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::schema::preserve_unknown_fields")]
    pub observed_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ManagementState {
    /// The operator reconciles the operand
    #[default]
    Managed,

    /// The operator leaves the operand alone
    Unmanaged,

    /// The operator removes the operand
    Removed,

    /// The operator reconciles even when it would normally refuse
    Force,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Default verbosity
    #[default]
    Normal,

    /// Debug output
    Debug,

    /// Trace output
    Trace,

    /// Everything
    TraceAll,
}

impl LogLevel {
    /// Tracing filter directive for this level.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Normal => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace | LogLevel::TraceAll => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenShiftAPIServerStatus {
    /// Conditions written by the operator's controllers
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,

    /// Newest revision of the encryption config snapshot
    #[serde(default)]
    pub latest_available_revision: i32,

    /// Generation of the spec last acted upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Operand version currently rolled out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Number of operand pods ready
    #[serde(default)]
    pub ready_replicas: i32,
}

impl OpenShiftAPIServer {
    /// Whether unsupported overrides are set to anything but an empty object.
    pub fn has_unsupported_overrides(&self) -> bool {
        match &self.spec.unsupported_config_overrides {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }

    /// Latest available revision, zero when status was never written.
    pub fn latest_available_revision(&self) -> i32 {
        self.status
            .as_ref()
            .map_or(0, |status| status.latest_available_revision)
    }
}
