//! ClusterOperator CRD
//!
//! The external status record (`config.openshift.io/v1`) every cluster
//! operator publishes: conditions, component versions and the objects it
//! manages.

use crate::conditions::StatusCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "ClusterOperator",
    plural = "clusteroperators",
    status = "ClusterOperatorStatus"
)]
pub struct ClusterOperatorSpec {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperatorStatus {
    /// Available, Progressing, Degraded and Upgradeable
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,

    /// Versions of the operator and its operands
    #[serde(default)]
    pub versions: Vec<OperandVersion>,

    /// Objects useful when debugging the operator
    #[serde(default)]
    pub related_objects: Vec<ObjectReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct OperandVersion {
    /// Component name
    pub name: String,

    /// Version reported for the component
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct ObjectReference {
    /// API group, empty for the core group
    pub group: String,

    /// Plural resource name
    pub resource: String,

    /// Namespace, omitted for cluster-scoped objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Object name
    pub name: String,
}

impl ClusterOperatorStatus {
    /// Looks up a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&StatusCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Versions as `(name, version)` pairs.
    pub fn version_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.versions
            .iter()
            .map(|v| (v.name.as_str(), v.version.as_str()))
    }
}
