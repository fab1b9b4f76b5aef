//! Operator CRD Definitions
//!
//! Typed Kubernetes objects the operator reads and writes:
//! the `OpenShiftAPIServer` operator configuration and the `ClusterOperator`
//! status record.

pub mod cluster_operator;
pub mod conditions;
pub mod openshift_apiserver;
mod schema;

pub use cluster_operator::*;
pub use conditions::*;
pub use openshift_apiserver::*;
