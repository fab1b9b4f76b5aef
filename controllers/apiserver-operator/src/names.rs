//! Well-known names shared by the controllers.

/// Namespace holding user-provided configuration.
pub const USER_CONFIG_NAMESPACE: &str = "openshift-config";

/// Namespace holding configuration generated by the platform.
pub const MANAGED_CONFIG_NAMESPACE: &str = "openshift-config-managed";

/// Namespace the operator runs in.
pub const OPERATOR_NAMESPACE: &str = "openshift-apiserver-operator";

/// Namespace the operand runs in.
pub const TARGET_NAMESPACE: &str = "openshift-apiserver";

/// Name of the ClusterOperator record this operator publishes.
pub const CLUSTER_OPERATOR_NAME: &str = "openshift-apiserver";

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "openshift-apiserver-operator";

/// Operand DaemonSet in the target namespace.
pub const OPERAND_DAEMONSET: &str = "apiserver";

/// Version key of the operand.
pub const OPERAND_VERSION_NAME: &str = "openshift-apiserver";

/// Version key of the operator itself.
pub const OPERATOR_VERSION_NAME: &str = "operator";

/// Encryption configuration consumed by the operand.
pub const ENCRYPTION_CONFIG: &str = "encryption-config";

/// Prefix of revisioned encryption configuration snapshots.
pub const ENCRYPTION_CONFIG_REVISION_PREFIX: &str = "encryption-config-";

/// Encryption configuration produced for this operand in the managed namespace.
pub const MANAGED_ENCRYPTION_CONFIG: &str = "encryption-config-openshift-apiserver";

/// User CA bundle in the user configuration namespace.
pub const USER_CA_BUNDLE: &str = "user-ca-bundle";

/// Trusted CA bundle copied into the target namespace.
pub const TRUSTED_CA_BUNDLE: &str = "trusted-ca-bundle";

/// Finalizer the operator places on the target namespace.
pub const NAMESPACE_FINALIZER: &str = "openshift.io/openshift-apiserver-operator";
