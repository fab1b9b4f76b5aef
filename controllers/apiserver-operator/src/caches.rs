//! Cache keys of the operator and their registration in the shared layer.

use crate::names::{MANAGED_CONFIG_NAMESPACE, TARGET_NAMESPACE, USER_CONFIG_NAMESPACE};
use crds::{ClusterOperator, OpenShiftAPIServer};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::Client;
use operator_runtime::{CacheError, CacheKey, CacheLayer, KubeCache, Scope};

/// Namespaces whose ConfigMaps and Secrets are cached.
pub const SYNCED_NAMESPACES: [&str; 3] = [
    USER_CONFIG_NAMESPACE,
    MANAGED_CONFIG_NAMESPACE,
    TARGET_NAMESPACE,
];

fn namespaced(namespace: &str) -> Scope {
    Scope::Namespace(namespace.to_string())
}

/// ConfigMaps of one namespace.
pub fn config_maps(namespace: &str) -> CacheKey {
    KubeCache::<ConfigMap>::key_for(namespaced(namespace))
}

/// Secrets of one namespace.
pub fn secrets(namespace: &str) -> CacheKey {
    KubeCache::<Secret>::key_for(namespaced(namespace))
}

/// Operand DaemonSets.
pub fn daemon_sets() -> CacheKey {
    KubeCache::<DaemonSet>::key_for(namespaced(TARGET_NAMESPACE))
}

/// All namespaces.
pub fn namespaces() -> CacheKey {
    KubeCache::<Namespace>::key_for(Scope::Cluster)
}

/// The operator configuration.
pub fn operator_config() -> CacheKey {
    KubeCache::<OpenShiftAPIServer>::key_for(Scope::Cluster)
}

/// ClusterOperator records.
pub fn cluster_operators() -> CacheKey {
    KubeCache::<ClusterOperator>::key_for(Scope::Cluster)
}

/// Registers every cache the operator's controllers declare.
pub fn register_all(layer: &mut CacheLayer, client: &Client) -> Result<(), CacheError> {
    for namespace in SYNCED_NAMESPACES {
        layer.register(config_maps(namespace), || {
            KubeCache::<ConfigMap>::namespaced(client.clone(), namespace)
        })?;
        layer.register(secrets(namespace), || {
            KubeCache::<Secret>::namespaced(client.clone(), namespace)
        })?;
    }
    layer.register(daemon_sets(), || {
        KubeCache::<DaemonSet>::namespaced(client.clone(), TARGET_NAMESPACE)
    })?;
    layer.register(namespaces(), || KubeCache::<Namespace>::cluster(client.clone()))?;
    layer.register(operator_config(), || {
        KubeCache::<OpenShiftAPIServer>::cluster(client.clone())
    })?;
    layer.register(cluster_operators(), || {
        KubeCache::<ClusterOperator>::cluster(client.clone())
    })?;
    Ok(())
}
