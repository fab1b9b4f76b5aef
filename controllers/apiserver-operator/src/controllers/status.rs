//! Status controller
//!
//! Recomputes the aggregated status whenever controller health, component
//! versions or the published record change, and writes it to
//! `ClusterOperator/openshift-apiserver`.

use super::OperatorContext;
use crate::caches;
use crate::names::{
    CLUSTER_OPERATOR_NAME, MANAGED_CONFIG_NAMESPACE, OPERATOR_NAMESPACE, TARGET_NAMESPACE,
    USER_CONFIG_NAMESPACE,
};
use crate::publisher::ClusterOperatorPublisher;
use crds::{ClusterOperator, OPERATOR_CONFIG_NAME};
use operator_runtime::{Controller, ControllerSpec, KubeCache, RelatedObject, StatusSync};
use std::sync::Arc;

/// Controller name.
pub const NAME: &str = "status";

/// API groups the operand serves through aggregated `APIService`s.
pub const API_GROUPS: [&str; 9] = [
    "apps",
    "authorization",
    "build",
    "image",
    "project",
    "quota",
    "route",
    "security",
    "template",
];

/// `apiservices` entries for every group in [`API_GROUPS`].
pub fn api_service_references() -> Vec<RelatedObject> {
    API_GROUPS
        .iter()
        .map(|group| {
            RelatedObject::cluster(
                "apiregistration.k8s.io",
                "apiservices",
                format!("v1.{group}.openshift.io"),
            )
        })
        .collect()
}

/// Objects listed in the published status.
pub fn related_objects() -> Vec<RelatedObject> {
    let mut related = vec![RelatedObject::cluster(
        "operator.openshift.io",
        "openshiftapiservers",
        OPERATOR_CONFIG_NAME,
    )];
    related.extend(
        [
            USER_CONFIG_NAMESPACE,
            MANAGED_CONFIG_NAMESPACE,
            OPERATOR_NAMESPACE,
            TARGET_NAMESPACE,
        ]
        .into_iter()
        .map(RelatedObject::namespace),
    );
    related.extend(api_service_references());
    related
}

/// Declares the controller.
pub fn spec(ctx: &OperatorContext, related: Vec<RelatedObject>) -> ControllerSpec {
    let ctx = ctx.clone();
    ControllerSpec::new(NAME, move |wiring| {
        let records = wiring.cache::<KubeCache<ClusterOperator>>(&caches::cluster_operators())?;
        let publisher = ClusterOperatorPublisher::new(
            CLUSTER_OPERATOR_NAME,
            ctx.client.clone(),
            Arc::clone(&records),
        )
        .with_metrics(ctx.metrics.clone());
        let sync = StatusSync::new(
            ctx.health.clone(),
            ctx.versions.clone(),
            related,
            Arc::new(publisher),
        );

        let controller = ctx
            .queue(NAME, sync)
            .watch(ctx.health.subscribe())
            .watch(ctx.versions.subscribe())
            .watch_cache(records.as_ref());
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .cache(caches::cluster_operators())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_related_objects() {
        let related = related_objects();
        assert_eq!(related.len(), 14);
        assert_eq!(related[0].resource, "openshiftapiservers");
        assert_eq!(related[0].name, "cluster");
        assert!(
            related[1..5]
                .iter()
                .all(|object| object.resource == "namespaces" && object.namespace.is_empty())
        );
        assert!(related.iter().any(|object| object.name == TARGET_NAMESPACE));
        assert!(related[5..].iter().all(|object| {
            object.group == "apiregistration.k8s.io" && object.resource == "apiservices"
        }));
        assert_eq!(related[5].name, "v1.apps.openshift.io");
        assert_eq!(related[13].name, "v1.template.openshift.io");
    }
}
