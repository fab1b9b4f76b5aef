//! Publishes the aggregated status to the `ClusterOperator` record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crds::{
    ClusterOperator, ClusterOperatorSpec, ClusterOperatorStatus, ObjectReference, OperandVersion,
    StatusCondition, set_condition,
};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use operator_runtime::{
    AggregatedStatus, ControllerError, KubeCache, StatusPublisher, SupervisorMetrics,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Converts the aggregated status into the record's status.
///
/// Conditions are merged into `previous` so transition times survive
/// publishes that do not change a condition's status.
pub fn to_cluster_operator_status(
    status: &AggregatedStatus,
    previous: Option<&ClusterOperatorStatus>,
    now: DateTime<Utc>,
) -> ClusterOperatorStatus {
    let mut conditions = previous.map(|p| p.conditions.clone()).unwrap_or_default();
    for condition in &status.conditions {
        set_condition(
            &mut conditions,
            StatusCondition::new(
                condition.condition_type.as_str(),
                &condition.status.to_string(),
                &condition.reason,
                &condition.message,
            ),
            now,
        );
    }

    ClusterOperatorStatus {
        conditions,
        versions: status
            .versions
            .iter()
            .map(|v| OperandVersion {
                name: v.name.clone(),
                version: v.version.clone(),
            })
            .collect(),
        related_objects: status
            .related_objects
            .iter()
            .map(|object| ObjectReference {
                group: object.group.clone(),
                resource: object.resource.clone(),
                namespace: (!object.namespace.is_empty()).then(|| object.namespace.clone()),
                name: object.name.clone(),
            })
            .collect(),
    }
}

/// [`StatusPublisher`] writing `ClusterOperator/<name>`.
pub struct ClusterOperatorPublisher {
    name: String,
    api: Api<ClusterOperator>,
    cache: Arc<KubeCache<ClusterOperator>>,
    metrics: Option<SupervisorMetrics>,
}

impl ClusterOperatorPublisher {
    /// Publishes to the record `name`, reading the current record from `cache`.
    pub fn new(
        name: impl Into<String>,
        client: Client,
        cache: Arc<KubeCache<ClusterOperator>>,
    ) -> Self {
        Self {
            name: name.into(),
            api: Api::all(client),
            cache,
            metrics: None,
        }
    }

    /// Counts publishes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SupervisorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn write(&self, status: &AggregatedStatus) -> Result<(), ControllerError> {
        let existing = match self.cache.get(&self.name) {
            Some(existing) => Some(existing),
            None => self.api.get_opt(&self.name).await?.map(Arc::new),
        };
        let previous = existing.as_ref().and_then(|co| co.status.as_ref());
        let desired = to_cluster_operator_status(status, previous, Utc::now());
        if previous == Some(&desired) {
            debug!(clusteroperator = %self.name, "status unchanged");
            return Ok(());
        }

        if existing.is_none() {
            info!(clusteroperator = %self.name, "creating ClusterOperator");
            let record = ClusterOperator::new(&self.name, ClusterOperatorSpec::default());
            self.api.create(&PostParams::default(), &record).await?;
        }

        let patch = serde_json::json!({ "status": serde_json::to_value(&desired)? });
        self.api
            .patch_status(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(clusteroperator = %self.name, "published status");
        Ok(())
    }
}

#[async_trait]
impl StatusPublisher for ClusterOperatorPublisher {
    async fn publish(&self, status: &AggregatedStatus) -> Result<(), ControllerError> {
        let result = self.write(status).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_publish(result.is_ok());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use operator_runtime::{
        ConditionStatus, ConditionType, ControllerHealth, RelatedObject, aggregate,
    };
    use std::collections::BTreeMap;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    fn status(health: &[(&str, ControllerHealth)], versions: &[(&str, &str)]) -> AggregatedStatus {
        let health: BTreeMap<String, ControllerHealth> = health
            .iter()
            .map(|(name, health)| ((*name).to_string(), health.clone()))
            .collect();
        let versions: BTreeMap<String, String> = versions
            .iter()
            .map(|(name, version)| ((*name).to_string(), (*version).to_string()))
            .collect();
        aggregate(
            &health,
            &versions,
            &[
                RelatedObject::cluster("operator.openshift.io", "openshiftapiservers", "cluster"),
                RelatedObject::namespace("openshift-apiserver"),
            ],
        )
    }

    #[test]
    fn test_converts_conditions_versions_and_related_objects() {
        let aggregated = status(
            &[("workload", ControllerHealth::healthy())],
            &[("operator", "4.18.0")],
        );
        let converted = to_cluster_operator_status(&aggregated, None, at(10));

        assert_eq!(converted.conditions.len(), 4);
        let degraded = converted.condition("Degraded").expect("degraded");
        assert_eq!(degraded.status, "False");
        assert_eq!(degraded.last_transition_time, Some(at(10)));
        assert_eq!(converted.version_pairs().collect::<Vec<_>>(), vec![("operator", "4.18.0")]);
        assert_eq!(converted.related_objects[0].namespace, None);
        assert_eq!(converted.related_objects[1].resource, "namespaces");
    }

    #[test]
    fn test_republishing_same_status_is_a_no_op() {
        let aggregated = status(
            &[("workload", ControllerHealth::healthy())],
            &[("operator", "4.18.0")],
        );
        let first = to_cluster_operator_status(&aggregated, None, at(10));
        let second = to_cluster_operator_status(&aggregated, Some(&first), at(20));
        assert_eq!(first, second);
    }

    #[test]
    fn test_transition_time_moves_only_for_changed_conditions() {
        let healthy = status(&[("workload", ControllerHealth::healthy())], &[]);
        let first = to_cluster_operator_status(&healthy, None, at(10));

        let degraded = status(
            &[("workload", ControllerHealth::degraded("SyncError", "boom"))],
            &[],
        );
        assert!(degraded.is(ConditionType::Degraded, ConditionStatus::True));
        let second = to_cluster_operator_status(&degraded, Some(&first), at(20));

        let condition = second.condition("Degraded").expect("degraded");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason.as_deref(), Some("WorkloadDegraded"));
        assert_eq!(condition.last_transition_time, Some(at(20)));
        assert_eq!(
            second.condition("Available").expect("available").last_transition_time,
            Some(at(10))
        );
    }
}
