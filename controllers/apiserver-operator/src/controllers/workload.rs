//! Workload controller
//!
//! Watches the operand DaemonSet and reports rollout health. Once every
//! scheduled pod runs the current generation the operand version is recorded,
//! which is what moves the published `openshift-apiserver` version forward.
//! The version is recorded only after the completed rollout's health is on
//! the health board.

use super::OperatorContext;
use crate::caches;
use crate::names::{OPERAND_DAEMONSET, OPERAND_VERSION_NAME};
use async_trait::async_trait;
use crds::{ManagementState, OPERATOR_CONFIG_NAME, OpenShiftAPIServer};
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use operator_runtime::{
    ComponentVersion, Controller, ControllerError, ControllerHealth, ControllerSpec, KubeCache,
    SyncHandler,
};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Controller name.
pub const NAME: &str = "workload";

/// Rollout state of the operand DaemonSet.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    /// Health to report
    pub health: ControllerHealth,
    /// Every scheduled pod is updated and available
    pub complete: bool,
    /// Pods ready
    pub ready: i32,
}

/// Evaluates the operand DaemonSet.
pub fn evaluate(daemon_set: Option<&DaemonSet>) -> Rollout {
    let Some(daemon_set) = daemon_set else {
        return Rollout {
            health: ControllerHealth::healthy().with_available(
                false,
                "NoDaemon",
                format!("daemonset/{OPERAND_DAEMONSET} is missing"),
            ),
            complete: false,
            ready: 0,
        };
    };

    let status = daemon_set.status.clone().unwrap_or_default();
    let desired = status.desired_number_scheduled;
    let updated = status.updated_number_scheduled.unwrap_or(0);
    let available = status.number_available.unwrap_or(0);
    let generation = daemon_set.metadata.generation.unwrap_or(0);
    let observed = status.observed_generation.unwrap_or(0);

    let mut health = if available > 0 {
        ControllerHealth::healthy().with_available(true, "AsExpected", "")
    } else {
        ControllerHealth::healthy().with_available(
            false,
            "NoAPIServerPod",
            "no openshift-apiserver daemon pods available on any node",
        )
    };

    let progressing = observed < generation || updated < desired;
    health = if observed < generation {
        health.with_progressing(
            true,
            "NewGeneration",
            format!("daemonset/{OPERAND_DAEMONSET}: observed generation is {observed}, desired generation is {generation}"),
        )
    } else if updated < desired {
        health.with_progressing(
            true,
            "RolloutInProgress",
            format!("daemonset/{OPERAND_DAEMONSET}: {updated} of {desired} pods updated"),
        )
    } else {
        health.with_progressing(false, "AsExpected", "")
    };

    Rollout {
        health,
        complete: !progressing && desired > 0 && available == desired,
        ready: status.number_ready,
    }
}

/// Version to record after `rollout`, if it differs from the recorded one.
pub fn rolled_out_version<'a>(
    rollout: &Rollout,
    version: &'a str,
    recorded: Option<&str>,
) -> Option<&'a str> {
    (rollout.complete && !version.is_empty() && recorded != Some(version)).then_some(version)
}

/// Sync handler reporting operand rollout.
pub struct Workload {
    config: Arc<KubeCache<OpenShiftAPIServer>>,
    daemon_sets: Arc<KubeCache<DaemonSet>>,
    operand_version: ComponentVersion,
    version: String,
    pending_version: Mutex<Option<String>>,
    client: Client,
}

impl Workload {
    async fn write_status(
        &self,
        config: &OpenShiftAPIServer,
        rollout: &Rollout,
    ) -> Result<(), ControllerError> {
        let status = config.status.clone().unwrap_or_default();
        let version = if rollout.complete && !self.version.is_empty() {
            Some(self.version.clone())
        } else {
            status.version.clone()
        };
        if status.ready_replicas == rollout.ready
            && status.version == version
            && status.observed_generation == config.metadata.generation
        {
            return Ok(());
        }

        debug!(ready = rollout.ready, version = ?version, "updating operator status");
        let patch = json!({
            "status": {
                "readyReplicas": rollout.ready,
                "version": version,
                "observedGeneration": config.metadata.generation,
            }
        });
        let api: Api<OpenShiftAPIServer> = Api::all(self.client.clone());
        api.patch_status(OPERATOR_CONFIG_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SyncHandler for Workload {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        *self.pending_version.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let Some(config) = self.config.get(OPERATOR_CONFIG_NAME) else {
            return Ok(ControllerHealth::healthy());
        };
        if matches!(
            config.spec.management_state,
            ManagementState::Unmanaged | ManagementState::Removed
        ) {
            debug!(state = ?config.spec.management_state, "operand not managed");
            return Ok(ControllerHealth::healthy());
        }

        let rollout = evaluate(self.daemon_sets.get(OPERAND_DAEMONSET).as_deref());
        let recorded = self.operand_version.current();
        *self.pending_version.lock().unwrap_or_else(PoisonError::into_inner) =
            rolled_out_version(&rollout, &self.version, recorded.as_deref()).map(str::to_string);
        self.write_status(&config, &rollout).await?;
        Ok(rollout.health)
    }

    fn reported(&self, _key: &str, _health: &ControllerHealth) {
        let pending = self
            .pending_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(version) = pending {
            info!(version = %version, "operand rolled out");
            self.operand_version.set(&version);
        }
    }
}

/// Declares the controller.
pub fn spec(ctx: &OperatorContext) -> ControllerSpec {
    let ctx = ctx.clone();
    ControllerSpec::new(NAME, move |wiring| {
        let config = wiring.cache::<KubeCache<OpenShiftAPIServer>>(&caches::operator_config())?;
        let daemon_sets = wiring.cache::<KubeCache<DaemonSet>>(&caches::daemon_sets())?;

        let controller = ctx
            .queue(NAME, Workload {
                config: Arc::clone(&config),
                daemon_sets: Arc::clone(&daemon_sets),
                operand_version: ctx.versions.component(OPERAND_VERSION_NAME),
                version: ctx.config.operand_version.clone(),
                pending_version: Mutex::new(None),
                client: ctx.client.clone(),
            })
            .watch_cache(config.as_ref())
            .watch_cache(daemon_sets.as_ref());
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .cache(caches::operator_config())
    .cache(caches::daemon_sets())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::client_answering_deletes;
    use axum::http::StatusCode;
    use crds::{OpenShiftAPIServerSpec, OpenShiftAPIServerStatus};
    use k8s_openapi::api::apps::v1::DaemonSetStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use operator_runtime::testing::RecordingPublisher;
    use operator_runtime::{
        ConditionStatus, ConditionType, HealthBoard, QueueController, RelatedObject, Scope,
        StatusSync, VersionGetter,
    };
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn daemon_set(
        generation: i64,
        observed: i64,
        desired: i32,
        updated: i32,
        available: i32,
    ) -> DaemonSet {
        DaemonSet {
            metadata: ObjectMeta {
                name: Some(OPERAND_DAEMONSET.to_string()),
                generation: Some(generation),
                ..Default::default()
            },
            status: Some(DaemonSetStatus {
                observed_generation: Some(observed),
                desired_number_scheduled: desired,
                updated_number_scheduled: Some(updated),
                number_available: Some(available),
                number_ready: available,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_daemon_set_is_unavailable() {
        let rollout = evaluate(None);
        let available = rollout.health.available.expect("available fragment");
        assert!(!available.status);
        assert_eq!(available.reason, "NoDaemon");
        assert!(!rollout.complete);
    }

    #[test]
    fn test_complete_rollout() {
        let rollout = evaluate(Some(&daemon_set(3, 3, 3, 3, 3)));
        assert!(rollout.complete);
        assert_eq!(rollout.ready, 3);
        assert!(rollout.health.available.expect("available").status);
        assert!(!rollout.health.progressing.expect("progressing").status);
        assert!(!rollout.health.degraded.expect("degraded").status);
    }

    #[test]
    fn test_new_generation_is_progressing() {
        let rollout = evaluate(Some(&daemon_set(4, 3, 3, 3, 3)));
        let progressing = rollout.health.progressing.expect("progressing");
        assert!(progressing.status);
        assert_eq!(progressing.reason, "NewGeneration");
        assert!(!rollout.complete);
    }

    #[test]
    fn test_partial_update_is_progressing_but_available() {
        let rollout = evaluate(Some(&daemon_set(3, 3, 3, 1, 2)));
        assert_eq!(rollout.health.progressing.expect("progressing").reason, "RolloutInProgress");
        assert!(rollout.health.available.expect("available").status);
        assert!(!rollout.complete);
    }

    #[test]
    fn test_no_pods_available() {
        let rollout = evaluate(Some(&daemon_set(1, 1, 3, 3, 0)));
        let available = rollout.health.available.expect("available");
        assert!(!available.status);
        assert_eq!(available.reason, "NoAPIServerPod");
    }

    #[test]
    fn test_version_is_recorded_once_per_rollout() {
        let complete = evaluate(Some(&daemon_set(3, 3, 3, 3, 3)));
        assert_eq!(rolled_out_version(&complete, "4.18.1", None), Some("4.18.1"));
        assert_eq!(rolled_out_version(&complete, "4.18.1", Some("4.18.0")), Some("4.18.1"));
        assert_eq!(rolled_out_version(&complete, "4.18.1", Some("4.18.1")), None);
        assert_eq!(rolled_out_version(&complete, "", None), None);

        let partial = evaluate(Some(&daemon_set(3, 3, 3, 1, 3)));
        assert_eq!(rolled_out_version(&partial, "4.18.1", Some("4.18.0")), None);
    }

    #[tokio::test]
    async fn test_new_version_is_never_published_with_stale_progressing() {
        let (client, _) = client_answering_deletes(StatusCode::OK);
        let mut config =
            OpenShiftAPIServer::new(OPERATOR_CONFIG_NAME, OpenShiftAPIServerSpec::default());
        config.metadata.generation = Some(1);
        config.status = Some(OpenShiftAPIServerStatus {
            observed_generation: Some(1),
            version: Some("4.18.1".to_string()),
            ready_replicas: 3,
            ..Default::default()
        });

        let health = HealthBoard::new();
        health.report(
            NAME,
            ControllerHealth::healthy().with_progressing(
                true,
                "RolloutInProgress",
                "1 of 3 pods updated",
            ),
        );
        let versions = VersionGetter::new();
        versions.seed([(OPERAND_VERSION_NAME, "4.18.0")]);

        let handler = Workload {
            config: Arc::new(KubeCache::preloaded(
                Api::all(client.clone()),
                Scope::Cluster,
                [config],
            )),
            daemon_sets: Arc::new(KubeCache::preloaded(
                Api::namespaced(client.clone(), "openshift-apiserver"),
                Scope::Namespace("openshift-apiserver".to_string()),
                [DaemonSet {
                    metadata: ObjectMeta {
                        namespace: Some("openshift-apiserver".to_string()),
                        ..daemon_set(3, 3, 3, 3, 3).metadata
                    },
                    ..daemon_set(3, 3, 3, 3, 3)
                }],
            )),
            operand_version: versions.component(OPERAND_VERSION_NAME),
            version: "4.18.1".to_string(),
            pending_version: Mutex::new(None),
            client,
        };

        let publisher = Arc::new(RecordingPublisher::new());
        let related = vec![RelatedObject::namespace("openshift-apiserver")];
        let status = QueueController::new(
            "status",
            StatusSync::new(health.clone(), versions.clone(), related, publisher.clone()),
            health.clone(),
        )
        .watch(health.subscribe())
        .watch(versions.subscribe());
        let workload = QueueController::new(NAME, handler, health.clone());

        let cancel = CancellationToken::new();
        let status_run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { status.run(cancel, 1).await })
        };
        publisher
            .wait_for(Duration::from_secs(2), |_| true)
            .await
            .expect("initial publish");
        let workload_run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { workload.run(cancel, 1).await })
        };

        let rolled_out = |record: &operator_runtime::AggregatedStatus| {
            record
                .versions
                .iter()
                .any(|v| v.name == OPERAND_VERSION_NAME && v.version == "4.18.1")
        };
        let published = publisher
            .wait_for(Duration::from_secs(2), rolled_out)
            .await
            .expect("new version published");
        assert!(published.is(ConditionType::Progressing, ConditionStatus::False));

        cancel.cancel();
        status_run.await.expect("join").expect("status");
        workload_run.await.expect("join").expect("workload");

        for record in publisher.published() {
            assert!(
                !(rolled_out(&record)
                    && record.is(ConditionType::Progressing, ConditionStatus::True)),
                "published {record:?}"
            );
        }
    }
}
