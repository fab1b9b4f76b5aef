//! Revision prune controller
//!
//! Deletes encryption config snapshots that fell out of the retained window.

use super::{OperatorContext, delete_if_present};
use crate::caches;
use crate::names::{ENCRYPTION_CONFIG_REVISION_PREFIX, TARGET_NAMESPACE};
use async_trait::async_trait;
use crds::{OPERATOR_CONFIG_NAME, OpenShiftAPIServer};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use operator_runtime::{
    Controller, ControllerError, ControllerHealth, ControllerSpec, KubeCache, SyncHandler,
};
use std::sync::Arc;
use tracing::info;

/// Controller name.
pub const NAME: &str = "prune";

/// Number of revisions kept, the latest included.
pub const RETAINED_REVISIONS: i32 = 5;

/// Snapshot names below the retained window, in ascending revision order.
pub fn prunable<'a>(
    names: impl IntoIterator<Item = &'a str>,
    latest: i32,
    retained: i32,
) -> Vec<String> {
    let oldest_kept = latest - retained + 1;
    let mut revisions: Vec<(i32, &str)> = names
        .into_iter()
        .filter_map(|name| {
            let revision = name
                .strip_prefix(ENCRYPTION_CONFIG_REVISION_PREFIX)?
                .parse::<i32>()
                .ok()?;
            (revision < oldest_kept).then_some((revision, name))
        })
        .collect();
    revisions.sort_unstable();
    revisions.into_iter().map(|(_, name)| name.to_string()).collect()
}

/// Sync handler deleting old snapshots.
pub struct Prune {
    config: Arc<KubeCache<OpenShiftAPIServer>>,
    secrets: Arc<KubeCache<Secret>>,
    client: Client,
}

#[async_trait]
impl SyncHandler for Prune {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        let Some(config) = self.config.get(OPERATOR_CONFIG_NAME) else {
            return Ok(ControllerHealth::healthy());
        };
        let secrets = self.secrets.list();
        let names = secrets.iter().map(|secret| secret.name_any()).collect::<Vec<_>>();
        let stale = prunable(
            names.iter().map(String::as_str),
            config.latest_available_revision(),
            RETAINED_REVISIONS,
        );

        let api: Api<Secret> = Api::namespaced(self.client.clone(), TARGET_NAMESPACE);
        for name in stale {
            if delete_if_present(&api, &name).await? {
                info!(secret = %name, "pruned revision");
            }
        }
        Ok(ControllerHealth::healthy())
    }
}

/// Declares the controller.
pub fn spec(ctx: &OperatorContext) -> ControllerSpec {
    let ctx = ctx.clone();
    ControllerSpec::new(NAME, move |wiring| {
        let config = wiring.cache::<KubeCache<OpenShiftAPIServer>>(&caches::operator_config())?;
        let secrets = wiring.cache::<KubeCache<Secret>>(&caches::secrets(TARGET_NAMESPACE))?;

        let controller = ctx
            .queue(NAME, Prune {
                config: Arc::clone(&config),
                secrets: Arc::clone(&secrets),
                client: ctx.client.clone(),
            })
            .watch_cache(config.as_ref())
            .watch_cache(secrets.as_ref());
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .cache(caches::secrets(TARGET_NAMESPACE))
    .cache(caches::operator_config())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::client_answering_deletes;
    use axum::http::StatusCode;
    use crds::{OpenShiftAPIServerSpec, OpenShiftAPIServerStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use operator_runtime::Scope;

    fn revision(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(TARGET_NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn handler(client: Client, latest: i32, names: &[&str]) -> Prune {
        let mut config =
            OpenShiftAPIServer::new(OPERATOR_CONFIG_NAME, OpenShiftAPIServerSpec::default());
        config.status = Some(OpenShiftAPIServerStatus {
            latest_available_revision: latest,
            ..Default::default()
        });
        Prune {
            config: Arc::new(KubeCache::preloaded(
                Api::all(client.clone()),
                Scope::Cluster,
                [config],
            )),
            secrets: Arc::new(KubeCache::preloaded(
                Api::namespaced(client.clone(), TARGET_NAMESPACE),
                Scope::Namespace(TARGET_NAMESPACE.to_string()),
                names.iter().map(|name| revision(name)),
            )),
            client,
        }
    }

    #[tokio::test]
    async fn test_already_deleted_revisions_are_not_an_error() {
        let (client, requests) = client_answering_deletes(StatusCode::NOT_FOUND);
        let prune = handler(
            client,
            10,
            &["encryption-config-1", "encryption-config-2", "encryption-config-10"],
        );

        let health = prune.sync(operator_runtime::DEFAULT_KEY).await.expect("sync");
        assert_eq!(health, ControllerHealth::healthy());
        assert_eq!(
            requests.deletes(),
            vec![
                "/api/v1/namespaces/openshift-apiserver/secrets/encryption-config-1",
                "/api/v1/namespaces/openshift-apiserver/secrets/encryption-config-2",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_failure_fails_the_pass() {
        let (client, _) = client_answering_deletes(StatusCode::FORBIDDEN);
        let prune = handler(client, 10, &["encryption-config-1"]);
        assert!(prune.sync(operator_runtime::DEFAULT_KEY).await.is_err());
    }

    #[test]
    fn test_keeps_retained_window() {
        let names = [
            "encryption-config",
            "encryption-config-1",
            "encryption-config-2",
            "encryption-config-10",
            "encryption-config-6",
            "encryption-config-7",
            "serving-cert",
        ];
        assert_eq!(
            prunable(names, 10, 5),
            vec!["encryption-config-1", "encryption-config-2"]
        );
    }

    #[test]
    fn test_nothing_to_prune_early_on() {
        assert!(prunable(["encryption-config-1", "encryption-config-2"], 2, 5).is_empty());
    }

    #[test]
    fn test_ignores_malformed_suffixes() {
        assert!(prunable(["encryption-config-abc", "encryption-config-"], 20, 5).is_empty());
    }
}
