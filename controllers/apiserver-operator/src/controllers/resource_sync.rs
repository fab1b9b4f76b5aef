//! Resource sync controller
//!
//! Copies ConfigMaps and Secrets between namespaces according to a shared
//! rule set. Other controllers add rules through the [`ResourceSyncRules`]
//! artifact this controller publishes at wiring time. A rule without a source
//! deletes its destination.

use super::{OperatorContext, delete_if_present};
use crate::caches;
use crate::caches::SYNCED_NAMESPACES;
use crate::names::FIELD_MANAGER;
use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use operator_runtime::{
    Controller, ControllerError, ControllerHealth, ControllerSpec, KubeCache, SyncHandler,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Controller name.
pub const NAME: &str = "resource-sync";

/// Kind of a synced resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ResourceKind {
    /// `v1/ConfigMap`
    ConfigMap,
    /// `v1/Secret`
    Secret,
}

/// Namespace and name of a synced resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceLocation {
    /// Namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ResourceLocation {
    /// Location of `name` in `namespace`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One sync rule as shown on the debug endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRule {
    /// Kind of both objects
    pub kind: ResourceKind,
    /// Object kept in sync
    pub destination: ResourceLocation,
    /// `None` deletes the destination
    pub source: Option<ResourceLocation>,
}

type RuleMap = BTreeMap<(ResourceKind, ResourceLocation), Option<ResourceLocation>>;

/// Shared, observable set of sync rules.
#[derive(Debug)]
pub struct ResourceSyncRules {
    rules: watch::Sender<RuleMap>,
}

impl Default for ResourceSyncRules {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSyncRules {
    /// Empty rule set.
    pub fn new() -> Self {
        Self {
            rules: watch::Sender::new(RuleMap::new()),
        }
    }

    /// Keeps `destination` a copy of `source`.
    pub fn sync_config_map(&self, destination: ResourceLocation, source: ResourceLocation) {
        self.set(ResourceKind::ConfigMap, destination, Some(source));
    }

    /// Keeps `destination` a copy of `source`.
    pub fn sync_secret(&self, destination: ResourceLocation, source: ResourceLocation) {
        self.set(ResourceKind::Secret, destination, Some(source));
    }

    /// Makes sure `destination` does not exist.
    pub fn delete_config_map(&self, destination: ResourceLocation) {
        self.set(ResourceKind::ConfigMap, destination, None);
    }

    /// Makes sure `destination` does not exist.
    pub fn delete_secret(&self, destination: ResourceLocation) {
        self.set(ResourceKind::Secret, destination, None);
    }

    fn set(
        &self,
        kind: ResourceKind,
        destination: ResourceLocation,
        source: Option<ResourceLocation>,
    ) {
        let changed = self.rules.send_if_modified(|rules| {
            let key = (kind, destination.clone());
            if rules.get(&key) == Some(&source) {
                return false;
            }
            rules.insert(key, source.clone());
            true
        });
        if changed {
            debug!(
                ?kind,
                %destination,
                source = ?source.as_ref().map(ToString::to_string),
                "sync rule updated"
            );
        }
    }

    /// Current rules, ordered by kind and destination.
    pub fn rules(&self) -> Vec<SyncRule> {
        self.rules
            .borrow()
            .iter()
            .map(|((kind, destination), source)| SyncRule {
                kind: *kind,
                destination: destination.clone(),
                source: source.clone(),
            })
            .collect()
    }

    /// Fires whenever a rule changes.
    pub fn subscribe(&self) -> watch::Receiver<RuleMap> {
        self.rules.subscribe()
    }
}

/// What to do with one destination.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction<K> {
    /// Write this object
    Apply(K),
    /// Delete the destination
    Delete,
    /// Nothing to do
    Unchanged,
}

fn destination_meta(destination: &ResourceLocation) -> ObjectMeta {
    ObjectMeta {
        name: Some(destination.name.clone()),
        namespace: Some(destination.namespace.clone()),
        ..Default::default()
    }
}

/// Plans a ConfigMap copy from the cached source and destination.
pub fn plan_config_map(
    destination: &ResourceLocation,
    source: Option<&ConfigMap>,
    current: Option<&ConfigMap>,
) -> SyncAction<ConfigMap> {
    let Some(source) = source else {
        return match current {
            Some(_) => SyncAction::Delete,
            None => SyncAction::Unchanged,
        };
    };
    if let Some(current) = current
        && current.data == source.data
        && current.binary_data == source.binary_data
    {
        return SyncAction::Unchanged;
    }
    SyncAction::Apply(ConfigMap {
        metadata: destination_meta(destination),
        data: source.data.clone(),
        binary_data: source.binary_data.clone(),
        ..Default::default()
    })
}

/// Plans a Secret copy from the cached source and destination.
pub fn plan_secret(
    destination: &ResourceLocation,
    source: Option<&Secret>,
    current: Option<&Secret>,
) -> SyncAction<Secret> {
    let Some(source) = source else {
        return match current {
            Some(_) => SyncAction::Delete,
            None => SyncAction::Unchanged,
        };
    };
    if let Some(current) = current
        && current.data == source.data
        && current.type_ == source.type_
    {
        return SyncAction::Unchanged;
    }
    SyncAction::Apply(Secret {
        metadata: destination_meta(destination),
        data: source.data.clone(),
        type_: source.type_.clone(),
        ..Default::default()
    })
}

/// Sync handler applying every rule.
pub struct ResourceSync {
    rules: Arc<ResourceSyncRules>,
    config_maps: BTreeMap<String, Arc<KubeCache<ConfigMap>>>,
    secrets: BTreeMap<String, Arc<KubeCache<Secret>>>,
    client: Client,
}

impl ResourceSync {
    fn lookup<K>(
        caches: &BTreeMap<String, Arc<KubeCache<K>>>,
        location: &ResourceLocation,
    ) -> Result<Option<Arc<K>>, ControllerError>
    where
        K: kube::Resource<DynamicType = ()>
            + Clone
            + serde::de::DeserializeOwned
            + fmt::Debug
            + Send
            + Sync
            + 'static,
    {
        caches
            .get(&location.namespace)
            .map(|cache| cache.get(&location.name))
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "namespace {} is not cached",
                    location.namespace
                ))
            })
    }

    async fn sync_config_map(&self, rule: &SyncRule) -> Result<(), ControllerError> {
        let source = match &rule.source {
            Some(source) => Self::lookup(&self.config_maps, source)?,
            None => None,
        };
        let current = Self::lookup(&self.config_maps, &rule.destination)?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &rule.destination.namespace);
        match plan_config_map(&rule.destination, source.as_deref(), current.as_deref()) {
            SyncAction::Apply(object) => {
                info!(destination = %rule.destination, "applying ConfigMap");
                api.patch(
                    &rule.destination.name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&object),
                )
                .await?;
            }
            SyncAction::Delete => {
                if delete_if_present(&api, &rule.destination.name).await? {
                    info!(destination = %rule.destination, "deleted ConfigMap");
                }
            }
            SyncAction::Unchanged => {}
        }
        Ok(())
    }

    async fn sync_secret(&self, rule: &SyncRule) -> Result<(), ControllerError> {
        let source = match &rule.source {
            Some(source) => Self::lookup(&self.secrets, source)?,
            None => None,
        };
        let current = Self::lookup(&self.secrets, &rule.destination)?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &rule.destination.namespace);
        match plan_secret(&rule.destination, source.as_deref(), current.as_deref()) {
            SyncAction::Apply(object) => {
                info!(destination = %rule.destination, "applying Secret");
                api.patch(
                    &rule.destination.name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&object),
                )
                .await?;
            }
            SyncAction::Delete => {
                if delete_if_present(&api, &rule.destination.name).await? {
                    info!(destination = %rule.destination, "deleted Secret");
                }
            }
            SyncAction::Unchanged => {}
        }
        Ok(())
    }
}

#[async_trait]
impl SyncHandler for ResourceSync {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        let mut failures = Vec::new();
        for rule in self.rules.rules() {
            let result = match rule.kind {
                ResourceKind::ConfigMap => self.sync_config_map(&rule).await,
                ResourceKind::Secret => self.sync_secret(&rule).await,
            };
            if let Err(e) = result {
                failures.push(format!("{:?} {}: {e}", rule.kind, rule.destination));
            }
        }
        if failures.is_empty() {
            Ok(ControllerHealth::healthy())
        } else {
            Err(ControllerError::Sync(failures.join("; ")))
        }
    }
}

/// Declares the controller and publishes `rules` to dependents.
pub fn spec(ctx: &OperatorContext, rules: Arc<ResourceSyncRules>) -> ControllerSpec {
    let ctx = ctx.clone();
    let keys: Vec<_> = SYNCED_NAMESPACES
        .iter()
        .flat_map(|ns| [caches::config_maps(ns), caches::secrets(ns)])
        .collect();
    ControllerSpec::new(NAME, move |wiring| {
        let mut config_maps = BTreeMap::new();
        let mut secrets = BTreeMap::new();
        for namespace in SYNCED_NAMESPACES {
            config_maps.insert(
                namespace.to_string(),
                wiring.cache::<KubeCache<ConfigMap>>(&caches::config_maps(namespace))?,
            );
            secrets.insert(
                namespace.to_string(),
                wiring.cache::<KubeCache<Secret>>(&caches::secrets(namespace))?,
            );
        }
        wiring.publish(Arc::clone(&rules));

        let mut controller = ctx.queue(NAME, ResourceSync {
            rules: Arc::clone(&rules),
            config_maps: config_maps.clone(),
            secrets: secrets.clone(),
            client: ctx.client.clone(),
        });
        controller = controller.watch(rules.subscribe());
        for cache in config_maps.values() {
            controller = controller.watch_cache(cache.as_ref());
        }
        for cache in secrets.values() {
            controller = controller.watch_cache(cache.as_ref());
        }
        Ok(Box::new(controller) as Box<dyn Controller>)
    })
    .caches(keys)
}

/// Routes exposing the current rules at `/debug/controllers/resourcesync`.
pub fn debug_routes(rules: Arc<ResourceSyncRules>) -> Router {
    Router::new()
        .route("/debug/controllers/resourcesync", get(list_rules))
        .with_state(rules)
}

async fn list_rules(State(rules): State<Arc<ResourceSyncRules>>) -> Json<Vec<SyncRule>> {
    Json(rules.rules())
}
