//! Status aggregation.
//!
//! Every controller reports a [`ControllerHealth`] made of optional condition
//! fragments. [`aggregate`] unions the fragments of all controllers with the
//! current versions and the fixed related-object list into one
//! [`AggregatedStatus`]; [`StatusSync`] recomputes and publishes it whenever
//! any input changes.
//!
//! Union rules:
//! - `Degraded` / `Progressing` are True if any fragment is True
//! - `Available` / `Upgradeable` are False if any fragment is False

use crate::error::ControllerError;
use crate::queue::SyncHandler;
use crate::version::{VersionGetter, VersionRecorder};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Reason used for conditions in their expected state.
pub const REASON_AS_EXPECTED: &str = "AsExpected";

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Condition could not be determined
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Aggregated condition types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ConditionType {
    /// The component is functional
    Available,
    /// The component is moving towards a new desired state
    Progressing,
    /// The component is not in its desired state and needs attention
    Degraded,
    /// The component can be upgraded
    Upgradeable,
}

impl ConditionType {
    /// All aggregated condition types, in publication order.
    pub const ALL: [ConditionType; 4] = [
        ConditionType::Available,
        ConditionType::Progressing,
        ConditionType::Degraded,
        ConditionType::Upgradeable,
    ];

    /// Fragment value that marks the condition as unhealthy.
    fn unhealthy_when(self) -> bool {
        matches!(self, ConditionType::Degraded | ConditionType::Progressing)
    }

    /// Condition type name.
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::Available => "Available",
            ConditionType::Progressing => "Progressing",
            ConditionType::Degraded => "Degraded",
            ConditionType::Upgradeable => "Upgradeable",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One controller's contribution to a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthFragment {
    /// Value of the condition as seen by the controller
    pub status: bool,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl HealthFragment {
    /// Creates a fragment.
    pub fn new(status: bool, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Health reported by one controller. Absent fragments do not contribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerHealth {
    /// Available fragment
    pub available: Option<HealthFragment>,
    /// Progressing fragment
    pub progressing: Option<HealthFragment>,
    /// Degraded fragment
    pub degraded: Option<HealthFragment>,
    /// Upgradeable fragment
    pub upgradeable: Option<HealthFragment>,
}

impl ControllerHealth {
    /// Not degraded; contributes nothing else.
    pub fn healthy() -> Self {
        Self {
            degraded: Some(HealthFragment::new(false, REASON_AS_EXPECTED, "")),
            ..Self::default()
        }
    }

    /// Degraded with the given reason and message.
    pub fn degraded(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            degraded: Some(HealthFragment::new(true, reason, message)),
            ..Self::default()
        }
    }

    /// Health recorded for a controller whose run loop ended.
    pub fn stopped(message: impl Into<String>) -> Self {
        Self::degraded("ControllerStopped", message)
    }

    /// Sets the Available fragment.
    #[must_use]
    pub fn with_available(
        mut self,
        status: bool,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        self.available = Some(HealthFragment::new(status, reason, message));
        self
    }

    /// Sets the Progressing fragment.
    #[must_use]
    pub fn with_progressing(
        mut self,
        status: bool,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        self.progressing = Some(HealthFragment::new(status, reason, message));
        self
    }

    /// Sets the Upgradeable fragment.
    #[must_use]
    pub fn with_upgradeable(
        mut self,
        status: bool,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        self.upgradeable = Some(HealthFragment::new(status, reason, message));
        self
    }

    fn fragment(&self, condition: ConditionType) -> Option<&HealthFragment> {
        match condition {
            ConditionType::Available => self.available.as_ref(),
            ConditionType::Progressing => self.progressing.as_ref(),
            ConditionType::Degraded => self.degraded.as_ref(),
            ConditionType::Upgradeable => self.upgradeable.as_ref(),
        }
    }
}

/// Last reported health of every controller.
#[derive(Debug, Clone)]
pub struct HealthBoard {
    health: Arc<watch::Sender<BTreeMap<String, ControllerHealth>>>,
}

impl Default for HealthBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthBoard {
    /// Creates an empty board.
    pub fn new() -> Self {
        let (health, _) = watch::channel(BTreeMap::new());
        Self {
            health: Arc::new(health),
        }
    }

    /// Replaces a controller's health. Subscribers are only notified on change.
    pub fn report(&self, controller: &str, health: ControllerHealth) {
        self.health.send_if_modified(|board| {
            if board.get(controller) == Some(&health) {
                return false;
            }
            board.insert(controller.to_string(), health);
            true
        });
    }

    /// Last reported health of a controller.
    pub fn get(&self, controller: &str) -> Option<ControllerHealth> {
        self.health.borrow().get(controller).cloned()
    }

    /// Snapshot of every controller's health.
    pub fn snapshot(&self) -> BTreeMap<String, ControllerHealth> {
        self.health.borrow().clone()
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<BTreeMap<String, ControllerHealth>> {
        self.health.subscribe()
    }
}

/// An object the component manages, listed in the published status.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RelatedObject {
    /// API group, empty for the core group
    pub group: String,
    /// Plural resource name
    pub resource: String,
    /// Namespace, empty for cluster-scoped objects
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl RelatedObject {
    /// A namespace owned by the component.
    pub fn namespace(name: impl Into<String>) -> Self {
        Self {
            group: String::new(),
            resource: "namespaces".to_string(),
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// A cluster-scoped object.
    pub fn cluster(
        group: impl Into<String>,
        resource: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
            namespace: String::new(),
            name: name.into(),
        }
    }
}

/// One aggregated condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorCondition {
    /// Condition type
    pub condition_type: ConditionType,
    /// Condition status
    pub status: ConditionStatus,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

/// Version of one operand or of the operator itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperandVersion {
    /// Component name
    pub name: String,
    /// Version string
    pub version: String,
}

/// The single status record published for the component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedStatus {
    /// Available, Progressing, Degraded, Upgradeable in that order
    pub conditions: Vec<OperatorCondition>,
    /// Versions sorted by component name
    pub versions: Vec<OperandVersion>,
    /// Objects the component manages
    pub related_objects: Vec<RelatedObject>,
}

impl AggregatedStatus {
    /// Looks up a condition by type.
    pub fn condition(&self, condition_type: ConditionType) -> Option<&OperatorCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Whether the condition has the given status.
    pub fn is(&self, condition_type: ConditionType, status: ConditionStatus) -> bool {
        self.condition(condition_type).is_some_and(|c| c.status == status)
    }
}

/// `config-observer` → `ConfigObserver`.
fn camel_case(name: &str) -> String {
    name.split(|c: char| c == '-' || c == '_' || c == '.')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect()
}

fn union_condition(
    condition_type: ConditionType,
    health: &BTreeMap<String, ControllerHealth>,
) -> OperatorCondition {
    let bad_value = condition_type.unhealthy_when();
    let mut reasons = Vec::new();
    let mut messages = Vec::new();

    for (controller, controller_health) in health {
        let Some(fragment) = controller_health.fragment(condition_type) else {
            continue;
        };
        if fragment.status != bad_value {
            continue;
        }
        let source = format!("{}{}", camel_case(controller), condition_type);
        if fragment.message.is_empty() {
            messages.push(format!("{source}: {}", fragment.reason));
        } else {
            messages.push(format!("{source}: {}: {}", fragment.reason, fragment.message));
        }
        reasons.push(source);
    }

    if reasons.is_empty() {
        return OperatorCondition {
            condition_type,
            status: ConditionStatus::from(!bad_value),
            reason: REASON_AS_EXPECTED.to_string(),
            message: String::new(),
        };
    }

    reasons.sort();
    messages.sort();
    OperatorCondition {
        condition_type,
        status: ConditionStatus::from(bad_value),
        reason: reasons.join("_"),
        message: messages.join("\n"),
    }
}

/// Computes the aggregated status. Pure and deterministic.
pub fn aggregate(
    health: &BTreeMap<String, ControllerHealth>,
    versions: &BTreeMap<String, String>,
    related: &[RelatedObject],
) -> AggregatedStatus {
    AggregatedStatus {
        conditions: ConditionType::ALL
            .iter()
            .map(|&condition_type| union_condition(condition_type, health))
            .collect(),
        versions: versions
            .iter()
            .filter(|(_, version)| !version.is_empty())
            .map(|(name, version)| OperandVersion {
                name: name.clone(),
                version: version.clone(),
            })
            .collect(),
        related_objects: related.to_vec(),
    }
}

/// Writes the aggregated status to the external status store.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publishes one complete status record. Must be idempotent.
    async fn publish(&self, status: &AggregatedStatus) -> Result<(), ControllerError>;
}

/// Sync handler that recomputes and publishes the aggregated status.
pub struct StatusSync {
    health: HealthBoard,
    versions: VersionGetter,
    related: Vec<RelatedObject>,
    publisher: Arc<dyn StatusPublisher>,
}

impl fmt::Debug for StatusSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSync")
            .field("related", &self.related)
            .finish_non_exhaustive()
    }
}

impl StatusSync {
    /// Creates a status sync over the given inputs.
    pub fn new(
        health: HealthBoard,
        versions: VersionGetter,
        related: Vec<RelatedObject>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            health,
            versions,
            related,
            publisher,
        }
    }

    /// Computes the status from one snapshot of health and one of versions.
    pub fn compute(&self) -> AggregatedStatus {
        let health = self.health.snapshot();
        let versions = self.versions.all_versions();
        aggregate(&health, &versions, &self.related)
    }
}

#[async_trait]
impl SyncHandler for StatusSync {
    async fn sync(&self, _key: &str) -> Result<ControllerHealth, ControllerError> {
        let status = self.compute();
        debug!(
            degraded = status.is(ConditionType::Degraded, ConditionStatus::True),
            versions = status.versions.len(),
            "publishing aggregated status"
        );
        self.publisher.publish(&status).await?;
        Ok(ControllerHealth::healthy())
    }
}
