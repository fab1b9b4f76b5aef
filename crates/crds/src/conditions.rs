//! Status conditions shared by the operator configuration and the
//! ClusterOperator record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status values.
pub const CONDITION_TRUE: &str = "True";
/// Condition status values.
pub const CONDITION_FALSE: &str = "False";
/// Condition status values.
pub const CONDITION_UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    /// Condition type, e.g. `Degraded`
    #[serde(rename = "type")]
    pub condition_type: String,

    /// `True`, `False` or `Unknown`
    pub status: String,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusCondition {
    /// Creates a condition without a transition time.
    pub fn new(condition_type: &str, status: &str, reason: &str, message: &str) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: status.to_string(),
            last_transition_time: None,
            reason: (!reason.is_empty()).then(|| reason.to_string()),
            message: (!message.is_empty()).then(|| message.to_string()),
        }
    }

    /// Whether everything but the transition time matches.
    pub fn same_as(&self, other: &StatusCondition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Inserts or replaces `condition` by type.
///
/// The previous transition time is kept when the status did not change,
/// otherwise it is set to `now`.
pub fn set_condition(
    conditions: &mut Vec<StatusCondition>,
    mut condition: StatusCondition,
    now: DateTime<Utc>,
) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.or(Some(now))
            } else {
                Some(now)
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
        }
    }
}

/// Looks up a condition by type.
pub fn find_condition<'a>(
    conditions: &'a [StatusCondition],
    condition_type: &str,
) -> Option<&'a StatusCondition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}
