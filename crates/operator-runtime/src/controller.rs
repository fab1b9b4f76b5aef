//! Controller contract and lifecycle tracking.

use crate::error::ControllerError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// An independently running reconciliation unit.
///
/// `run` must return promptly once `cancel` fires. Returning before that is
/// treated as the controller stopping for good; the supervisor never restarts it.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Runs the controller with `workers` parallel reconciliation workers.
    async fn run(&self, cancel: CancellationToken, workers: usize) -> Result<(), ControllerError>;
}

/// Lifecycle of a supervised controller. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControllerState {
    /// Built during wiring
    Constructed,
    /// Its caches synced and its task was spawned
    Started,
    /// Its task is executing `run`
    Running,
    /// `run` returned, panicked, or was aborted
    Stopped,
}

/// Lifecycle record of one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEntry {
    /// Current state
    pub state: ControllerState,
    /// When the controller entered `Started`
    pub started_at: Option<Instant>,
    /// When the controller entered `Stopped`
    pub stopped_at: Option<Instant>,
}

/// Shared view of every controller's lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct LifecycleBoard {
    entries: Arc<RwLock<BTreeMap<String, LifecycleEntry>>>,
}

impl LifecycleBoard {
    /// Creates an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a controller as `Constructed`.
    pub fn register(&self, name: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(name.to_string()).or_insert(LifecycleEntry {
            state: ControllerState::Constructed,
            started_at: None,
            stopped_at: None,
        });
    }

    /// Moves a controller forward to `state`. Backward or repeated moves are ignored.
    pub fn transition(&self, name: &str, state: ControllerState) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(name) else {
            warn!(controller = name, ?state, "transition for unknown controller");
            return false;
        };
        if state <= entry.state {
            return false;
        }
        let now = Instant::now();
        if state != ControllerState::Stopped && entry.started_at.is_none() {
            entry.started_at = Some(now);
        }
        if state == ControllerState::Stopped {
            entry.stopped_at = Some(now);
        }
        entry.state = state;
        true
    }

    /// Current state of a controller.
    pub fn state(&self, name: &str) -> Option<ControllerState> {
        self.entry(name).map(|entry| entry.state)
    }

    /// Full lifecycle record of a controller.
    pub fn entry(&self, name: &str) -> Option<LifecycleEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).cloned()
    }

    /// State of every controller.
    pub fn states(&self) -> BTreeMap<String, ControllerState> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect()
    }

    /// Names of controllers that have not reached `Stopped`.
    pub fn not_stopped(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|(_, entry)| entry.state != ControllerState::Stopped)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
