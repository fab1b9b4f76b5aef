//! Supervisor metrics.
//!
//! All collectors live in a dedicated [`Registry`] so the debug router can
//! expose them without touching the process-global default registry.

use crate::cache::CacheSnapshot;
use crate::cache::SyncState;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::fmt;

/// Prometheus collectors for caches, controllers and status publication.
#[derive(Clone)]
pub struct SupervisorMetrics {
    registry: Registry,
    cache_synced: IntGaugeVec,
    controller_running: IntGaugeVec,
    controller_syncs: IntCounterVec,
    status_publishes: IntCounterVec,
}

impl fmt::Debug for SupervisorMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorMetrics").finish_non_exhaustive()
    }
}

impl SupervisorMetrics {
    /// Creates and registers every collector.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("operator".to_string()), None)?;

        let cache_synced = IntGaugeVec::new(
            Opts::new("cache_synced", "Whether a shared cache completed its initial list"),
            &["kind", "scope"],
        )?;
        let controller_running = IntGaugeVec::new(
            Opts::new("controller_running", "Whether a supervised controller is running"),
            &["controller"],
        )?;
        let controller_syncs = IntCounterVec::new(
            Opts::new("controller_syncs_total", "Sync passes per controller by result"),
            &["controller", "result"],
        )?;
        let status_publishes = IntCounterVec::new(
            Opts::new("status_publishes_total", "Aggregated status publications by result"),
            &["result"],
        )?;

        registry.register(Box::new(cache_synced.clone()))?;
        registry.register(Box::new(controller_running.clone()))?;
        registry.register(Box::new(controller_syncs.clone()))?;
        registry.register(Box::new(status_publishes.clone()))?;

        Ok(Self {
            registry,
            cache_synced,
            controller_running,
            controller_syncs,
            status_publishes,
        })
    }

    /// Records the sync state of every cache.
    pub fn observe_caches(&self, caches: &[CacheSnapshot]) {
        for cache in caches {
            let scope = cache.scope.to_string();
            self.cache_synced
                .with_label_values(&[cache.kind.as_str(), scope.as_str()])
                .set(i64::from(cache.state == SyncState::Synced));
        }
    }

    /// Records whether a controller is running.
    pub fn set_running(&self, controller: &str, running: bool) {
        self.controller_running
            .with_label_values(&[controller])
            .set(i64::from(running));
    }

    /// Counts one sync pass.
    pub fn record_sync(&self, controller: &str, ok: bool) {
        let result = if ok { "success" } else { "error" };
        self.controller_syncs
            .with_label_values(&[controller, result])
            .inc();
    }

    /// Counts one status publication.
    pub fn record_publish(&self, ok: bool) {
        let result = if ok { "success" } else { "error" };
        self.status_publishes.with_label_values(&[result]).inc();
    }

    /// Sync passes counted for a controller and result.
    pub fn sync_count(&self, controller: &str, ok: bool) -> u64 {
        let result = if ok { "success" } else { "error" };
        self.controller_syncs
            .with_label_values(&[controller, result])
            .get()
    }

    /// Prometheus text exposition of every collector.
    pub fn encode(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
