//! Debug and introspection endpoints.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /debug/controllers/caches` | kind, scope, sync state and pending items per cache |
//! | `GET /debug/controllers` | lifecycle state per controller |
//! | `GET /metrics` | Prometheus text exposition |
//! | `GET /healthz` | always 200 |
//! | `GET /readyz` | 200 once every cache has synced, 503 before |
//!
//! The router is optional: the supervisor never depends on it.

use crate::cache::{CacheLayer, CacheSnapshot, SyncState};
use crate::controller::{ControllerState, LifecycleBoard};
use crate::metrics::SupervisorMetrics;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// State shared by the debug handlers.
#[derive(Debug, Clone)]
pub struct DebugState {
    caches: Arc<CacheLayer>,
    lifecycle: LifecycleBoard,
    metrics: Option<SupervisorMetrics>,
}

impl DebugState {
    /// Creates the handler state.
    pub fn new(caches: Arc<CacheLayer>, lifecycle: LifecycleBoard) -> Self {
        Self {
            caches,
            lifecycle,
            metrics: None,
        }
    }

    /// Serves `metrics` on `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: SupervisorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[derive(Debug, Serialize)]
struct CachesResponse {
    caches: Vec<CacheSnapshot>,
}

#[derive(Debug, Serialize)]
struct ControllersResponse {
    controllers: BTreeMap<String, ControllerState>,
}

/// Builds the introspection router.
pub fn debug_router(state: DebugState) -> Router {
    Router::new()
        .route("/debug/controllers/caches", get(caches))
        .route("/debug/controllers", get(controllers))
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn caches(State(state): State<DebugState>) -> Json<CachesResponse> {
    Json(CachesResponse {
        caches: state.caches.snapshot(),
    })
}

async fn controllers(State(state): State<DebugState>) -> Json<ControllersResponse> {
    Json(ControllersResponse {
        controllers: state.lifecycle.states(),
    })
}

async fn metrics(State(state): State<DebugState>) -> Response {
    let Some(metrics) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    metrics.observe_caches(&state.caches.snapshot());
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<DebugState>) -> StatusCode {
    let snapshot = state.caches.snapshot();
    if snapshot.iter().all(|cache| cache.state == SyncState::Synced) {
        StatusCode::OK
    } else {
        debug!(
            unsynced = snapshot.iter().filter(|c| c.state != SyncState::Synced).count(),
            "readiness probe: caches not synced"
        );
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Serves `router` on `addr` until `cancel` fires.
pub async fn serve(
    router: Router,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "debug server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheKey};
    use crate::testing::MockCache;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> (DebugState, Arc<MockCache>) {
        let mut layer = CacheLayer::new();
        let key = CacheKey::namespaced("Secret", "openshift-apiserver");
        let cache = layer
            .register(key.clone(), || MockCache::never_syncs(key.clone()))
            .expect("cache");
        let lifecycle = LifecycleBoard::new();
        lifecycle.register("workload");
        let metrics = SupervisorMetrics::new().expect("metrics");
        (
            DebugState::new(Arc::new(layer), lifecycle).with_metrics(metrics),
            cache,
        )
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_caches_route_lists_sync_state() {
        let (state, _cache) = state();
        let (status, body) = get(debug_router(state), "/debug/controllers/caches").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert_eq!(json["caches"][0]["kind"], "Secret");
        assert_eq!(json["caches"][0]["state"], "notStarted");
        assert_eq!(json["caches"][0]["pending"], 0);
    }

    #[tokio::test]
    async fn test_controllers_route() {
        let (state, _cache) = state();
        let (status, body) = get(debug_router(state), "/debug/controllers").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert_eq!(json["controllers"]["workload"], "constructed");
    }

    #[tokio::test]
    async fn test_readyz_follows_cache_sync() {
        let (state, cache) = state();
        let router = debug_router(state);
        let (status, _) = get(router.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        cache.start(CancellationToken::new());
        cache.mark_synced();
        let (status, _) = get(router.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = get(router, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("operator_cache_synced"));
    }

    #[tokio::test]
    async fn test_healthz() {
        let (state, _cache) = state();
        let (status, _) = get(debug_router(state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
    }
}
