//! HTTP control surface for Shipwright.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use peerfleet_common::PeerFleetError;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod health;
mod peers;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health::health_check))

        // Fleet
        .route("/topology", get(peers::get_topology))
        .route("/peers/{index}", get(peers::get_peer).delete(peers::decommission_peer))
        .route("/peers/{index}/probe", post(peers::record_probe))

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fleet errors rendered as JSON with their status code
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] PeerFleetError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::lifecycle::LifecycleTracker;
    use crate::provisioner::{Collaborators, Provisioner};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use peerfleet_common::HealthCheck;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app(peers: u32) -> Router {
        let config = AppConfig::default();
        let tracker = Arc::new(LifecycleTracker::new(HealthCheck::default()));
        let collaborators = Collaborators::in_memory(&config, tracker.clone());
        let provisioner = Provisioner::new(config, collaborators, tracker).unwrap();
        create_router(AppState::new(provisioner, peers).await.unwrap())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn probe(index: u32, healthy: bool, elapsed_secs: u64) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/peers/{}/probe", index))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "healthy": healthy, "elapsed_secs": elapsed_secs }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(0).await;
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_topology_lists_every_peer() {
        let app = app(3).await;
        let (status, body) = send(&app, get("/topology")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["peers"].as_array().unwrap().len(), 3);
        assert_eq!(body["peers"][2]["discovery"]["name"], "peer-2");
    }

    #[tokio::test]
    async fn test_unknown_peer_is_404() {
        let app = app(1).await;
        let (status, body) = send(&app, get("/peers/7")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn test_failed_probes_degrade_peer() {
        let app = app(2).await;

        for secs in [63, 123, 183] {
            let (status, _) = send(&app, probe(1, false, secs)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, peer) = send(&app, get("/peers/1")).await;
        assert_eq!(peer["status"]["state"], "DEGRADED");
        assert_eq!(peer["partitions"][0]["path"], "/node1");

        let (_, other) = send(&app, get("/peers/0")).await;
        assert_eq!(other["status"]["state"], "DISCOVERABLE");

        let (_, recovered) = send(&app, probe(1, true, 243)).await;
        assert_eq!(recovered["state"], "DISCOVERABLE");
    }

    #[tokio::test]
    async fn test_decommission_then_probe_rejected() {
        let app = app(2).await;
        let (status, record) = send(&app, delete("/peers/0")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["stopped"], true);

        let (_, peer) = send(&app, get("/peers/0")).await;
        assert_eq!(peer["status"]["state"], "TERMINATED");

        // A terminated unit has no node process to probe
        let (status, _) = send(&app, probe(0, false, 100)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_decommission_clears_launch_from_topology() {
        let app = app(2).await;
        let (_, before) = send(&app, get("/topology")).await;
        assert_eq!(before["peers"][1]["launch"]["service_name"], "peer-1-service");

        let (status, _) = send(&app, delete("/peers/1?purge_storage=true")).await;
        assert_eq!(status, StatusCode::OK);

        let (_, after) = send(&app, get("/topology")).await;
        let peer = &after["peers"][1];
        assert!(peer.get("launch").is_none());
        assert_eq!(peer["decommissioned"]["deregistered"], true);
        assert_eq!(peer["decommissioned"]["partitions_released"], 2);
        assert!(after["peers"][0].get("decommissioned").is_none());

        // Nothing left to remove
        let (status, _) = send(&app, delete("/peers/1?purge_storage=true")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
