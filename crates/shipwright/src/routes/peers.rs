//! Topology and per-peer endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use peerfleet_common::{PeerFleetError, PeerIndex};
use serde::Deserialize;
use std::time::Duration;

use super::ApiError;
use crate::lifecycle::{ProbeObservation, ProbeOutcome};
use crate::manifest::{FleetManifest, PeerManifest};
use crate::provisioner::Decommissioned;
use crate::state::AppState;

/// Full fleet manifest with current lifecycle states
pub async fn get_topology(State(state): State<AppState>) -> Json<FleetManifest> {
    Json(state.manifest().await)
}

pub async fn get_peer(
    State(state): State<AppState>,
    Path(index): Path<u32>,
) -> Result<Json<PeerManifest>, ApiError> {
    let manifest = state.manifest().await;
    manifest
        .peer(PeerIndex::new(index))
        .cloned()
        .map(Json)
        .ok_or_else(|| PeerFleetError::PeerNotFound(index).into())
}

#[derive(Debug, Deserialize)]
pub struct ProbeRequest {
    healthy: bool,
    /// Seconds since the node process started
    elapsed_secs: u64,
}

/// Record a liveness probe result reported by the platform
pub async fn record_probe(
    State(state): State<AppState>,
    Path(index): Path<u32>,
    Json(probe): Json<ProbeRequest>,
) -> Result<Json<ProbeOutcome>, ApiError> {
    let index = PeerIndex::new(index);
    tracing::debug!(
        peer = %index,
        healthy = probe.healthy,
        elapsed_secs = probe.elapsed_secs,
        "Probe reported"
    );

    let outcome = state
        .tracker()
        .record_probe(
            index,
            ProbeObservation {
                healthy: probe.healthy,
                elapsed: Duration::from_secs(probe.elapsed_secs),
            },
        )
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Default, Deserialize)]
pub struct DecommissionParams {
    #[serde(default)]
    purge_storage: bool,
}

/// Stop a peer and remove its discovery name; storage survives unless
/// `?purge_storage=true`
pub async fn decommission_peer(
    State(state): State<AppState>,
    Path(index): Path<u32>,
    Query(params): Query<DecommissionParams>,
) -> Result<Json<Decommissioned>, ApiError> {
    let record = state
        .decommission(PeerIndex::new(index), params.purge_storage)
        .await?;
    Ok(Json(record))
}
