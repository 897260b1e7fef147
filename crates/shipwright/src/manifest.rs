//! Fleet manifest rendering.
//!
//! The manifest is the deployable description of a provisioning run:
//! boundaries and their rules, every unit with its volumes, processes and
//! placement, plus the indices that failed.

use peerfleet_common::constants::env;
use peerfleet_common::{PeerIndex, SecurityRule, SharedSecret};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::lifecycle::{LaunchReceipt, UnitStatus};
use crate::provisioner::{BootstrapHandles, Decommissioned, FleetReport};
use crate::security::ApplyOutcome;
use crate::topology::{PeerUnit, UnitFailure};

#[derive(Debug, Clone, Serialize)]
pub struct FleetManifest {
    pub generated_at: i64,
    pub requested_peers: u32,
    pub handles: BootstrapHandles,
    pub security: SecurityManifest,
    pub peers: Vec<PeerManifest>,
    pub failures: Vec<FailureManifest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityManifest {
    pub peer_boundary: ApplyOutcome,
    pub peer_rules: Vec<SecurityRule>,
    pub storage_boundary: ApplyOutcome,
    pub storage_rules: Vec<SecurityRule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerManifest {
    #[serde(flatten)]
    pub unit: PeerUnit,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch: Option<LaunchReceipt>,
    /// Set once the unit was torn down; its discovery record and
    /// partitions may no longer exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decommissioned: Option<Decommissioned>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureManifest {
    pub index: PeerIndex,
    /// build or launch
    pub stage: &'static str,
    pub status_code: u16,
    pub error: String,
}

impl FailureManifest {
    fn new(stage: &'static str, failure: &UnitFailure) -> Self {
        Self {
            index: failure.index,
            stage,
            status_code: failure.error.status_code(),
            error: failure.error.to_string(),
        }
    }
}

/// Render a report together with the current lifecycle statuses
pub fn render(report: &FleetReport, statuses: &BTreeMap<PeerIndex, UnitStatus>) -> FleetManifest {
    let peers = report
        .topology
        .units
        .iter()
        .map(|unit| PeerManifest {
            unit: redact(unit.clone()),
            status: statuses.get(&unit.index).copied().unwrap_or_default(),
            launch: report.launched.iter().find(|r| r.index == unit.index).cloned(),
            decommissioned: report
                .decommissioned
                .iter()
                .find(|d| d.index == unit.index)
                .copied(),
        })
        .collect();

    let failures = report
        .topology
        .failures
        .iter()
        .map(|f| FailureManifest::new("build", f))
        .chain(
            report
                .launch_failures
                .iter()
                .map(|f| FailureManifest::new("launch", f)),
        )
        .collect();

    FleetManifest {
        generated_at: report.generated_at,
        requested_peers: report.requested_peers,
        handles: report.handles.clone(),
        security: SecurityManifest {
            peer_boundary: report.peer_security.clone(),
            peer_rules: report.peer_rules.clone(),
            storage_boundary: report.storage_security.clone(),
            storage_rules: report.storage_rules.clone(),
        },
        peers,
        failures,
    }
}

/// Replace secret environment values with their fingerprint
fn redact(mut unit: PeerUnit) -> PeerUnit {
    for process in [&mut unit.node, &mut unit.cluster] {
        for key in env::SECRET_KEYS {
            if let Some(value) = process.environment.get_mut(*key) {
                let secret = SharedSecret::new(value.as_str());
                *value = format!("sha256:{}", secret.fingerprint());
            }
        }
    }
    unit
}

impl FleetManifest {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn peer(&self, index: PeerIndex) -> Option<&PeerManifest> {
        self.peers.iter().find(|p| p.unit.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::lifecycle::LifecycleTracker;
    use crate::provisioner::{Collaborators, Provisioner};
    use peerfleet_common::HealthCheck;
    use std::sync::Arc;

    async fn provisioned(n: u32) -> (FleetReport, BTreeMap<PeerIndex, UnitStatus>) {
        let mut config = AppConfig::default();
        config.cluster_secret = SharedSecret::new("do-not-print-me");
        let tracker = Arc::new(LifecycleTracker::new(HealthCheck::default()));
        let collaborators = Collaborators::in_memory(&config, tracker.clone());
        let provisioner = Provisioner::new(config, collaborators, tracker.clone()).unwrap();

        let handles = provisioner.bootstrap().await.unwrap();
        let report = provisioner.provision(&handles, n).await.unwrap();
        (report, tracker.snapshot().await)
    }

    #[tokio::test]
    async fn test_manifest_never_contains_secret() {
        let (report, statuses) = provisioned(3).await;
        let manifest = render(&report, &statuses);
        let json = manifest.to_json_pretty().unwrap();

        assert!(!json.contains("do-not-print-me"));
        let expected = format!("sha256:{}", SharedSecret::new("do-not-print-me").fingerprint());
        for peer in &manifest.peers {
            assert_eq!(peer.unit.cluster.environment[env::CLUSTER_SECRET], expected);
        }
        // The report itself keeps the real value for deployment
        assert_eq!(
            report.topology.units[0].cluster.environment[env::CLUSTER_SECRET],
            "do-not-print-me"
        );
    }

    #[tokio::test]
    async fn test_manifest_lists_units_with_status() {
        let (report, statuses) = provisioned(2).await;
        let manifest = render(&report, &statuses);

        assert_eq!(manifest.peers.len(), 2);
        assert!(manifest.failures.is_empty());
        assert_eq!(manifest.security.peer_rules.len(), 7);

        let peer = manifest.peer(PeerIndex::new(1)).unwrap();
        assert_eq!(peer.status.state, peerfleet_common::PeerState::Discoverable);
        assert_eq!(peer.launch.as_ref().unwrap().service_name, "peer-1-service");

        let value: serde_json::Value = serde_json::from_str(&manifest.to_json_pretty().unwrap()).unwrap();
        assert_eq!(value["peers"][0]["task_family"], "peer-0-task");
        assert_eq!(value["peers"][0]["status"]["state"], "DISCOVERABLE");
        assert_eq!(value["peers"][0]["cluster"]["depends_on"][0]["condition"], "START");
    }

    #[tokio::test]
    async fn test_empty_fleet_manifest_keeps_rules() {
        let (report, statuses) = provisioned(0).await;
        let manifest = render(&report, &statuses);

        assert!(manifest.peers.is_empty());
        assert_eq!(manifest.security.peer_rules.len(), 7);
        assert_eq!(manifest.security.storage_rules.len(), 1);
    }
}
