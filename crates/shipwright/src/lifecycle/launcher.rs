//! Launching peer units.

use async_trait::async_trait;
use peerfleet_common::{PeerFleetError, PeerIndex, PeerState, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::LifecycleTracker;
use crate::topology::PeerUnit;

/// Record of a launched unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchReceipt {
    pub index: PeerIndex,
    pub service_name: String,
    /// Discovery address the unit answers on
    pub address: String,
    /// Unix epoch seconds
    pub launched_at: i64,
}

/// Runs and monitors peer units on the container platform
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    async fn launch(&self, unit: &PeerUnit) -> Result<LaunchReceipt>;

    /// Stop a unit's processes. Storage and discovery are left alone.
    async fn stop(&self, index: PeerIndex) -> Result<()>;
}

/// Launch steps in the order a unit must pass through them
const LAUNCH_SEQUENCE: [PeerState; 4] = [
    PeerState::StorageReady,
    PeerState::NodeStarted,
    PeerState::ClusterStarted,
    PeerState::Discoverable,
];

/// In-process launcher: records launches and walks each unit through its
/// lifecycle in declared order. Platform launchers implement the same trait.
pub struct LocalLauncher {
    tracker: Arc<LifecycleTracker>,
    launched: RwLock<BTreeMap<PeerIndex, LaunchReceipt>>,
}

impl LocalLauncher {
    pub fn new(tracker: Arc<LifecycleTracker>) -> Self {
        Self {
            tracker,
            launched: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl ServiceLauncher for LocalLauncher {
    async fn launch(&self, unit: &PeerUnit) -> Result<LaunchReceipt> {
        unit.validate()?;
        let index = unit.index;

        let mut state = self.tracker.state(index).await;
        if matches!(state, PeerState::Discoverable | PeerState::Degraded) {
            if let Some(receipt) = self.launched.read().await.get(&index) {
                return Ok(receipt.clone());
            }
        }

        // Resumes a launch interrupted part-way through
        for next in LAUNCH_SEQUENCE {
            if state.can_transition_to(next) {
                state = self.tracker.transition(index, next).await?;
            }
        }

        let receipt = LaunchReceipt {
            index,
            service_name: unit.placement.service_name.clone(),
            address: unit.discovery.address.clone(),
            launched_at: chrono::Utc::now().timestamp(),
        };

        tracing::info!(
            peer = %index,
            service = %receipt.service_name,
            address = %receipt.address,
            state = %state,
            "Peer unit launched"
        );

        self.launched.write().await.insert(index, receipt.clone());
        Ok(receipt)
    }

    async fn stop(&self, index: PeerIndex) -> Result<()> {
        if self.launched.write().await.remove(&index).is_none() {
            return Err(PeerFleetError::PeerNotFound(index.value()));
        }
        self.tracker.transition(index, PeerState::Terminated).await?;
        tracing::info!(peer = %index, "Peer unit stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::wired_unit;
    use peerfleet_common::HealthCheck;

    fn launcher() -> (LocalLauncher, Arc<LifecycleTracker>) {
        let tracker = Arc::new(LifecycleTracker::new(HealthCheck::default()));
        (LocalLauncher::new(tracker.clone()), tracker)
    }

    #[tokio::test]
    async fn test_launch_reaches_discoverable() {
        let (launcher, tracker) = launcher();
        let unit = wired_unit(0);

        let receipt = launcher.launch(&unit).await.unwrap();
        assert_eq!(receipt.service_name, "peer-0-service");
        assert_eq!(receipt.address, "peer-0.test.local");
        assert_eq!(tracker.state(unit.index).await, PeerState::Discoverable);
    }

    #[tokio::test]
    async fn test_relaunch_returns_existing_receipt() {
        let (launcher, _) = launcher();
        let unit = wired_unit(1);

        let first = launcher.launch(&unit).await.unwrap();
        let second = launcher.launch(&unit).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_invalid_unit_never_starts() {
        let (launcher, tracker) = launcher();
        let mut unit = wired_unit(2);
        unit.cluster.depends_on.clear();

        let err = launcher.launch(&unit).await.unwrap_err();
        assert!(matches!(err, PeerFleetError::DependencyViolation { index: 2, .. }));
        assert_eq!(tracker.state(unit.index).await, PeerState::Unprovisioned);
    }

    #[tokio::test]
    async fn test_interrupted_launch_resumes() {
        let (launcher, tracker) = launcher();
        let unit = wired_unit(3);
        tracker.transition(unit.index, PeerState::StorageReady).await.unwrap();
        tracker.transition(unit.index, PeerState::NodeStarted).await.unwrap();

        launcher.launch(&unit).await.unwrap();
        assert_eq!(tracker.state(unit.index).await, PeerState::Discoverable);
    }

    #[tokio::test]
    async fn test_stop_then_relaunch() {
        let (launcher, tracker) = launcher();
        let unit = wired_unit(0);
        launcher.launch(&unit).await.unwrap();

        launcher.stop(unit.index).await.unwrap();
        assert_eq!(tracker.state(unit.index).await, PeerState::Terminated);
        tokio_test::assert_err!(launcher.stop(unit.index).await);

        launcher.launch(&unit).await.unwrap();
        assert_eq!(tracker.state(unit.index).await, PeerState::Discoverable);
    }
}
