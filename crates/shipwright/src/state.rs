//! Application state shared by the HTTP handlers.

use anyhow::{Context, Result};
use peerfleet_common::PeerIndex;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::lifecycle::LifecycleTracker;
use crate::manifest::{self, FleetManifest};
use crate::provisioner::{BootstrapHandles, Decommissioned, FleetReport, Provisioner};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<Provisioner>,

    /// Handles created at bootstrap, reused for every later operation
    pub handles: BootstrapHandles,

    /// Most recent provisioning run
    pub report: Arc<RwLock<FleetReport>>,
}

impl AppState {
    /// Bootstrap and provision `peers` units
    pub async fn new(provisioner: Provisioner, peers: u32) -> Result<Self> {
        let handles = provisioner
            .bootstrap()
            .await
            .context("Failed to bootstrap fleet handles")?;
        let report = provisioner
            .provision(&handles, peers)
            .await
            .context("Failed to provision fleet")?;

        Ok(Self {
            provisioner: Arc::new(provisioner),
            handles,
            report: Arc::new(RwLock::new(report)),
        })
    }

    pub fn tracker(&self) -> &Arc<LifecycleTracker> {
        self.provisioner.tracker()
    }

    /// Manifest of the last run with current lifecycle statuses
    pub async fn manifest(&self) -> FleetManifest {
        let statuses = self.tracker().snapshot().await;
        manifest::render(&*self.report.read().await, &statuses)
    }

    /// Decommission a unit and drop its launch receipt from the report
    pub async fn decommission(
        &self,
        index: PeerIndex,
        purge_storage: bool,
    ) -> peerfleet_common::Result<Decommissioned> {
        let record = self
            .provisioner
            .decommission(&self.handles, index, purge_storage)
            .await?;
        self.report.write().await.record_decommission(record);
        Ok(record)
    }
}
