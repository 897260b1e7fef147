//! Network placement for the fleet.

use async_trait::async_trait;
use peerfleet_common::{PeerFleetError, Result, Subnet};

/// Supplies the subnets the fleet runs inside
#[async_trait]
pub trait NetworkContext: Send + Sync {
    async fn allocate_subnets(&self) -> Result<Vec<Subnet>>;
}

/// Subnets fixed by configuration, created by an out-of-band bootstrap
pub struct StaticNetwork {
    subnets: Vec<Subnet>,
}

impl StaticNetwork {
    pub fn new(subnets: Vec<Subnet>) -> Self {
        Self { subnets }
    }
}

#[async_trait]
impl NetworkContext for StaticNetwork {
    async fn allocate_subnets(&self) -> Result<Vec<Subnet>> {
        // Peers sit behind NAT; public subnets are left to the bastion
        let private: Vec<Subnet> = self.subnets.iter().filter(|s| s.private).cloned().collect();
        if private.is_empty() {
            return Err(PeerFleetError::Config(
                "no private subnet available for peer placement".to_string(),
            ));
        }
        Ok(private)
    }
}
