//! Ingress policy shared by every peer.
//!
//! One rule set covers all peers: node swarm (TCP+UDP), node API, gateway,
//! and the three coordinator ports. Rules are keyed by
//! (port, protocol, direction, source), so reapplying the policy leaves the
//! boundary unchanged.

use async_trait::async_trait;
use peerfleet_common::constants::ports;
use peerfleet_common::{Direction, PeerFleetError, Protocol, Result, SecurityRule};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A firewall boundary rules can be attached to
#[async_trait]
pub trait SecurityBoundary: Send + Sync {
    fn id(&self) -> &str;

    /// Attach a rule. Returns false if an equivalent rule was already present.
    async fn authorize_ingress(&self, rule: &SecurityRule) -> Result<bool>;

    /// Rules currently attached, in a stable order
    async fn ingress_rules(&self) -> Result<Vec<SecurityRule>>;
}

type RuleKey = (u16, Protocol, Direction, String);

/// In-memory security group
#[derive(Clone)]
pub struct SecurityGroup {
    id: String,
    rules: Arc<RwLock<BTreeMap<RuleKey, SecurityRule>>>,
}

impl SecurityGroup {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rules: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

#[async_trait]
impl SecurityBoundary for SecurityGroup {
    fn id(&self) -> &str {
        &self.id
    }

    async fn authorize_ingress(&self, rule: &SecurityRule) -> Result<bool> {
        let (port, protocol, direction, source) = rule.key();
        let key = (port, protocol, direction, source.to_string());

        let mut rules = self.rules.write().await;
        if rules.contains_key(&key) {
            return Ok(false);
        }
        rules.insert(key, rule.clone());
        Ok(true)
    }

    async fn ingress_rules(&self) -> Result<Vec<SecurityRule>> {
        Ok(self.rules.read().await.values().cloned().collect())
    }
}

/// Outcome of applying a rule set to a boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub boundary: String,
    pub added: usize,
    pub unchanged: usize,
}

/// The fleet's static ingress rule set
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    allowed_sources: Vec<String>,
}

impl SecurityPolicy {
    /// Create a policy admitting traffic from `allowed_sources` (CIDRs)
    pub fn new(allowed_sources: Vec<String>) -> Result<Self> {
        if allowed_sources.is_empty() {
            return Err(PeerFleetError::InvalidInput(
                "at least one allowed source is required".to_string(),
            ));
        }
        if let Some(bad) = allowed_sources.iter().find(|s| !is_cidr(s)) {
            return Err(PeerFleetError::InvalidInput(format!(
                "allowed source {} is not a CIDR",
                bad
            )));
        }
        Ok(Self { allowed_sources })
    }

    /// Rules attached to the peer boundary
    pub fn peer_rules(&self) -> Vec<SecurityRule> {
        let ports = [
            (ports::SWARM, Protocol::Tcp, "Allow other storage nodes to connect to this node"),
            (ports::SWARM, Protocol::Udp, "Allow other storage nodes to connect to this node"),
            (ports::API, Protocol::Tcp, "Allow storage node API"),
            (ports::GATEWAY, Protocol::Tcp, "Allow storage gateway"),
            (ports::CLUSTER_CONTROL, Protocol::Tcp, "Allow cluster control API"),
            (ports::CLUSTER_PROXY, Protocol::Tcp, "Allow cluster proxy endpoint"),
            (ports::CLUSTER_SWARM, Protocol::Tcp, "Allow cluster swarm endpoint"),
        ];

        self.allowed_sources
            .iter()
            .flat_map(|source| {
                ports.iter().map(move |(port, protocol, purpose)| {
                    SecurityRule::ingress(*port, *protocol, source, purpose)
                })
            })
            .collect()
    }

    /// Rules attached to the shared-storage boundary
    pub fn storage_rules(&self) -> Vec<SecurityRule> {
        self.allowed_sources
            .iter()
            .map(|source| {
                SecurityRule::ingress(ports::NFS, Protocol::Tcp, source, "Allow access to shared storage")
            })
            .collect()
    }

    /// Attach the peer rule set to the fleet boundary.
    ///
    /// Applied regardless of fleet size: an empty fleet still has a boundary.
    pub async fn apply(&self, boundary: &dyn SecurityBoundary) -> Result<ApplyOutcome> {
        Self::attach(boundary, self.peer_rules()).await
    }

    /// Attach the storage rule set to the filesystem boundary
    pub async fn apply_storage(&self, boundary: &dyn SecurityBoundary) -> Result<ApplyOutcome> {
        Self::attach(boundary, self.storage_rules()).await
    }

    async fn attach(
        boundary: &dyn SecurityBoundary,
        rules: Vec<SecurityRule>,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome {
            boundary: boundary.id().to_string(),
            ..Default::default()
        };

        for rule in &rules {
            if boundary.authorize_ingress(rule).await? {
                outcome.added += 1;
            } else {
                outcome.unchanged += 1;
            }
        }

        tracing::info!(
            boundary = %outcome.boundary,
            added = outcome.added,
            unchanged = outcome.unchanged,
            "Ingress rules applied"
        );

        Ok(outcome)
    }
}

/// `addr/prefix` with a parseable address and a prefix within its width
fn is_cidr(source: &str) -> bool {
    let Some((addr, prefix)) = source.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let width = if addr.is_ipv4() { 32 } else { 128 };
    prefix.parse::<u8>().is_ok_and(|p| p <= width)
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_sources: vec![peerfleet_common::constants::ANY_IPV4.to_string()],
        }
    }
}
