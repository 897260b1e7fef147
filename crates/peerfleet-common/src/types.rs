//! Core types shared across PeerFleet components.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

use crate::constants::{containers, posix, probe};

/// Position of a peer in the fleet, in `[0, N)`.
///
/// Every per-peer name and path is a pure function of the index, so a
/// rebuild with the same fleet size derives exactly the same resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIndex(u32);

impl PeerIndex {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// All indices of a fleet of `n` peers, ascending
    pub fn range(n: u32) -> impl Iterator<Item = PeerIndex> {
        (0..n).map(PeerIndex)
    }

    /// DNS name registered for this peer: `peer-{i}`
    pub fn discovery_name(&self) -> String {
        format!("peer-{}", self.0)
    }

    /// Coordinator self name: `cluster-{i}`
    pub fn cluster_peer_name(&self) -> String {
        format!("cluster-{}", self.0)
    }

    /// Task family grouping the two processes: `peer-{i}-task`
    pub fn task_family(&self) -> String {
        format!("peer-{}-task", self.0)
    }

    /// Long-running service name: `peer-{i}-service`
    pub fn service_name(&self) -> String {
        format!("peer-{}-service", self.0)
    }
}

impl fmt::Display for PeerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PeerIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Which of the peer's two processes a partition belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    /// Content-addressable storage daemon
    Node,
    /// Cluster-coordination daemon
    Cluster,
}

impl PartitionRole {
    pub const ALL: [PartitionRole; 2] = [PartitionRole::Node, PartitionRole::Cluster];

    /// Path prefix label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Cluster => "cluster",
        }
    }

    /// Where the owning process expects its data directory
    pub fn data_path(&self) -> &'static str {
        match self {
            Self::Node => containers::NODE_DATA_PATH,
            Self::Cluster => containers::CLUSTER_DATA_PATH,
        }
    }

    /// Task-local volume name backing this role
    pub fn volume_name(&self) -> &'static str {
        match self {
            Self::Node => containers::NODE_VOLUME,
            Self::Cluster => containers::CLUSTER_VOLUME,
        }
    }

    /// Partition path for a peer: `/{role}{index}`
    pub fn partition_path(&self, index: PeerIndex) -> String {
        format!("/{}{}", self.label(), index.value())
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// POSIX ownership applied to a partition root and enforced on access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PosixOwnership {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits, e.g. `0o755`
    pub mode: u32,
}

impl PosixOwnership {
    /// Octal permission string, e.g. `"755"`
    pub fn mode_string(&self) -> String {
        format!("{:o}", self.mode)
    }
}

impl Default for PosixOwnership {
    fn default() -> Self {
        Self {
            uid: posix::OWNER_UID,
            gid: posix::OWNER_GID,
            mode: posix::MODE,
        }
    }
}

impl fmt::Display for PosixOwnership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.uid, self.gid, self.mode_string())
    }
}

/// Handle to the shared persistent filesystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSystemHandle {
    pub id: String,
    /// Encryption at rest
    pub encrypted: bool,
}

/// Handle to the private DNS namespace used for discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceHandle {
    pub id: String,
    pub domain: String,
}

/// An isolated, path-scoped region of the shared filesystem bound to one
/// peer and one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePartition {
    pub peer_index: PeerIndex,
    pub role: PartitionRole,
    pub path: String,
    pub ownership: PosixOwnership,
    pub file_system_id: String,
    pub access_point_id: String,
}

/// Transport protocol of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

/// Container port binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn tcp(port: u16) -> Self {
        Self {
            container_port: port,
            protocol: Protocol::Tcp,
        }
    }

    pub fn udp(port: u16) -> Self {
        Self {
            container_port: port,
            protocol: Protocol::Udp,
        }
    }
}

/// Traffic direction of a firewall rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
}

/// One firewall rule attached to a boundary
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecurityRule {
    pub port: u16,
    pub protocol: Protocol,
    pub direction: Direction,
    /// CIDR the traffic may originate from
    pub source: String,
    pub purpose: String,
}

impl SecurityRule {
    pub fn ingress(port: u16, protocol: Protocol, source: &str, purpose: &str) -> Self {
        Self {
            port,
            protocol,
            direction: Direction::Ingress,
            source: source.to_string(),
            purpose: purpose.to_string(),
        }
    }

    /// Identity of the rule at a boundary. The purpose is a description and
    /// does not distinguish two rules.
    pub fn key(&self) -> (u16, Protocol, Direction, &str) {
        (self.port, self.protocol, self.direction, self.source.as_str())
    }
}

/// Trust token handed unmodified to every coordinator process.
///
/// `Debug` never prints the value; it prints a short SHA-256 fingerprint so
/// two fleets can be compared in logs.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw token, for injection into the coordinator environment
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// An empty secret is accepted but leaves the trust domain open
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut encoded = URL_SAFE_NO_PAD.encode(digest);
        encoded.truncate(12);
        encoded
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("SharedSecret(<empty>)")
        } else {
            write!(f, "SharedSecret(sha256:{})", self.fingerprint())
        }
    }
}

/// Container liveness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub command: Vec<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub start_period_secs: u64,
    /// Consecutive post-start-period failures before the process is unhealthy
    pub retries: u32,
}

impl HealthCheck {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn start_period(&self) -> Duration {
        Duration::from_secs(self.start_period_secs)
    }

    /// Earliest time after start at which the probe can be declared failed
    pub fn earliest_failure(&self) -> Duration {
        self.start_period() + self.interval() * self.retries
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            command: vec![probe::COMMAND.to_string()],
            interval_secs: probe::INTERVAL_SECS,
            timeout_secs: probe::TIMEOUT_SECS,
            start_period_secs: probe::START_PERIOD_SECS,
            retries: probe::RETRIES,
        }
    }
}

/// State the dependency container must reach before the dependent starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyCondition {
    Start,
    Complete,
    Success,
    Healthy,
}

impl DependencyCondition {
    /// Whether the dependent may observe its dependency before it serves
    /// requests. Only `Healthy` guarantees readiness.
    pub fn requires_dependent_retry(&self) -> bool {
        !matches!(self, Self::Healthy)
    }
}

/// Startup ordering edge between two containers of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDependency {
    /// Name of the container that must start first
    pub container: String,
    pub condition: DependencyCondition,
    /// The dependent retries its connection to the dependency on its own
    pub dependent_retries_connection: bool,
}

/// Lifecycle of one peer unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerState {
    Unprovisioned,
    StorageReady,
    NodeStarted,
    ClusterStarted,
    Discoverable,
    /// Running, but the node failed its liveness probe past the retry policy
    Degraded,
    Terminated,
}

impl PeerState {
    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, next),
            (Unprovisioned, StorageReady)
                | (StorageReady, NodeStarted)
                | (NodeStarted, ClusterStarted)
                | (ClusterStarted, Discoverable)
                | (Discoverable, Degraded)
                | (Degraded, Discoverable)
                | (Terminated, StorageReady)
        ) || (next == Terminated && *self != Terminated)
    }

    /// Both processes are running
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::ClusterStarted | Self::Discoverable | Self::Degraded
        )
    }
}

impl Default for PeerState {
    fn default() -> Self {
        Self::Unprovisioned
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unprovisioned => "UNPROVISIONED",
            Self::StorageReady => "STORAGE_READY",
            Self::NodeStarted => "NODE_STARTED",
            Self::ClusterStarted => "CLUSTER_STARTED",
            Self::Discoverable => "DISCOVERABLE",
            Self::Degraded => "DEGRADED",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// DNS record type of a discovery registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsRecordType {
    A,
}

/// A name bound in the discovery namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub name: String,
    pub namespace_id: String,
    pub record_type: DnsRecordType,
    /// Resolvable address: `{name}.{domain}`
    pub address: String,
    /// Service the name is bound to
    pub owner: String,
    /// Unix epoch seconds
    pub registered_at: i64,
}

/// A subnet the fleet may be placed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub cidr: String,
    /// Egress via NAT rather than a public route
    pub private: bool,
}
