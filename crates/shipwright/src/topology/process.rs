//! Process specifications for the two daemons of a peer.

use peerfleet_common::constants::{containers, env, ports};
use peerfleet_common::{
    ContainerDependency, DependencyCondition, HealthCheck, PeerIndex, PortMapping, SharedSecret,
    StoragePartition,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::ProcessConfig;

/// Volume mount inside a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPoint {
    pub source_volume: String,
    pub container_path: String,
    pub read_only: bool,
}

/// One container of a peer unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSpec {
    /// Container name, unique within its unit
    pub name: String,
    pub peer_index: PeerIndex,
    pub image: String,
    pub port_mappings: Vec<PortMapping>,
    pub mounts: Vec<MountPoint>,
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    pub depends_on: Vec<ContainerDependency>,
}

/// Settings shared by every unit's process specs
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub node_image: String,
    pub cluster_image: String,
    pub node_log_level: String,
    pub trusted_peers: String,
    pub health_check: HealthCheck,
}

impl From<&ProcessConfig> for ProcessSettings {
    fn from(config: &ProcessConfig) -> Self {
        Self {
            node_image: config.node_image.clone(),
            cluster_image: config.cluster_image.clone(),
            node_log_level: config.node_log_level.clone(),
            trusted_peers: config.trusted_peers.clone(),
            health_check: HealthCheck::default(),
        }
    }
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self::from(&ProcessConfig::default())
    }
}

fn mount(partition: &StoragePartition) -> MountPoint {
    MountPoint {
        source_volume: partition.role.volume_name().to_string(),
        container_path: partition.role.data_path().to_string(),
        read_only: false,
    }
}

/// Storage daemon: swarm, API and gateway ports, data on the node
/// partition, liveness probe against its local API
pub fn node_process(
    index: PeerIndex,
    partition: &StoragePartition,
    settings: &ProcessSettings,
) -> ProcessSpec {
    let mut environment = BTreeMap::new();
    environment.insert(env::IPFS_LOGGING.to_string(), settings.node_log_level.clone());

    ProcessSpec {
        name: containers::NODE_NAME.to_string(),
        peer_index: index,
        image: settings.node_image.clone(),
        port_mappings: vec![
            PortMapping::tcp(ports::SWARM),
            PortMapping::udp(ports::SWARM),
            PortMapping::tcp(ports::API),
            PortMapping::tcp(ports::GATEWAY),
        ],
        mounts: vec![mount(partition)],
        environment,
        health_check: Some(settings.health_check.clone()),
        depends_on: Vec::new(),
    }
}

/// Coordinator: control, proxy and swarm ports, data on the cluster
/// partition, reaching its node over loopback.
///
/// It starts once the node has STARTED, which does not mean the node API
/// answers yet. The coordinator retries its node connection on its own,
/// and the dependency records that.
pub fn cluster_process(
    index: PeerIndex,
    partition: &StoragePartition,
    secret: &SharedSecret,
    settings: &ProcessSettings,
    node: &ProcessSpec,
) -> ProcessSpec {
    let mut environment = BTreeMap::new();
    environment.insert(
        env::CLUSTER_CRDT_TRUSTEDPEERS.to_string(),
        settings.trusted_peers.clone(),
    );
    environment.insert(
        env::CLUSTER_IPFSHTTP_NODEMULTIADDRESS.to_string(),
        containers::NODE_LOOPBACK_MULTIADDR.to_string(),
    );
    environment.insert(
        env::CLUSTER_MONITORPINGINTERVAL.to_string(),
        containers::MONITOR_PING_INTERVAL.to_string(),
    );
    environment.insert(env::CLUSTER_PEERNAME.to_string(), index.cluster_peer_name());
    environment.insert(
        env::CLUSTER_RESTAPI_HTTPLISTENMULTIADDRESS.to_string(),
        containers::CLUSTER_REST_LISTEN_MULTIADDR.to_string(),
    );
    environment.insert(env::CLUSTER_SECRET.to_string(), secret.expose().to_string());

    ProcessSpec {
        name: containers::CLUSTER_NAME.to_string(),
        peer_index: index,
        image: settings.cluster_image.clone(),
        port_mappings: vec![
            PortMapping::tcp(ports::CLUSTER_CONTROL),
            PortMapping::tcp(ports::CLUSTER_PROXY),
            PortMapping::tcp(ports::CLUSTER_SWARM),
        ],
        mounts: vec![mount(partition)],
        environment,
        health_check: None,
        depends_on: vec![ContainerDependency {
            container: node.name.clone(),
            condition: DependencyCondition::Start,
            dependent_retries_connection: true,
        }],
    }
}
