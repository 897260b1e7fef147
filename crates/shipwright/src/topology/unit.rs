//! Peer unit: the paired node + coordinator deployed as one fleet member.

use peerfleet_common::{
    DiscoveryRecord, PartitionRole, PeerFleetError, PeerIndex, Result, StoragePartition,
};
use serde::Serialize;

use super::process::ProcessSpec;

/// Filesystem volume attached to a unit through one access point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSpec {
    pub name: String,
    pub file_system_id: String,
    pub access_point_id: String,
    pub transit_encryption: bool,
}

impl From<&StoragePartition> for VolumeSpec {
    fn from(partition: &StoragePartition) -> Self {
        Self {
            name: partition.role.volume_name().to_string(),
            file_system_id: partition.file_system_id.clone(),
            access_point_id: partition.access_point_id.clone(),
            transit_encryption: true,
        }
    }
}

/// CPU units and memory reserved for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskSizing {
    pub cpu: u32,
    pub memory_mib: u32,
}

/// Where and how many copies of a unit run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePlacement {
    pub service_name: String,
    /// Always 1: a unit's identity is its storage partitions
    pub desired_count: u32,
    pub subnets: Vec<String>,
    pub assign_public_ip: bool,
    pub security_boundary: String,
}

/// One fleet member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerUnit {
    pub index: PeerIndex,
    pub task_family: String,
    pub sizing: TaskSizing,
    /// Node partition first, then cluster
    pub partitions: Vec<StoragePartition>,
    pub volumes: Vec<VolumeSpec>,
    pub node: ProcessSpec,
    pub cluster: ProcessSpec,
    pub placement: ServicePlacement,
    pub discovery: DiscoveryRecord,
}

impl PeerUnit {
    pub fn partition(&self, role: PartitionRole) -> Option<&StoragePartition> {
        self.partitions.iter().find(|p| p.role == role)
    }

    /// Check the unit is completely wired before it may be launched.
    ///
    /// Every failure is a dependency violation: the unit is rejected at
    /// build time rather than discovered broken at runtime.
    pub fn validate(&self) -> Result<()> {
        let violation = |reason: String| PeerFleetError::DependencyViolation {
            index: self.index.value(),
            reason,
        };

        if self.node.peer_index != self.index || self.cluster.peer_index != self.index {
            return Err(violation(format!(
                "processes belong to peers {} and {}",
                self.node.peer_index, self.cluster.peer_index
            )));
        }

        if !self.node.depends_on.is_empty() {
            return Err(violation("node process must not depend on any process".to_string()));
        }

        let [dep] = self.cluster.depends_on.as_slice() else {
            return Err(violation(format!(
                "cluster process must depend on exactly one process, found {}",
                self.cluster.depends_on.len()
            )));
        };

        if dep.container != self.node.name {
            return Err(violation(format!(
                "cluster depends on {} instead of {}",
                dep.container, self.node.name
            )));
        }

        if dep.condition.requires_dependent_retry() && !dep.dependent_retries_connection {
            return Err(violation(format!(
                "{:?} ordering requires the cluster process to retry its node connection",
                dep.condition
            )));
        }

        for (process, role) in [
            (&self.node, PartitionRole::Node),
            (&self.cluster, PartitionRole::Cluster),
        ] {
            let partition = self
                .partition(role)
                .ok_or_else(|| violation(format!("missing {} partition", role)))?;

            if partition.peer_index != self.index {
                return Err(violation(format!(
                    "{} partition {} belongs to peer {}",
                    role, partition.path, partition.peer_index
                )));
            }

            let mounted = process.mounts.iter().any(|m| {
                m.source_volume == role.volume_name()
                    && self
                        .volumes
                        .iter()
                        .any(|v| v.name == m.source_volume && v.access_point_id == partition.access_point_id)
            });
            if !mounted {
                return Err(violation(format!(
                    "{} does not mount the {} partition",
                    process.name, role
                )));
            }
        }

        if self.discovery.name != self.index.discovery_name() {
            return Err(violation(format!(
                "discovery name {} does not match peer {}",
                self.discovery.name, self.index
            )));
        }

        if self.placement.desired_count != 1 {
            return Err(violation(format!(
                "desired count must be 1, found {}",
                self.placement.desired_count
            )));
        }

        Ok(())
    }
}
