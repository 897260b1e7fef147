//! Fleet topology construction.

use futures::future::join_all;
use peerfleet_common::{
    DiscoveryRecord, FileSystemHandle, NamespaceHandle, PeerFleetError, PeerIndex, Result,
    SharedSecret,
};
use std::sync::Arc;

use super::process::{ProcessSettings, cluster_process, node_process};
use super::unit::{PeerUnit, ServicePlacement, TaskSizing, VolumeSpec};
use crate::discovery::{DiscoveryRegistry, new_record};
use crate::storage::SharedStoragePartitioner;

/// Placement applied to every unit
#[derive(Debug, Clone)]
pub struct PlacementTemplate {
    pub subnets: Vec<String>,
    pub assign_public_ip: bool,
    pub security_boundary: String,
}

/// A peer index that could not be built
#[derive(Debug, Clone)]
pub struct UnitFailure {
    pub index: PeerIndex,
    pub error: PeerFleetError,
}

/// Result of a build: units in index order, plus the indices that failed
#[derive(Debug, Clone, Default)]
pub struct FleetTopology {
    pub units: Vec<PeerUnit>,
    pub failures: Vec<UnitFailure>,
}

impl FleetTopology {
    /// Every requested index produced a unit
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Builds peer units from explicit storage and discovery handles.
///
/// Every name and path is derived from the peer index alone, and every
/// backend call is create-or-reconcile, so building the same fleet size
/// twice yields the same units without duplicating anything.
pub struct PeerTopologyBuilder {
    partitioner: SharedStoragePartitioner,
    discovery: Arc<dyn DiscoveryRegistry>,
    settings: ProcessSettings,
    secret: SharedSecret,
    sizing: TaskSizing,
    placement: PlacementTemplate,
}

impl PeerTopologyBuilder {
    pub fn new(
        partitioner: SharedStoragePartitioner,
        discovery: Arc<dyn DiscoveryRegistry>,
        settings: ProcessSettings,
        secret: SharedSecret,
        sizing: TaskSizing,
        placement: PlacementTemplate,
    ) -> Self {
        Self {
            partitioner,
            discovery,
            settings,
            secret,
            sizing,
            placement,
        }
    }

    /// Build units `0..n`. Indices are built concurrently; a failing index
    /// is recorded and never affects its siblings.
    pub async fn build(
        &self,
        n: u32,
        fs: &FileSystemHandle,
        ns: &NamespaceHandle,
    ) -> FleetTopology {
        let results = join_all(
            PeerIndex::range(n)
                .map(|index| async move { (index, self.build_unit(index, fs, ns).await) }),
        )
        .await;

        let mut topology = FleetTopology::default();
        for (index, result) in results {
            match result {
                Ok(unit) => topology.units.push(unit),
                Err(error) => {
                    tracing::error!(
                        peer = %index,
                        error = %error,
                        unit_fatal = error.is_unit_fatal(),
                        retryable = error.is_retryable(),
                        "Peer unit build failed"
                    );
                    topology.failures.push(UnitFailure { index, error });
                }
            }
        }

        tracing::info!(
            requested = n,
            built = topology.units.len(),
            failed = topology.failures.len(),
            "Fleet topology built"
        );

        topology
    }

    /// Build a single unit: partitions, processes, ordering, then discovery.
    ///
    /// The unit is validated before its name is registered, so a unit that
    /// fails validation never becomes discoverable.
    pub async fn build_unit(
        &self,
        index: PeerIndex,
        fs: &FileSystemHandle,
        ns: &NamespaceHandle,
    ) -> Result<PeerUnit> {
        let [node_partition, cluster_partition] = self.partitioner.partition_peer(fs, index).await?;

        let node = node_process(index, &node_partition, &self.settings);
        let cluster = cluster_process(
            index,
            &cluster_partition,
            &self.secret,
            &self.settings,
            &node,
        );

        let service_name = index.service_name();
        let discovery_name = index.discovery_name();

        let mut unit = PeerUnit {
            index,
            task_family: index.task_family(),
            sizing: self.sizing,
            volumes: vec![
                VolumeSpec::from(&node_partition),
                VolumeSpec::from(&cluster_partition),
            ],
            partitions: vec![node_partition, cluster_partition],
            node,
            cluster,
            placement: ServicePlacement {
                service_name: service_name.clone(),
                desired_count: 1,
                subnets: self.placement.subnets.clone(),
                assign_public_ip: self.placement.assign_public_ip,
                security_boundary: self.placement.security_boundary.clone(),
            },
            discovery: new_record(ns, &discovery_name, &service_name),
        };

        unit.validate()?;
        unit.discovery = self.bind_discovery(ns, &discovery_name, &service_name).await?;

        tracing::debug!(
            peer = %index,
            address = %unit.discovery.address,
            "Peer unit ready"
        );

        Ok(unit)
    }

    async fn bind_discovery(
        &self,
        ns: &NamespaceHandle,
        name: &str,
        owner: &str,
    ) -> Result<DiscoveryRecord> {
        let record = match self.discovery.lookup(ns, name).await? {
            Some(existing) => existing,
            None => self.discovery.register(ns, name, owner).await?,
        };
        if record.owner != owner {
            return Err(PeerFleetError::DiscoveryConflict {
                name: name.to_string(),
                bound_to: record.owner,
                requested_by: owner.to_string(),
            });
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MemoryRegistry;
    use crate::storage::{AccessPoint, MemoryStorage, SharedStorage};
    use peerfleet_common::{PartitionRole, PosixOwnership};
    use std::collections::HashSet;

    struct Fixture {
        storage: MemoryStorage,
        registry: MemoryRegistry,
        builder: PeerTopologyBuilder,
        fs: FileSystemHandle,
        ns: NamespaceHandle,
    }

    async fn fixture() -> Fixture {
        let storage = MemoryStorage::default();
        let registry = MemoryRegistry::new();
        let fs = storage.create_filesystem("fleet").await.unwrap();
        let ns = registry.create_namespace("fleet.local").await.unwrap();

        let builder = PeerTopologyBuilder::new(
            SharedStoragePartitioner::new(Arc::new(storage.clone()), PosixOwnership::default()),
            Arc::new(registry.clone()),
            ProcessSettings::default(),
            SharedSecret::new("fleet-secret"),
            TaskSizing { cpu: 256, memory_mib: 512 },
            PlacementTemplate {
                subnets: vec!["subnet-a".to_string()],
                assign_public_ip: true,
                security_boundary: "peers".to_string(),
            },
        );

        Fixture { storage, registry, builder, fs, ns }
    }

    #[tokio::test]
    async fn test_three_peer_fleet() {
        let f = fixture().await;
        let topology = f.builder.build(3, &f.fs, &f.ns).await;

        assert!(topology.is_complete());
        let indices: Vec<u32> = topology.units.iter().map(|u| u.index.value()).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        assert_eq!(
            f.storage.access_point_paths(&f.fs).await,
            vec!["/cluster0", "/cluster1", "/cluster2", "/node0", "/node1", "/node2"]
        );
        assert_eq!(f.registry.names(&f.ns).await, vec!["peer-0", "peer-1", "peer-2"]);

        for unit in &topology.units {
            let dep = &unit.cluster.depends_on[0];
            assert_eq!(dep.container, unit.node.name);
            assert_eq!(unit.node.peer_index, unit.index);
            assert_eq!(unit.cluster.peer_index, unit.index);
            assert_eq!(
                unit.cluster.environment["CLUSTER_PEERNAME"],
                format!("cluster-{}", unit.index)
            );
            assert_eq!(unit.placement.desired_count, 1);
            assert_eq!(unit.discovery.address, format!("peer-{}.fleet.local", unit.index));
        }
    }

    #[tokio::test]
    async fn test_partition_paths_distinct_for_any_size() {
        for n in [1u32, 2, 5, 17] {
            let f = fixture().await;
            let topology = f.builder.build(n, &f.fs, &f.ns).await;
            assert_eq!(topology.units.len(), n as usize);

            let paths: HashSet<&str> = topology
                .units
                .iter()
                .flat_map(|u| u.partitions.iter().map(|p| p.path.as_str()))
                .collect();
            assert_eq!(paths.len(), 2 * n as usize);

            for unit in &topology.units {
                let node = unit.partition(PartitionRole::Node).unwrap();
                let cluster = unit.partition(PartitionRole::Cluster).unwrap();
                assert_ne!(node.path, cluster.path);
            }
        }
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let f = fixture().await;
        let first = f.builder.build(3, &f.fs, &f.ns).await;
        let second = f.builder.build(3, &f.fs, &f.ns).await;

        assert_eq!(first.units, second.units);
        assert_eq!(f.storage.access_point_count(&f.fs).await, 6);
        assert_eq!(f.registry.names(&f.ns).await.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_fleet() {
        let f = fixture().await;
        let topology = f.builder.build(0, &f.fs, &f.ns).await;

        assert!(topology.units.is_empty());
        assert!(topology.is_complete());
        assert_eq!(f.storage.access_point_count(&f.fs).await, 0);
        assert!(f.registry.names(&f.ns).await.is_empty());
    }

    #[tokio::test]
    async fn test_allocation_failure_is_isolated() {
        let f = fixture().await;
        f.storage
            .seed_access_point(
                &f.fs,
                AccessPoint {
                    id: "fsap-foreign".to_string(),
                    file_system_id: f.fs.id.clone(),
                    path: "/cluster1".to_string(),
                    ownership: PosixOwnership { uid: 0, gid: 0, mode: 0o700 },
                    created_at: 0,
                },
            )
            .await;

        let topology = f.builder.build(3, &f.fs, &f.ns).await;

        assert_eq!(topology.units.len(), 2);
        assert_eq!(topology.failures.len(), 1);
        assert_eq!(topology.failures[0].index, PeerIndex::new(1));
        assert!(matches!(topology.failures[0].error, PeerFleetError::Allocation { .. }));
        // Failed unit never became discoverable
        assert_eq!(f.registry.names(&f.ns).await, vec!["peer-0", "peer-2"]);
    }

    #[tokio::test]
    async fn test_discovery_conflict_is_isolated() {
        let f = fixture().await;
        f.registry.register(&f.ns, "peer-2", "someone-else").await.unwrap();

        let topology = f.builder.build(3, &f.fs, &f.ns).await;

        assert_eq!(topology.units.len(), 2);
        let failure = &topology.failures[0];
        assert_eq!(failure.index, PeerIndex::new(2));
        assert!(matches!(
            &failure.error,
            PeerFleetError::DiscoveryConflict { bound_to, .. } if bound_to == "someone-else"
        ));
    }

    #[tokio::test]
    async fn test_growing_fleet_keeps_existing_units() {
        let f = fixture().await;
        let small = f.builder.build(2, &f.fs, &f.ns).await;
        let large = f.builder.build(4, &f.fs, &f.ns).await;

        assert_eq!(&large.units[..2], &small.units[..]);
        assert_eq!(large.units.len(), 4);
    }
}
