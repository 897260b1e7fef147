//! Fleet provisioning: wires the collaborators together.
//!
//! Bootstrap produces explicit handles (filesystem, namespace, subnets)
//! which are passed to every later step; nothing is shared through global
//! state between phases.

use futures::future::join_all;
use peerfleet_common::{
    FileSystemHandle, NamespaceHandle, PartitionRole, PeerFleetError, PeerIndex, PeerState,
    Result, SecurityRule, Subnet,
};
use serde::Serialize;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::discovery::{DiscoveryRegistry, MemoryRegistry, RedisRegistry};
use crate::lifecycle::{LaunchReceipt, LifecycleTracker, LocalLauncher, ServiceLauncher};
use crate::network::{NetworkContext, StaticNetwork};
use crate::security::{ApplyOutcome, SecurityBoundary, SecurityGroup, SecurityPolicy};
use crate::storage::{MemoryStorage, RedisStorage, SharedStorage, SharedStoragePartitioner};
use crate::topology::{
    FleetTopology, PeerTopologyBuilder, PlacementTemplate, ProcessSettings, TaskSizing,
    UnitFailure,
};

/// External systems the provisioner drives
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn SharedStorage>,
    pub discovery: Arc<dyn DiscoveryRegistry>,
    pub network: Arc<dyn NetworkContext>,
    pub launcher: Arc<dyn ServiceLauncher>,
    pub peer_boundary: Arc<dyn SecurityBoundary>,
    pub storage_boundary: Arc<dyn SecurityBoundary>,
}

impl Collaborators {
    /// Everything in process; state lives as long as the collaborators
    pub fn in_memory(config: &AppConfig, tracker: Arc<LifecycleTracker>) -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new(config.storage.encrypted)),
            discovery: Arc::new(MemoryRegistry::new()),
            network: Arc::new(StaticNetwork::new(config.network.subnets.clone())),
            launcher: Arc::new(LocalLauncher::new(tracker)),
            peer_boundary: Arc::new(SecurityGroup::new(config.security.peer_boundary.clone())),
            storage_boundary: Arc::new(SecurityGroup::new(
                config.security.storage_boundary.clone(),
            )),
        }
    }

    /// Storage and discovery records persisted in Redis, so a later run
    /// reconciles against what an earlier run created
    pub async fn redis(
        config: &AppConfig,
        redis_url: &str,
        tracker: Arc<LifecycleTracker>,
    ) -> Result<Self> {
        let conn = crate::storage::connect(redis_url).await?;
        Ok(Self {
            storage: Arc::new(RedisStorage::new(conn.clone(), config.storage.encrypted)),
            discovery: Arc::new(RedisRegistry::new(conn)),
            ..Self::in_memory(config, tracker)
        })
    }
}

/// Handles created once by bootstrap and threaded through every step
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapHandles {
    pub file_system: FileSystemHandle,
    pub namespace: NamespaceHandle,
    pub subnets: Vec<Subnet>,
}

/// Everything one provisioning run did
#[derive(Debug, Clone)]
pub struct FleetReport {
    /// Unix epoch seconds
    pub generated_at: i64,
    pub requested_peers: u32,
    pub handles: BootstrapHandles,
    pub peer_security: ApplyOutcome,
    pub storage_security: ApplyOutcome,
    pub peer_rules: Vec<SecurityRule>,
    pub storage_rules: Vec<SecurityRule>,
    pub topology: FleetTopology,
    pub launched: Vec<LaunchReceipt>,
    pub launch_failures: Vec<UnitFailure>,
    pub decommissioned: Vec<Decommissioned>,
}

impl FleetReport {
    /// Drop the unit's launch receipt and remember what was torn down.
    /// Repeated attempts on one index are merged.
    pub fn record_decommission(&mut self, record: Decommissioned) {
        self.launched.retain(|r| r.index != record.index);
        match self.decommissioned.iter_mut().find(|d| d.index == record.index) {
            Some(existing) => {
                existing.stopped |= record.stopped;
                existing.deregistered |= record.deregistered;
                existing.partitions_released += record.partitions_released;
                existing.at = record.at;
            }
            None => self.decommissioned.push(record),
        }
    }
}

/// What one decommission removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decommissioned {
    pub index: PeerIndex,
    pub stopped: bool,
    pub deregistered: bool,
    pub partitions_released: usize,
    /// Unix epoch seconds
    pub at: i64,
}

/// Provisions a fleet of peer units
pub struct Provisioner {
    config: AppConfig,
    collaborators: Collaborators,
    tracker: Arc<LifecycleTracker>,
    policy: SecurityPolicy,
}

impl Provisioner {
    pub fn new(
        config: AppConfig,
        collaborators: Collaborators,
        tracker: Arc<LifecycleTracker>,
    ) -> Result<Self> {
        let policy = SecurityPolicy::new(config.security.allowed_sources.clone())?;

        if config.cluster_secret.is_empty() {
            tracing::warn!("Cluster secret is empty; any coordinator can join the fleet");
        } else {
            tracing::info!(secret = ?config.cluster_secret, "Cluster secret loaded");
        }

        Ok(Self {
            config,
            collaborators,
            tracker,
            policy,
        })
    }

    pub fn tracker(&self) -> &Arc<LifecycleTracker> {
        &self.tracker
    }

    /// Create (or find) the shared filesystem and discovery namespace and
    /// allocate subnets
    pub async fn bootstrap(&self) -> Result<BootstrapHandles> {
        let file_system = self
            .collaborators
            .storage
            .create_filesystem(&self.config.storage.file_system_name)
            .await?;
        let namespace = self
            .collaborators
            .discovery
            .create_namespace(&self.config.discovery.namespace_domain)
            .await?;
        let subnets = self.collaborators.network.allocate_subnets().await?;

        tracing::info!(
            file_system = %file_system.id,
            namespace = %namespace.domain,
            subnets = subnets.len(),
            "Bootstrap handles ready"
        );

        Ok(BootstrapHandles {
            file_system,
            namespace,
            subnets,
        })
    }

    fn builder(&self, handles: &BootstrapHandles) -> PeerTopologyBuilder {
        PeerTopologyBuilder::new(
            SharedStoragePartitioner::new(
                self.collaborators.storage.clone(),
                self.config.storage.ownership(),
            ),
            self.collaborators.discovery.clone(),
            ProcessSettings::from(&self.config.processes),
            self.config.cluster_secret.clone(),
            TaskSizing {
                cpu: self.config.task.cpu,
                memory_mib: self.config.task.memory_mib,
            },
            PlacementTemplate {
                subnets: handles.subnets.iter().map(|s| s.id.clone()).collect(),
                assign_public_ip: self.config.network.assign_public_ip,
                security_boundary: self.collaborators.peer_boundary.id().to_string(),
            },
        )
    }

    /// Apply the security policy and build the topology, without launching
    pub async fn plan(&self, handles: &BootstrapHandles, n: u32) -> Result<FleetReport> {
        let peer_security = self
            .policy
            .apply(self.collaborators.peer_boundary.as_ref())
            .await?;
        let storage_security = self
            .policy
            .apply_storage(self.collaborators.storage_boundary.as_ref())
            .await?;

        let topology = self
            .builder(handles)
            .build(n, &handles.file_system, &handles.namespace)
            .await;

        Ok(FleetReport {
            generated_at: chrono::Utc::now().timestamp(),
            requested_peers: n,
            handles: handles.clone(),
            peer_security,
            storage_security,
            peer_rules: self.collaborators.peer_boundary.ingress_rules().await?,
            storage_rules: self.collaborators.storage_boundary.ingress_rules().await?,
            topology,
            launched: Vec::new(),
            launch_failures: Vec::new(),
            decommissioned: Vec::new(),
        })
    }

    /// Plan, then launch every unit that built successfully
    pub async fn provision(&self, handles: &BootstrapHandles, n: u32) -> Result<FleetReport> {
        let mut report = self.plan(handles, n).await?;

        let launcher = &self.collaborators.launcher;
        let results = join_all(
            report
                .topology
                .units
                .iter()
                .map(|unit| async move { (unit.index, launcher.launch(unit).await) }),
        )
        .await;

        for (index, result) in results {
            match result {
                Ok(receipt) => report.launched.push(receipt),
                Err(error) => {
                    tracing::error!(peer = %index, error = %error, "Peer unit launch failed");
                    report.launch_failures.push(UnitFailure { index, error });
                }
            }
        }

        tracing::info!(
            launched = report.launched.len(),
            build_failures = report.topology.failures.len(),
            launch_failures = report.launch_failures.len(),
            "Fleet provisioned"
        );

        Ok(report)
    }

    /// Stop a unit and remove its discovery name. Its storage partitions
    /// survive unless `purge_storage` is set.
    ///
    /// A unit that was built but never launched is torn down the same way,
    /// and a call that failed part-way can be repeated to finish the work.
    /// Fails with `PeerNotFound` only when there was nothing to remove.
    pub async fn decommission(
        &self,
        handles: &BootstrapHandles,
        index: PeerIndex,
        purge_storage: bool,
    ) -> Result<Decommissioned> {
        let stopped = match self.collaborators.launcher.stop(index).await {
            Ok(()) => true,
            Err(PeerFleetError::PeerNotFound(_)) => {
                // Not running; a launch may still have failed part-way
                let state = self.tracker.state(index).await;
                if matches!(state, PeerState::Unprovisioned | PeerState::Terminated) {
                    false
                } else {
                    self.tracker.transition(index, PeerState::Terminated).await?;
                    true
                }
            }
            Err(e) => return Err(e),
        };

        let deregistered = self
            .collaborators
            .discovery
            .deregister(&handles.namespace, &index.discovery_name())
            .await?;

        let mut partitions_released = 0;
        if purge_storage {
            let partitioner = SharedStoragePartitioner::new(
                self.collaborators.storage.clone(),
                self.config.storage.ownership(),
            );
            for role in PartitionRole::ALL {
                if partitioner.release(&handles.file_system, index, role).await? {
                    partitions_released += 1;
                }
            }
        }

        if !stopped && !deregistered && partitions_released == 0 {
            return Err(PeerFleetError::PeerNotFound(index.value()));
        }

        tracing::info!(
            peer = %index,
            stopped,
            deregistered,
            partitions_released,
            "Peer unit decommissioned"
        );

        Ok(Decommissioned {
            index,
            stopped,
            deregistered,
            partitions_released,
            at: chrono::Utc::now().timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ProbeObservation;
    use async_trait::async_trait;
    use peerfleet_common::{DiscoveryRecord, HealthCheck, SharedSecret};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Registry whose next deregister fails once armed
    struct FlakyRegistry {
        inner: MemoryRegistry,
        fail_next_deregister: AtomicBool,
    }

    #[async_trait]
    impl DiscoveryRegistry for FlakyRegistry {
        async fn create_namespace(&self, domain: &str) -> Result<NamespaceHandle> {
            self.inner.create_namespace(domain).await
        }

        async fn lookup(
            &self,
            ns: &NamespaceHandle,
            name: &str,
        ) -> Result<Option<DiscoveryRecord>> {
            self.inner.lookup(ns, name).await
        }

        async fn register(
            &self,
            ns: &NamespaceHandle,
            name: &str,
            owner: &str,
        ) -> Result<DiscoveryRecord> {
            self.inner.register(ns, name, owner).await
        }

        async fn deregister(&self, ns: &NamespaceHandle, name: &str) -> Result<bool> {
            if self.fail_next_deregister.swap(false, Ordering::SeqCst) {
                return Err(PeerFleetError::Discovery("registry unavailable".to_string()));
            }
            self.inner.deregister(ns, name).await
        }
    }

    struct Fixture {
        storage: MemoryStorage,
        registry: MemoryRegistry,
        peers: SecurityGroup,
        provisioner: Provisioner,
    }

    fn fixture() -> Fixture {
        fixture_with(|registry| Arc::new(registry))
    }

    fn fixture_with(
        discovery: impl FnOnce(MemoryRegistry) -> Arc<dyn DiscoveryRegistry>,
    ) -> Fixture {
        let mut config = AppConfig::default();
        config.cluster_secret = SharedSecret::new("fleet-secret");

        let tracker = Arc::new(LifecycleTracker::new(HealthCheck::default()));
        let storage = MemoryStorage::default();
        let registry = MemoryRegistry::new();
        let peers = SecurityGroup::new("peers");

        let collaborators = Collaborators {
            storage: Arc::new(storage.clone()),
            discovery: discovery(registry.clone()),
            peer_boundary: Arc::new(peers.clone()),
            ..Collaborators::in_memory(&config, tracker.clone())
        };

        let provisioner = Provisioner::new(config, collaborators, tracker).unwrap();
        Fixture {
            storage,
            registry,
            peers,
            provisioner,
        }
    }

    #[tokio::test]
    async fn test_provision_makes_every_peer_discoverable() {
        let f = fixture();
        let handles = f.provisioner.bootstrap().await.unwrap();
        let report = f.provisioner.provision(&handles, 3).await.unwrap();

        assert_eq!(report.launched.len(), 3);
        assert!(report.launch_failures.is_empty());
        for i in PeerIndex::range(3) {
            assert_eq!(f.provisioner.tracker().state(i).await, PeerState::Discoverable);
        }
        assert_eq!(report.launched[1].address, "peer-1.ipfs-cluster-3-peers.local");
        assert_eq!(report.topology.units[0].placement.security_boundary, "peers");
    }

    #[tokio::test]
    async fn test_reprovision_reconciles() {
        let f = fixture();
        let handles = f.provisioner.bootstrap().await.unwrap();
        let first = f.provisioner.provision(&handles, 3).await.unwrap();

        let again = f.provisioner.bootstrap().await.unwrap();
        assert_eq!(again.file_system, handles.file_system);
        let second = f.provisioner.provision(&again, 3).await.unwrap();

        assert_eq!(first.topology.units, second.topology.units);
        assert_eq!(first.launched, second.launched);
        assert_eq!(second.peer_security.added, 0);
        assert_eq!(f.peers.ingress_rules().await.unwrap().len(), 7);
        assert_eq!(f.storage.access_point_count(&handles.file_system).await, 6);
    }

    #[tokio::test]
    async fn test_empty_fleet_still_gets_rules() {
        let f = fixture();
        let handles = f.provisioner.bootstrap().await.unwrap();
        let report = f.provisioner.provision(&handles, 0).await.unwrap();

        assert!(report.topology.units.is_empty());
        assert_eq!(report.peer_rules.len(), 7);
        assert_eq!(report.storage_rules.len(), 1);
        assert_eq!(f.storage.access_point_count(&handles.file_system).await, 0);
    }

    #[tokio::test]
    async fn test_degraded_peer_keeps_storage_and_name() {
        let f = fixture();
        let handles = f.provisioner.bootstrap().await.unwrap();
        f.provisioner.provision(&handles, 3).await.unwrap();

        let paths_before = f.storage.access_point_paths(&handles.file_system).await;
        let names_before = f.registry.names(&handles.namespace).await;

        let i = PeerIndex::new(0);
        let tracker = f.provisioner.tracker();
        for secs in [63, 123, 183] {
            tracker
                .record_probe(
                    i,
                    ProbeObservation {
                        healthy: false,
                        elapsed: Duration::from_secs(secs),
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(tracker.state(i).await, PeerState::Degraded);
        assert_eq!(tracker.state(PeerIndex::new(1)).await, PeerState::Discoverable);
        assert_eq!(f.storage.access_point_paths(&handles.file_system).await, paths_before);
        assert_eq!(f.registry.names(&handles.namespace).await, names_before);
    }

    #[tokio::test]
    async fn test_decommission_keeps_storage_unless_purged() {
        let f = fixture();
        let handles = f.provisioner.bootstrap().await.unwrap();
        f.provisioner.provision(&handles, 2).await.unwrap();

        f.provisioner
            .decommission(&handles, PeerIndex::new(0), false)
            .await
            .unwrap();
        assert_eq!(f.storage.access_point_count(&handles.file_system).await, 4);
        assert_eq!(f.registry.names(&handles.namespace).await, vec!["peer-1"]);
        assert_eq!(
            f.provisioner.tracker().state(PeerIndex::new(0)).await,
            PeerState::Terminated
        );

        f.provisioner
            .decommission(&handles, PeerIndex::new(1), true)
            .await
            .unwrap();
        assert_eq!(
            f.storage.access_point_paths(&handles.file_system).await,
            vec!["/cluster0", "/node0"]
        );
    }

    #[tokio::test]
    async fn test_rebuild_after_decommission_reuses_partitions() {
        let f = fixture();
        let handles = f.provisioner.bootstrap().await.unwrap();
        let first = f.provisioner.provision(&handles, 1).await.unwrap();

        f.provisioner
            .decommission(&handles, PeerIndex::new(0), false)
            .await
            .unwrap();
        let second = f.provisioner.provision(&handles, 1).await.unwrap();

        assert_eq!(
            first.topology.units[0].partitions,
            second.topology.units[0].partitions
        );
        assert_eq!(
            f.provisioner.tracker().state(PeerIndex::new(0)).await,
            PeerState::Discoverable
        );
    }

    #[tokio::test]
    async fn test_decommission_unknown_peer() {
        let f = fixture();
        let handles = f.provisioner.bootstrap().await.unwrap();
        let err = f
            .provisioner
            .decommission(&handles, PeerIndex::new(9), false)
            .await
            .unwrap_err();
        assert_eq!(err, PeerFleetError::PeerNotFound(9));
    }

    #[tokio::test]
    async fn test_decommission_planned_only_unit() {
        let f = fixture();
        let handles = f.provisioner.bootstrap().await.unwrap();
        f.provisioner.plan(&handles, 2).await.unwrap();

        let record = f
            .provisioner
            .decommission(&handles, PeerIndex::new(0), true)
            .await
            .unwrap();
        assert!(!record.stopped);
        assert!(record.deregistered);
        assert_eq!(record.partitions_released, 2);

        assert_eq!(f.registry.names(&handles.namespace).await, vec!["peer-1"]);
        assert_eq!(
            f.storage.access_point_paths(&handles.file_system).await,
            vec!["/cluster1", "/node1"]
        );
    }

    #[tokio::test]
    async fn test_decommission_retries_after_failed_deregister() {
        let flaky = Arc::new(FlakyRegistry {
            inner: MemoryRegistry::new(),
            fail_next_deregister: AtomicBool::new(false),
        });
        let f = {
            let flaky = flaky.clone();
            fixture_with(move |_| flaky)
        };
        let names = |h: &BootstrapHandles| {
            let registry = flaky.inner.clone();
            let ns = h.namespace.clone();
            async move { registry.names(&ns).await }
        };

        let handles = f.provisioner.bootstrap().await.unwrap();
        f.provisioner.provision(&handles, 1).await.unwrap();

        flaky.fail_next_deregister.store(true, Ordering::SeqCst);
        let err = tokio_test::assert_err!(
            f.provisioner
                .decommission(&handles, PeerIndex::new(0), false)
                .await
        );
        assert!(matches!(err, PeerFleetError::Discovery(_)));
        assert_eq!(names(&handles).await, vec!["peer-0"]);
        assert_eq!(
            f.provisioner.tracker().state(PeerIndex::new(0)).await,
            PeerState::Terminated
        );

        let record = f
            .provisioner
            .decommission(&handles, PeerIndex::new(0), false)
            .await
            .unwrap();
        assert!(!record.stopped);
        assert!(record.deregistered);
        assert!(names(&handles).await.is_empty());
    }

    #[test]
    fn test_report_merges_repeated_decommissions() {
        let mut report = FleetReport {
            generated_at: 0,
            requested_peers: 1,
            handles: BootstrapHandles {
                file_system: FileSystemHandle {
                    id: "fs-test".to_string(),
                    encrypted: true,
                },
                namespace: NamespaceHandle {
                    id: "ns-test".to_string(),
                    domain: "test.local".to_string(),
                },
                subnets: Vec::new(),
            },
            peer_security: ApplyOutcome::default(),
            storage_security: ApplyOutcome::default(),
            peer_rules: Vec::new(),
            storage_rules: Vec::new(),
            topology: FleetTopology::default(),
            launched: Vec::new(),
            launch_failures: Vec::new(),
            decommissioned: Vec::new(),
        };
        let first = Decommissioned {
            index: PeerIndex::new(0),
            stopped: true,
            deregistered: false,
            partitions_released: 0,
            at: 10,
        };
        report.record_decommission(first);
        report.record_decommission(Decommissioned {
            stopped: false,
            deregistered: true,
            partitions_released: 2,
            at: 20,
            ..first
        });

        assert_eq!(
            report.decommissioned,
            vec![Decommissioned {
                index: PeerIndex::new(0),
                stopped: true,
                deregistered: true,
                partitions_released: 2,
                at: 20,
            }]
        );
    }
}
