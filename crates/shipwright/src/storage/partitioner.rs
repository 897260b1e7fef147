//! Per-peer partitioning of the shared filesystem.

use peerfleet_common::{
    FileSystemHandle, PartitionRole, PeerFleetError, PeerIndex, PosixOwnership, Result,
    StoragePartition,
};
use std::sync::Arc;

use super::{AccessPoint, SharedStorage};

/// Carves the shared filesystem into one access point per peer per role.
///
/// Paths are `/{role}{index}`, so no two peers ever share a partition and no
/// locking is needed to keep them apart.
#[derive(Clone)]
pub struct SharedStoragePartitioner {
    storage: Arc<dyn SharedStorage>,
    ownership: PosixOwnership,
}

impl SharedStoragePartitioner {
    pub fn new(storage: Arc<dyn SharedStorage>, ownership: PosixOwnership) -> Self {
        Self { storage, ownership }
    }

    /// Allocate (or reconcile) the partition for one peer and role.
    ///
    /// An existing access point at the path is reused when its ownership
    /// matches, and rejected with an allocation error otherwise.
    pub async fn partition(
        &self,
        fs: &FileSystemHandle,
        index: PeerIndex,
        role: PartitionRole,
    ) -> Result<StoragePartition> {
        let path = role.partition_path(index);

        let ap = match self.storage.find_access_point(fs, &path).await? {
            Some(existing) => {
                tracing::debug!(peer = %index, path = %path, "Reconciled existing partition");
                existing
            }
            None => {
                let created = self
                    .storage
                    .create_access_point(fs, &path, self.ownership)
                    .await?;
                tracing::info!(
                    peer = %index,
                    path = %path,
                    access_point = %created.id,
                    "Created storage partition"
                );
                created
            }
        };

        // Another writer may have won the create with different ownership
        self.check_ownership(&ap)?;

        Ok(StoragePartition {
            peer_index: index,
            role,
            path,
            ownership: ap.ownership,
            file_system_id: ap.file_system_id,
            access_point_id: ap.id,
        })
    }

    /// Both partitions of a peer, node first
    pub async fn partition_peer(
        &self,
        fs: &FileSystemHandle,
        index: PeerIndex,
    ) -> Result<[StoragePartition; 2]> {
        let node = self.partition(fs, index, PartitionRole::Node).await?;
        let cluster = self.partition(fs, index, PartitionRole::Cluster).await?;
        Ok([node, cluster])
    }

    /// Delete one partition. Only called for an explicit storage purge.
    pub async fn release(
        &self,
        fs: &FileSystemHandle,
        index: PeerIndex,
        role: PartitionRole,
    ) -> Result<bool> {
        let path = role.partition_path(index);
        let removed = self.storage.delete_access_point(fs, &path).await?;
        if removed {
            tracing::warn!(peer = %index, path = %path, "Storage partition purged");
        }
        Ok(removed)
    }

    fn check_ownership(&self, ap: &AccessPoint) -> Result<()> {
        if ap.ownership != self.ownership {
            return Err(PeerFleetError::Allocation {
                path: ap.path.clone(),
                reason: format!(
                    "existing access point {} is owned by {}, expected {}",
                    ap.id, ap.ownership, self.ownership
                ),
            });
        }
        Ok(())
    }
}
