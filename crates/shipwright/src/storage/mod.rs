//! Shared persistent storage.
//!
//! One network filesystem is carved into per-peer, per-role access points.
//! Backends implement [`SharedStorage`]; [`SharedStoragePartitioner`] owns
//! the path derivation and ownership reconciliation.

mod memory;
mod partitioner;
pub(crate) mod redis_backend;

pub use memory::MemoryStorage;
pub use partitioner::SharedStoragePartitioner;
pub use redis_backend::{RedisStorage, connect};

use async_trait::async_trait;
use peerfleet_common::{FileSystemHandle, PosixOwnership, Result};
use serde::{Deserialize, Serialize};

/// An access point: a path-scoped entry into the shared filesystem whose
/// root is created with fixed ownership and whose clients act as that owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub id: String,
    pub file_system_id: String,
    pub path: String,
    pub ownership: PosixOwnership,
    /// Unix epoch seconds
    pub created_at: i64,
}

/// Backend contract for the shared filesystem
#[async_trait]
pub trait SharedStorage: Send + Sync {
    /// Create the filesystem, or return it if it already exists
    async fn create_filesystem(&self, name: &str) -> Result<FileSystemHandle>;

    /// Look up the access point rooted at `path`
    async fn find_access_point(
        &self,
        fs: &FileSystemHandle,
        path: &str,
    ) -> Result<Option<AccessPoint>>;

    /// Create an access point at `path`. If one already exists it is
    /// returned unchanged, whatever its ownership.
    async fn create_access_point(
        &self,
        fs: &FileSystemHandle,
        path: &str,
        ownership: PosixOwnership,
    ) -> Result<AccessPoint>;

    /// Remove the access point at `path`. Returns false if none existed.
    async fn delete_access_point(&self, fs: &FileSystemHandle, path: &str) -> Result<bool>;
}

/// Deterministic filesystem id for a logical name
pub(crate) fn file_system_id(name: &str) -> String {
    format!("fs-{}", name)
}

/// Deterministic access point id for a path on a filesystem
pub(crate) fn access_point_id(fs: &FileSystemHandle, path: &str) -> String {
    format!("fsap-{}-{}", fs.id.trim_start_matches("fs-"), path.trim_start_matches('/'))
}
