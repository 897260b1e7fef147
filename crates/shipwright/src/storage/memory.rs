//! In-process shared storage backend.

use async_trait::async_trait;
use peerfleet_common::{FileSystemHandle, PeerFleetError, PosixOwnership, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AccessPoint, SharedStorage, access_point_id, file_system_id};

/// Filesystem state: handle plus access points keyed by path
#[derive(Debug, Clone)]
struct FileSystemState {
    handle: FileSystemHandle,
    access_points: BTreeMap<String, AccessPoint>,
}

/// Shared storage kept in memory. Clones share state, so a second build
/// against the same instance sees everything the first one created.
#[derive(Clone)]
pub struct MemoryStorage {
    encrypted: bool,
    file_systems: Arc<RwLock<HashMap<String, FileSystemState>>>,
}

impl MemoryStorage {
    pub fn new(encrypted: bool) -> Self {
        Self {
            encrypted,
            file_systems: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of access points on a filesystem
    #[cfg(test)]
    pub async fn access_point_count(&self, fs: &FileSystemHandle) -> usize {
        self.file_systems
            .read()
            .await
            .get(&fs.id)
            .map(|state| state.access_points.len())
            .unwrap_or(0)
    }

    /// All access point paths on a filesystem, sorted
    #[cfg(test)]
    pub async fn access_point_paths(&self, fs: &FileSystemHandle) -> Vec<String> {
        self.file_systems
            .read()
            .await
            .get(&fs.id)
            .map(|state| state.access_points.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Place an access point as if created out of band
    #[cfg(test)]
    pub async fn seed_access_point(&self, fs: &FileSystemHandle, ap: AccessPoint) {
        let mut file_systems = self.file_systems.write().await;
        if let Some(state) = file_systems.get_mut(&fs.id) {
            state.access_points.insert(ap.path.clone(), ap);
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl SharedStorage for MemoryStorage {
    async fn create_filesystem(&self, name: &str) -> Result<FileSystemHandle> {
        let id = file_system_id(name);
        let mut file_systems = self.file_systems.write().await;

        let state = file_systems.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(fs = %id, "Created in-memory filesystem");
            FileSystemState {
                handle: FileSystemHandle {
                    id: id.clone(),
                    encrypted: self.encrypted,
                },
                access_points: BTreeMap::new(),
            }
        });

        Ok(state.handle.clone())
    }

    async fn find_access_point(
        &self,
        fs: &FileSystemHandle,
        path: &str,
    ) -> Result<Option<AccessPoint>> {
        let file_systems = self.file_systems.read().await;
        let state = file_systems
            .get(&fs.id)
            .ok_or_else(|| PeerFleetError::Storage(format!("unknown filesystem {}", fs.id)))?;

        Ok(state.access_points.get(path).cloned())
    }

    async fn create_access_point(
        &self,
        fs: &FileSystemHandle,
        path: &str,
        ownership: PosixOwnership,
    ) -> Result<AccessPoint> {
        let mut file_systems = self.file_systems.write().await;
        let state = file_systems
            .get_mut(&fs.id)
            .ok_or_else(|| PeerFleetError::Storage(format!("unknown filesystem {}", fs.id)))?;

        let ap = state
            .access_points
            .entry(path.to_string())
            .or_insert_with(|| AccessPoint {
                id: access_point_id(fs, path),
                file_system_id: fs.id.clone(),
                path: path.to_string(),
                ownership,
                created_at: chrono::Utc::now().timestamp(),
            });

        Ok(ap.clone())
    }

    async fn delete_access_point(&self, fs: &FileSystemHandle, path: &str) -> Result<bool> {
        let mut file_systems = self.file_systems.write().await;
        Ok(file_systems
            .get_mut(&fs.id)
            .and_then(|state| state.access_points.remove(path))
            .is_some())
    }
}
