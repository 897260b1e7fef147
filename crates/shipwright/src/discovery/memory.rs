//! In-process discovery namespace.

use async_trait::async_trait;
use peerfleet_common::{DiscoveryRecord, NamespaceHandle, PeerFleetError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{DiscoveryRegistry, namespace_id, new_record};

/// Discovery namespaces kept in memory, keyed by namespace id
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    namespaces: Arc<RwLock<HashMap<String, (NamespaceHandle, BTreeMap<String, DiscoveryRecord>)>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound names in a namespace, sorted
    #[cfg(test)]
    pub async fn names(&self, ns: &NamespaceHandle) -> Vec<String> {
        self.namespaces
            .read()
            .await
            .get(&ns.id)
            .map(|(_, records)| records.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DiscoveryRegistry for MemoryRegistry {
    async fn create_namespace(&self, domain: &str) -> Result<NamespaceHandle> {
        let id = namespace_id(domain);
        let mut namespaces = self.namespaces.write().await;
        let (handle, _) = namespaces.entry(id.clone()).or_insert_with(|| {
            (
                NamespaceHandle {
                    id,
                    domain: domain.to_string(),
                },
                BTreeMap::new(),
            )
        });
        Ok(handle.clone())
    }

    async fn lookup(&self, ns: &NamespaceHandle, name: &str) -> Result<Option<DiscoveryRecord>> {
        let namespaces = self.namespaces.read().await;
        let (_, records) = namespaces
            .get(&ns.id)
            .ok_or_else(|| PeerFleetError::Discovery(format!("unknown namespace {}", ns.id)))?;
        Ok(records.get(name).cloned())
    }

    async fn register(
        &self,
        ns: &NamespaceHandle,
        name: &str,
        owner: &str,
    ) -> Result<DiscoveryRecord> {
        let mut namespaces = self.namespaces.write().await;
        let (_, records) = namespaces
            .get_mut(&ns.id)
            .ok_or_else(|| PeerFleetError::Discovery(format!("unknown namespace {}", ns.id)))?;

        let record = records
            .entry(name.to_string())
            .or_insert_with(|| new_record(ns, name, owner));
        Ok(record.clone())
    }

    async fn deregister(&self, ns: &NamespaceHandle, name: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().await;
        Ok(namespaces
            .get_mut(&ns.id)
            .and_then(|(_, records)| records.remove(name))
            .is_some())
    }
}
