//! DNS-based peer discovery.
//!
//! A private namespace maps `peer-{i}` to an address-resolving record. The
//! registry only stores bindings; deciding whether an existing binding
//! conflicts is the caller's job, since only it knows which unit asked.

mod memory;
mod redis_backend;

pub use memory::MemoryRegistry;
pub use redis_backend::RedisRegistry;

use async_trait::async_trait;
use peerfleet_common::{DiscoveryRecord, NamespaceHandle, Result};

/// Backend contract for the discovery namespace
#[async_trait]
pub trait DiscoveryRegistry: Send + Sync {
    /// Create the namespace, or return it if it already exists
    async fn create_namespace(&self, domain: &str) -> Result<NamespaceHandle>;

    async fn lookup(&self, ns: &NamespaceHandle, name: &str) -> Result<Option<DiscoveryRecord>>;

    /// Bind `name` to `owner`. If the name is already bound, the existing
    /// record is returned unchanged, whoever owns it.
    async fn register(
        &self,
        ns: &NamespaceHandle,
        name: &str,
        owner: &str,
    ) -> Result<DiscoveryRecord>;

    /// Remove a binding. Returns false if the name was not bound.
    async fn deregister(&self, ns: &NamespaceHandle, name: &str) -> Result<bool>;
}

/// Deterministic namespace id for a domain
pub(crate) fn namespace_id(domain: &str) -> String {
    format!("ns-{}", domain.replace('.', "-"))
}

pub(crate) fn new_record(ns: &NamespaceHandle, name: &str, owner: &str) -> DiscoveryRecord {
    DiscoveryRecord {
        name: name.to_string(),
        namespace_id: ns.id.clone(),
        record_type: peerfleet_common::DnsRecordType::A,
        address: format!("{}.{}", name, ns.domain),
        owner: owner.to_string(),
        registered_at: chrono::Utc::now().timestamp(),
    }
}
