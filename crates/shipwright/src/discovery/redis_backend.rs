//! Redis-backed discovery records.

use async_trait::async_trait;
use peerfleet_common::constants::redis_keys;
use peerfleet_common::{DiscoveryRecord, NamespaceHandle, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{DiscoveryRegistry, namespace_id, new_record};
use crate::storage::redis_backend::{create_or_get, decode, redis_err};

/// Discovery namespace stored in Redis
#[derive(Clone)]
pub struct RedisRegistry {
    redis: ConnectionManager,
}

impl RedisRegistry {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn namespace_key(domain: &str) -> String {
        format!("{}{}", redis_keys::NAMESPACE_PREFIX, domain)
    }

    fn service_key(ns: &NamespaceHandle, name: &str) -> String {
        format!("{}{}:{}", redis_keys::SERVICE_PREFIX, ns.id, name)
    }
}

#[async_trait]
impl DiscoveryRegistry for RedisRegistry {
    async fn create_namespace(&self, domain: &str) -> Result<NamespaceHandle> {
        let handle = NamespaceHandle {
            id: namespace_id(domain),
            domain: domain.to_string(),
        };
        create_or_get(&self.redis, &Self::namespace_key(domain), &handle).await
    }

    async fn lookup(&self, ns: &NamespaceHandle, name: &str) -> Result<Option<DiscoveryRecord>> {
        let key = Self::service_key(ns, name);
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(&key).await.map_err(redis_err)?;
        data.map(|d| decode(&key, &d)).transpose()
    }

    async fn register(
        &self,
        ns: &NamespaceHandle,
        name: &str,
        owner: &str,
    ) -> Result<DiscoveryRecord> {
        let record = new_record(ns, name, owner);
        create_or_get(&self.redis, &Self::service_key(ns, name), &record).await
    }

    async fn deregister(&self, ns: &NamespaceHandle, name: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn
            .del(Self::service_key(ns, name))
            .await
            .map_err(redis_err)?;
        Ok(removed > 0)
    }
}
