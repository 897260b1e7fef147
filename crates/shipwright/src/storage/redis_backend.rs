//! Redis-backed shared storage records.
//!
//! Each filesystem and access point is one JSON value. Creation uses
//! `SET NX`, so when two builders race on the same path the loser reads
//! back the winner's record instead of overwriting it.

use async_trait::async_trait;
use peerfleet_common::constants::redis_keys;
use peerfleet_common::{FileSystemHandle, PeerFleetError, PosixOwnership, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{AccessPoint, SharedStorage, access_point_id, file_system_id};

/// Shared storage records in Redis
#[derive(Clone)]
pub struct RedisStorage {
    /// Connection manager (auto-reconnecting)
    redis: ConnectionManager,
    encrypted: bool,
}

impl RedisStorage {
    pub fn new(redis: ConnectionManager, encrypted: bool) -> Self {
        Self { redis, encrypted }
    }

    fn access_point_key(fs: &FileSystemHandle, path: &str) -> String {
        format!("{}{}:{}", redis_keys::ACCESS_POINT_PREFIX, fs.id, path)
    }

    fn file_system_key(id: &str) -> String {
        format!("{}{}", redis_keys::FILESYSTEM_PREFIX, id)
    }
}

/// Connect to Redis with a connection manager (handles reconnection)
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url).map_err(redis_err)?;
    ConnectionManager::new(client).await.map_err(redis_err)
}

pub(crate) fn redis_err(e: redis::RedisError) -> PeerFleetError {
    PeerFleetError::Redis(e.to_string())
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| PeerFleetError::Internal(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, data: &str) -> Result<T> {
    serde_json::from_str(data)
        .map_err(|e| PeerFleetError::Internal(format!("corrupt record at {}: {}", key, e)))
}

/// `SET NX` the record, then read back whichever value won
pub(crate) async fn create_or_get<T>(redis: &ConnectionManager, key: &str, value: &T) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut conn = redis.clone();
    let created: bool = conn.set_nx(key, encode(value)?).await.map_err(redis_err)?;
    if created {
        tracing::debug!(key = %key, "Created record");
    }

    let data: Option<String> = conn.get(key).await.map_err(redis_err)?;
    match data {
        Some(d) => decode(key, &d),
        None => Err(PeerFleetError::Redis(format!("record {} vanished after create", key))),
    }
}

#[async_trait]
impl SharedStorage for RedisStorage {
    async fn create_filesystem(&self, name: &str) -> Result<FileSystemHandle> {
        let handle = FileSystemHandle {
            id: file_system_id(name),
            encrypted: self.encrypted,
        };
        create_or_get(&self.redis, &Self::file_system_key(&handle.id), &handle).await
    }

    async fn find_access_point(
        &self,
        fs: &FileSystemHandle,
        path: &str,
    ) -> Result<Option<AccessPoint>> {
        let key = Self::access_point_key(fs, path);
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(&key).await.map_err(redis_err)?;

        data.map(|d| decode(&key, &d)).transpose()
    }

    async fn create_access_point(
        &self,
        fs: &FileSystemHandle,
        path: &str,
        ownership: PosixOwnership,
    ) -> Result<AccessPoint> {
        let ap = AccessPoint {
            id: access_point_id(fs, path),
            file_system_id: fs.id.clone(),
            path: path.to_string(),
            ownership,
            created_at: chrono::Utc::now().timestamp(),
        };
        create_or_get(&self.redis, &Self::access_point_key(fs, path), &ap).await
    }

    async fn delete_access_point(&self, fs: &FileSystemHandle, path: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn
            .del(Self::access_point_key(fs, path))
            .await
            .map_err(redis_err)?;
        Ok(removed > 0)
    }
}
