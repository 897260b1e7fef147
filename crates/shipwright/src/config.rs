//! Configuration management for Shipwright.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use peerfleet_common::constants::{
    ANY_IPV4, DEFAULT_LISTEN_ADDR, DEFAULT_NAMESPACE_DOMAIN, DEFAULT_PEER_COUNT, containers, posix,
};
use peerfleet_common::{PosixOwnership, SharedSecret, Subnet};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Desired fleet size
    #[serde(default = "default_peers")]
    pub peers: u32,

    /// Control surface listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Redis URL for persistent storage/discovery state (in-memory if unset)
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Trust token for every coordinator. Never read from the config file.
    #[serde(skip)]
    pub cluster_secret: SharedSecret,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub processes: ProcessConfig,

    #[serde(default)]
    pub task: TaskConfig,
}

/// Shared filesystem configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Logical filesystem name; the filesystem id is derived from it
    #[serde(default = "default_file_system_name")]
    pub file_system_name: String,

    /// Encryption at rest
    #[serde(default = "default_true")]
    pub encrypted: bool,

    #[serde(default = "default_owner_uid")]
    pub owner_uid: u32,

    #[serde(default = "default_owner_gid")]
    pub owner_gid: u32,

    /// Permission bits (octal in TOML: `mode = 0o755`)
    #[serde(default = "default_mode")]
    pub mode: u32,
}

impl StorageConfig {
    pub fn ownership(&self) -> PosixOwnership {
        PosixOwnership {
            uid: self.owner_uid,
            gid: self.owner_gid,
            mode: self.mode,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_system_name: default_file_system_name(),
            encrypted: true,
            owner_uid: default_owner_uid(),
            owner_gid: default_owner_gid(),
            mode: default_mode(),
        }
    }
}

/// Discovery namespace configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_namespace_domain")]
    pub namespace_domain: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            namespace_domain: default_namespace_domain(),
        }
    }
}

/// Ingress policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// CIDRs allowed to reach peer ports
    #[serde(default = "default_allowed_sources")]
    pub allowed_sources: Vec<String>,

    /// Boundary shared by every peer
    #[serde(default = "default_peer_boundary")]
    pub peer_boundary: String,

    /// Boundary in front of the shared filesystem
    #[serde(default = "default_storage_boundary")]
    pub storage_boundary: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_sources: default_allowed_sources(),
            peer_boundary: default_peer_boundary(),
            storage_boundary: default_storage_boundary(),
        }
    }
}

/// Network placement configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_subnets")]
    pub subnets: Vec<Subnet>,

    #[serde(default = "default_true")]
    pub assign_public_ip: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            subnets: default_subnets(),
            assign_public_ip: true,
        }
    }
}

/// Container images and process settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_node_image")]
    pub node_image: String,

    #[serde(default = "default_cluster_image")]
    pub cluster_image: String,

    /// Storage daemon log level
    #[serde(default = "default_node_log_level")]
    pub node_log_level: String,

    /// Coordinator trusted-peers policy
    #[serde(default = "default_trusted_peers")]
    pub trusted_peers: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            node_image: default_node_image(),
            cluster_image: default_cluster_image(),
            node_log_level: default_node_log_level(),
            trusted_peers: default_trusted_peers(),
        }
    }
}

/// Per-unit task sizing
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_task_cpu")]
    pub cpu: u32,

    #[serde(default = "default_task_memory")]
    pub memory_mib: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            cpu: default_task_cpu(),
            memory_mib: default_task_memory(),
        }
    }
}

// Default value functions
fn default_peers() -> u32 { DEFAULT_PEER_COUNT }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_true() -> bool { true }
fn default_file_system_name() -> String { "peerfleet".to_string() }
fn default_owner_uid() -> u32 { posix::OWNER_UID }
fn default_owner_gid() -> u32 { posix::OWNER_GID }
fn default_mode() -> u32 { posix::MODE }
fn default_namespace_domain() -> String { DEFAULT_NAMESPACE_DOMAIN.to_string() }
fn default_allowed_sources() -> Vec<String> { vec![ANY_IPV4.to_string()] }
fn default_peer_boundary() -> String { "peer-security-group".to_string() }
fn default_storage_boundary() -> String { "storage-security-group".to_string() }
fn default_node_image() -> String { containers::NODE_IMAGE.to_string() }
fn default_cluster_image() -> String { containers::CLUSTER_IMAGE.to_string() }
fn default_node_log_level() -> String { "info".to_string() }
fn default_trusted_peers() -> String { containers::TRUSTED_PEERS_ALL.to_string() }
fn default_task_cpu() -> u32 { containers::TASK_CPU }
fn default_task_memory() -> u32 { containers::TASK_MEMORY_MIB }

fn default_subnets() -> Vec<Subnet> {
    vec![
        Subnet {
            id: "subnet-private-a".to_string(),
            cidr: "10.0.128.0/18".to_string(),
            private: true,
        },
        Subnet {
            id: "subnet-private-b".to_string(),
            cidr: "10.0.192.0/18".to_string(),
            private: true,
        },
    ]
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        if !Path::new(config_path).exists() {
            tracing::warn!("Config file {} not found, using defaults", config_path);
        }

        // Environment overrides apply whether or not the file exists
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("PEERFLEET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load config")?;

        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to parse config")?;

        // Apply CLI overrides
        if let Some(peers) = args.peers {
            config.peers = peers;
        }
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = Some(redis_url.clone());
        }
        if let Some(ref secret) = args.cluster_secret {
            config.cluster_secret = SharedSecret::new(secret.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a valid fleet
    pub fn validate(&self) -> Result<()> {
        if self.security.allowed_sources.is_empty() {
            anyhow::bail!("security.allowed_sources must list at least one CIDR");
        }
        if self.network.subnets.is_empty() {
            anyhow::bail!("network.subnets must list at least one subnet");
        }
        if self.storage.mode > 0o7777 {
            anyhow::bail!("storage.mode {:o} is not a permission mask", self.storage.mode);
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            peers: default_peers(),
            listen_addr: default_listen_addr(),
            redis_url: None,
            cluster_secret: SharedSecret::default(),
            storage: StorageConfig::default(),
            discovery: DiscoveryConfig::default(),
            security: SecurityConfig::default(),
            network: NetworkConfig::default(),
            processes: ProcessConfig::default(),
            task: TaskConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_fleet() {
        let config = AppConfig::default();
        assert_eq!(config.peers, 3);
        assert_eq!(config.discovery.namespace_domain, "ipfs-cluster-3-peers.local");
        assert_eq!(config.security.allowed_sources, vec!["0.0.0.0/0".to_string()]);
        assert_eq!(config.storage.ownership(), PosixOwnership::default());
        assert!(config.cluster_secret.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_applies_file_then_cli_overrides() {
        use clap::Parser;

        let path = std::env::temp_dir().join(format!("shipwright-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "peers = 5\n[security]\nallowed_sources = [\"10.0.0.0/8\"]\n[storage]\nmode = 0o750\n",
        )
        .unwrap();
        let path = path.to_string_lossy().to_string();

        let args = crate::Args::parse_from(["shipwright", "plan", "--peers", "7", "--cluster-secret", "abc"]);
        let config = AppConfig::load(&path, &args).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.peers, 7);
        assert_eq!(config.security.allowed_sources, vec!["10.0.0.0/8".to_string()]);
        assert_eq!(config.storage.mode, 0o750);
        assert_eq!(config.cluster_secret.expose(), "abc");
        assert_eq!(config.discovery.namespace_domain, "ipfs-cluster-3-peers.local");
    }

    #[test]
    fn test_env_overrides_apply_without_config_file() {
        use clap::Parser;

        // SAFETY: no other test reads or writes this variable
        unsafe { std::env::set_var("PEERFLEET__TASK__MEMORY_MIB", "1024") };

        let args = crate::Args::parse_from(["shipwright", "plan"]);
        let config = AppConfig::load("does/not/exist.toml", &args).unwrap();
        unsafe { std::env::remove_var("PEERFLEET__TASK__MEMORY_MIB") };

        assert_eq!(config.task.memory_mib, 1024);
        assert_eq!(config.peers, 3);
    }

    #[test]
    fn test_empty_sources_rejected() {
        let mut config = AppConfig::default();
        config.security.allowed_sources.clear();
        assert!(config.validate().is_err());
    }
}
