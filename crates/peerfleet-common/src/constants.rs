//! Shared constants for PeerFleet components.

/// Default number of peers in a fleet
pub const DEFAULT_PEER_COUNT: u32 = 3;

/// Default private DNS namespace for peer discovery
pub const DEFAULT_NAMESPACE_DOMAIN: &str = "ipfs-cluster-3-peers.local";

/// Default control surface listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8686";

/// Default accept-all ingress source
pub const ANY_IPV4: &str = "0.0.0.0/0";

/// Storage node ports
pub mod ports {
    /// Peer-to-peer swarm transport (TCP and UDP)
    pub const SWARM: u16 = 4001;

    /// Storage node HTTP API
    pub const API: u16 = 5001;

    /// Read-only HTTP gateway
    pub const GATEWAY: u16 = 8080;

    /// Coordinator REST control API
    pub const CLUSTER_CONTROL: u16 = 9094;

    /// Coordinator API proxy endpoint
    pub const CLUSTER_PROXY: u16 = 9095;

    /// Coordinator swarm endpoint
    pub const CLUSTER_SWARM: u16 = 9096;

    /// NFS port of the shared filesystem
    pub const NFS: u16 = 2049;
}

/// POSIX identity owning every storage partition
pub mod posix {
    pub const OWNER_UID: u32 = 1000;
    pub const OWNER_GID: u32 = 1000;

    /// rwxr-xr-x
    pub const MODE: u32 = 0o755;
}

/// Liveness probe policy for the storage node
pub mod probe {
    pub const INTERVAL_SECS: u64 = 60;
    pub const TIMEOUT_SECS: u64 = 5;
    pub const START_PERIOD_SECS: u64 = 3;
    pub const RETRIES: u32 = 3;

    /// Probe command run inside the node container
    pub const COMMAND: &str =
        "wget -q -O - --post-data '' http://127.0.0.1:5001/api/v0/version || exit 1";
}

/// Container images and in-container paths
pub mod containers {
    pub const NODE_NAME: &str = "ipfs-node";
    pub const CLUSTER_NAME: &str = "ipfs-cluster";

    pub const NODE_IMAGE: &str = "ipfs/go-ipfs:latest";
    pub const CLUSTER_IMAGE: &str = "ipfs/ipfs-cluster:latest";

    pub const NODE_DATA_PATH: &str = "/data/ipfs";
    pub const CLUSTER_DATA_PATH: &str = "/data/ipfs-cluster";

    pub const NODE_VOLUME: &str = "volume-node";
    pub const CLUSTER_VOLUME: &str = "volume-cluster";

    /// Loopback address the coordinator uses to reach its node
    pub const NODE_LOOPBACK_MULTIADDR: &str = "/ip4/127.0.0.1/tcp/5001";

    /// Coordinator REST API listen address
    pub const CLUSTER_REST_LISTEN_MULTIADDR: &str = "/ip4/0.0.0.0/tcp/9094";

    /// Coordinator peer monitoring ping interval
    pub const MONITOR_PING_INTERVAL: &str = "2s";

    /// Accept every peer presenting the shared secret
    pub const TRUSTED_PEERS_ALL: &str = "*";

    /// Task sizing (CPU units, MiB)
    pub const TASK_CPU: u32 = 256;
    pub const TASK_MEMORY_MIB: u32 = 512;
}

/// Environment variable names passed to the deployed processes
pub mod env {
    pub const IPFS_LOGGING: &str = "IPFS_LOGGING";

    pub const CLUSTER_CRDT_TRUSTEDPEERS: &str = "CLUSTER_CRDT_TRUSTEDPEERS";
    pub const CLUSTER_IPFSHTTP_NODEMULTIADDRESS: &str = "CLUSTER_IPFSHTTP_NODEMULTIADDRESS";
    pub const CLUSTER_MONITORPINGINTERVAL: &str = "CLUSTER_MONITORPINGINTERVAL";
    pub const CLUSTER_PEERNAME: &str = "CLUSTER_PEERNAME";
    pub const CLUSTER_RESTAPI_HTTPLISTENMULTIADDRESS: &str =
        "CLUSTER_RESTAPI_HTTPLISTENMULTIADDRESS";
    pub const CLUSTER_SECRET: &str = "CLUSTER_SECRET";

    /// Keys whose values never leave the process in rendered output
    pub const SECRET_KEYS: &[&str] = &[CLUSTER_SECRET];
}

/// Redis key prefixes
pub mod redis_keys {
    /// Filesystem record: fleet:fs:{fs_id}
    pub const FILESYSTEM_PREFIX: &str = "fleet:fs:";

    /// Access point record: fleet:ap:{fs_id}:{path}
    pub const ACCESS_POINT_PREFIX: &str = "fleet:ap:";

    /// Namespace record: fleet:ns:{domain}
    pub const NAMESPACE_PREFIX: &str = "fleet:ns:";

    /// Discovery record: fleet:svc:{namespace_id}:{name}
    pub const SERVICE_PREFIX: &str = "fleet:svc:";
}
