//! # PeerFleet Common
//!
//! Shared types, errors, and constants used across PeerFleet components.
//!
//! ## Modules
//! - `types` - Core data model (PeerIndex, StoragePartition, SecurityRule, etc.)
//! - `error` - Common error type and `Result` alias
//! - `constants` - Ports, paths, probe timings, and key prefixes

pub mod constants;
pub mod error;
pub mod types;

pub use error::{PeerFleetError, Result};
pub use types::*;
