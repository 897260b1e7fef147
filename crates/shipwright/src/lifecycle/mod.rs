//! Peer unit lifecycle.
//!
//! Launching is delegated to a [`ServiceLauncher`]; the
//! [`LifecycleTracker`] enforces node-before-cluster ordering and turns
//! exhausted liveness probes into DEGRADED.

mod launcher;
mod tracker;

pub use launcher::{LaunchReceipt, LocalLauncher, ServiceLauncher};
pub use tracker::{LifecycleTracker, ProbeObservation, ProbeOutcome, UnitStatus};
