//! Peer topology construction.
//!
//! Given a fleet size N, derives every peer's storage partitions, process
//! specs, startup ordering, placement and discovery registration.

mod builder;
mod process;
mod unit;

pub use builder::{FleetTopology, PeerTopologyBuilder, PlacementTemplate, UnitFailure};
pub use process::ProcessSettings;
pub use unit::{PeerUnit, TaskSizing};

#[cfg(test)]
pub(crate) use unit::tests::wired_unit;
