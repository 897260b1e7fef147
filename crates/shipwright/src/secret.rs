//! Cluster secret generation.

use peerfleet_common::SharedSecret;
use std::fmt::Write;

/// Secret length in bytes; coordinators expect 64 hex characters
const SECRET_BYTES: usize = 32;

/// Generate a fresh random cluster secret, hex encoded
pub fn generate_cluster_secret() -> SharedSecret {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::Rng::fill(&mut rand::rng(), &mut bytes);

    let hex = bytes.iter().fold(String::with_capacity(SECRET_BYTES * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    });
    SharedSecret::new(hex)
}
