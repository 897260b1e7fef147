//! Per-unit lifecycle state and liveness probe evaluation.

use peerfleet_common::{HealthCheck, PeerFleetError, PeerIndex, PeerState, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;

/// One liveness probe result reported by the launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeObservation {
    pub healthy: bool,
    /// Time since the node process started
    pub elapsed: Duration,
}

/// State of a unit after a probe observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub index: PeerIndex,
    pub state: PeerState,
    pub consecutive_failures: u32,
    /// Observation fell inside the start period and was not counted
    pub ignored: bool,
}

/// Lifecycle of one unit as seen by the tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub state: PeerState,
    pub consecutive_failures: u32,
    /// Node uptime, in seconds, at the last counted failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_secs: Option<u64>,
    /// Unix epoch seconds of the last state change
    pub updated_at: i64,
}

/// Tracks every unit's lifecycle.
///
/// Only ordering is enforced here: node before cluster, and DEGRADED only
/// once the probe policy is exhausted. Nothing in this tracker touches
/// storage or discovery, and a degraded unit is never torn down by it.
pub struct LifecycleTracker {
    policy: HealthCheck,
    units: RwLock<HashMap<PeerIndex, UnitStatus>>,
}

impl LifecycleTracker {
    pub fn new(policy: HealthCheck) -> Self {
        Self {
            policy,
            units: RwLock::new(HashMap::new()),
        }
    }

    /// Current state (UNPROVISIONED for unknown units)
    pub async fn state(&self, index: PeerIndex) -> PeerState {
        self.units
            .read()
            .await
            .get(&index)
            .map(|u| u.state)
            .unwrap_or_default()
    }

    /// All tracked units, by index
    pub async fn snapshot(&self) -> BTreeMap<PeerIndex, UnitStatus> {
        self.units
            .read()
            .await
            .iter()
            .map(|(index, u)| (*index, *u))
            .collect()
    }

    /// Move a unit to `next`.
    ///
    /// Starting the cluster before the node is a dependency violation; any
    /// other illegal move is an invalid transition.
    pub async fn transition(&self, index: PeerIndex, next: PeerState) -> Result<PeerState> {
        let mut units = self.units.write().await;
        let unit = units.entry(index).or_default();

        if !unit.state.can_transition_to(next) {
            let node_down = matches!(
                unit.state,
                PeerState::Unprovisioned | PeerState::StorageReady | PeerState::Terminated
            );
            if next == PeerState::ClusterStarted && node_down {
                return Err(PeerFleetError::DependencyViolation {
                    index: index.value(),
                    reason: format!("cluster process started while unit is {}", unit.state),
                });
            }
            return Err(PeerFleetError::InvalidTransition {
                index: index.value(),
                from: unit.state.to_string(),
                to: next.to_string(),
            });
        }

        tracing::debug!(peer = %index, from = %unit.state, to = %next, "Lifecycle transition");

        unit.state = next;
        unit.updated_at = chrono::Utc::now().timestamp();
        if matches!(next, PeerState::StorageReady | PeerState::Terminated) {
            unit.consecutive_failures = 0;
            unit.last_failure_secs = None;
        }

        Ok(next)
    }

    /// Apply a liveness probe observation.
    ///
    /// Failures inside the start period are not counted, and at most one
    /// failure is counted per probe interval. Once `retries` consecutive
    /// failures accumulate and the node has been up for at least
    /// `start_period + interval * retries`, a DISCOVERABLE unit becomes
    /// DEGRADED. A passing probe resets the count and restores a DEGRADED
    /// unit.
    pub async fn record_probe(
        &self,
        index: PeerIndex,
        observation: ProbeObservation,
    ) -> Result<ProbeOutcome> {
        let mut units = self.units.write().await;
        let unit = units.get_mut(&index).ok_or(PeerFleetError::PeerNotFound(index.value()))?;

        if unit.state != PeerState::NodeStarted && !unit.state.is_running() {
            return Err(PeerFleetError::InvalidInput(format!(
                "peer {} is {}, no node process to probe",
                index, unit.state
            )));
        }

        let elapsed_secs = observation.elapsed.as_secs();
        let in_start_period = observation.elapsed < self.policy.start_period();
        let within_interval = unit
            .last_failure_secs
            .is_some_and(|last| observation.elapsed < Duration::from_secs(last) + self.policy.interval());
        let mut ignored = false;

        if observation.healthy {
            unit.consecutive_failures = 0;
            unit.last_failure_secs = None;
            if unit.state == PeerState::Degraded {
                tracing::info!(peer = %index, "Peer recovered");
                unit.state = PeerState::Discoverable;
                unit.updated_at = chrono::Utc::now().timestamp();
            }
        } else if in_start_period || within_interval {
            ignored = true;
        } else {
            unit.consecutive_failures += 1;
            unit.last_failure_secs = Some(elapsed_secs);
            tracing::warn!(
                peer = %index,
                failures = unit.consecutive_failures,
                retries = self.policy.retries,
                "Liveness probe failed"
            );

            if unit.consecutive_failures >= self.policy.retries
                && observation.elapsed >= self.policy.earliest_failure()
                && unit.state == PeerState::Discoverable
            {
                let failure = PeerFleetError::HealthProbe {
                    index: index.value(),
                    consecutive_failures: unit.consecutive_failures,
                };
                tracing::error!(peer = %index, error = %failure, "Peer degraded");
                unit.state = PeerState::Degraded;
                unit.updated_at = chrono::Utc::now().timestamp();
            }
        }

        Ok(ProbeOutcome {
            index,
            state: unit.state,
            consecutive_failures: unit.consecutive_failures,
            ignored,
        })
    }
}
