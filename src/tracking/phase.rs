//! Tracker phases, the one-shot action ledger and the diagnostic status.

use std::collections::HashSet;

use serde::Serialize;

/// Fired once when a scheduled pass's start time is reached
pub const ACTION_IN_PROGRESS: &str = "IN_PROGRESS";

/// Fired once when a scheduled pass's end time is passed
pub const ACTION_COMPLETED: &str = "COMPLETED";

/// Where a tracker is in its maneuver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPhase {
    #[default]
    Idle,
    MovingSecondaryToTarget,
    Stabilizing,
    MovingToTarget,
    Active,
}

impl TrackingPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TrackingPhase::Idle => "idle",
            TrackingPhase::MovingSecondaryToTarget => "moving_secondary_to_target",
            TrackingPhase::Stabilizing => "stabilizing",
            TrackingPhase::MovingToTarget => "moving_to_target",
            TrackingPhase::Active => "active",
        }
    }
}

impl std::fmt::Display for TrackingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of side effects already performed in the current session
///
/// The orchestrator is polled, not event driven, so any action tied to a
/// condition (rather than a transition) would otherwise repeat every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionLedger {
    fired: HashSet<&'static str>,
}

impl ActionLedger {
    /// Record `action`; true only the first time
    pub fn fire(&mut self, action: &'static str) -> bool {
        self.fired.insert(action)
    }

    #[must_use]
    pub fn has_fired(&self, action: &str) -> bool {
        self.fired.contains(action)
    }

    pub fn clear(&mut self) {
        self.fired.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

/// Display-facing tracker summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerStatus {
    pub tracker: &'static str,
    pub phase: TrackingPhase,
    /// Phase name, or `error` when the last session aborted
    pub label: String,
    pub train_target_deg: Option<f64>,
    pub detail: Option<String>,
    pub last_error: Option<String>,
}
