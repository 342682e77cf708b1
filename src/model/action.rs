use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Start,
    Stop,
    Restart,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Restart => "restart",
        }
    }

    /// Running flag the container should show once the action settled.
    pub fn expected_running(&self) -> bool {
        !matches!(self, ActionKind::Stop)
    }

    /// Status string shown while the action is in flight.
    pub fn transition_status(&self) -> &'static str {
        match self {
            ActionKind::Start => "starting",
            ActionKind::Stop => "stopping",
            ActionKind::Restart => "restarting",
        }
    }

    /// Whether the action may be issued against a target that is already
    /// transitioning. Only start supersedes.
    pub fn rejects_when_busy(&self) -> bool {
        !matches!(self, ActionKind::Start)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one issued action; results for superseded ids are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ActionId(pub u64);

/// Container fields captured before the optimistic flip, for rollback.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorState {
    pub is_running: bool,
    pub status: String,
}

/// An in-flight user command for one target.
#[derive(Clone, Debug)]
pub struct PendingAction {
    pub id: ActionId,
    pub target: String,
    pub kind: ActionKind,
    pub issued_at: Instant,
    /// The host accepted the command; now waiting for a snapshot to confirm.
    pub accepted: bool,
    pub prior: Option<PriorState>,
}

impl PendingAction {
    /// Whether a container in `is_running` state confirms this action.
    /// A restart only confirms after the host accepted it, since the
    /// container already looked running beforehand.
    pub fn is_fulfilled_by(&self, is_running: bool) -> bool {
        if is_running != self.kind.expected_running() {
            return false;
        }
        self.kind != ActionKind::Restart || self.accepted
    }
}

/// Why an action for one target did not go through.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionError {
    pub target: String,
    pub kind: ActionKind,
    pub reason: String,
    /// No confirmation arrived within the grace window (as opposed to an
    /// outright failure).
    pub stuck: bool,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetOutcome {
    pub target: String,
    pub success: bool,
    pub message: String,
}

/// Result of a (possibly bulk) dispatch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BulkSummary {
    pub action: ActionKind,
    pub total: usize,
    pub successful: usize,
    pub results: Vec<TargetOutcome>,
}

impl BulkSummary {
    pub fn from_outcomes(action: ActionKind, results: Vec<TargetOutcome>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            action,
            total: results.len(),
            successful,
            results,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn all_succeeded(&self) -> bool {
        self.successful == self.total
    }
}
