//! Node lifecycle status.
//!
//! The legal transitions between these states live in
//! `pipewright_core::state::transition`; this module only names the states
//! and classifies them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a `NodeExecution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Queued,
    Running,
    AsyncWaiting,
    TaskWaiting,
    Paused,
    InterventionWaiting,
    Succeeded,
    Failed,
    Errored,
    Aborted,
    Expired,
    Skipped,
}

impl Status {
    pub const ALL: [Status; 12] = [
        Status::Queued,
        Status::Running,
        Status::AsyncWaiting,
        Status::TaskWaiting,
        Status::Paused,
        Status::InterventionWaiting,
        Status::Succeeded,
        Status::Failed,
        Status::Errored,
        Status::Aborted,
        Status::Expired,
        Status::Skipped,
    ];

    /// Terminal states accept no ordinary transition afterwards.
    ///
    /// `Errored` is not terminal; an errored node still awaits
    /// an adviser or interrupt decision.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::Failed | Status::Aborted | Status::Expired | Status::Skipped
        )
    }

    /// Waiting on an external response (callback or delegate task).
    pub fn is_response_waiting(&self) -> bool {
        matches!(self, Status::AsyncWaiting | Status::TaskWaiting)
    }

    /// Outcome states that count as a failure for advising and joins.
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed | Status::Errored | Status::Expired)
    }

    /// Final statuses as seen by a parent's join: terminal, or errored.
    pub fn is_final(&self) -> bool {
        self.is_terminal() || *self == Status::Errored
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::AsyncWaiting => "async_waiting",
            Status::TaskWaiting => "task_waiting",
            Status::Paused => "paused",
            Status::InterventionWaiting => "intervention_waiting",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Errored => "errored",
            Status::Aborted => "aborted",
            Status::Expired => "expired",
            Status::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_ascii_lowercase();
        Status::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == normalized)
            .ok_or_else(|| format!("unknown status: '{s}'"))
    }
}
