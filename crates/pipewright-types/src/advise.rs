use std::fmt;

use serde::{Deserialize, Serialize};

/// Control action an adviser chooses after a status event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdviseAction {
    /// Continue with the named sibling nodes (empty: hand control back to
    /// the parent).
    Proceed {
        #[serde(default)]
        next_node_ids: Vec<String>,
    },
    /// Re-run the node after `wait_ms`, as long as fewer than `max_attempts`
    /// retries have been made.
    Retry { wait_ms: u64, max_attempts: u32 },
    Ignore,
    Abort,
    /// Park the node until a manual interrupt arrives; escalate to abort
    /// after `timeout_secs`.
    InterventionWait { timeout_secs: u64 },
    MarkSuccess,
}

impl AdviseAction {
    pub fn name(&self) -> &'static str {
        match self {
            AdviseAction::Proceed { .. } => "proceed",
            AdviseAction::Retry { .. } => "retry",
            AdviseAction::Ignore => "ignore",
            AdviseAction::Abort => "abort",
            AdviseAction::InterventionWait { .. } => "intervention_wait",
            AdviseAction::MarkSuccess => "mark_success",
        }
    }
}

impl fmt::Display for AdviseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
