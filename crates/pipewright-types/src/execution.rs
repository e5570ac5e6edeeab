//! NodeExecution: the mutable runtime record of one scheduled PlanNode.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advise::AdviseAction;
use crate::ambiance::Ambiance;
use crate::interrupt::InterruptEffect;
use crate::status::Status;
use crate::task::ResponseData;

/// Step outputs keyed by name.
pub type Outcomes = BTreeMap<String, serde_json::Value>;

/// How a node is run, as chosen by facilitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    Async,
    Task,
    TaskChain,
    Child,
    Children,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sync => "sync",
            ExecutionMode::Async => "async",
            ExecutionMode::Task => "task",
            ExecutionMode::TaskChain => "task_chain",
            ExecutionMode::Child => "child",
            ExecutionMode::Children => "children",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failure, so advisers can special-case it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The step itself reported failure.
    Application,
    /// Unresolvable facilitator, adviser or step type. Never retried.
    Configuration,
    /// A deadline elapsed before a response arrived.
    Timeout,
    /// The remote worker refused the submitted task.
    DelegateRejected,
    /// The remote worker reported a failure result.
    DelegateFailure,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl FailureInfo {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let retryable = !matches!(kind, FailureKind::Configuration);
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Configuration, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }
}

/// Final result of a step (sync execution or resume after a response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: Status,
    #[serde(default)]
    pub outcomes: Outcomes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl StepResponse {
    pub fn succeeded(outcomes: Outcomes) -> Self {
        Self {
            status: Status::Succeeded,
            outcomes,
            failure: None,
        }
    }

    pub fn failed(failure: FailureInfo) -> Self {
        Self {
            status: Status::Failed,
            outcomes: Outcomes::new(),
            failure: Some(failure),
        }
    }

    pub fn errored(failure: FailureInfo) -> Self {
        Self {
            status: Status::Errored,
            outcomes: Outcomes::new(),
            failure: Some(failure),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: Status::Skipped,
            outcomes: Outcomes::new(),
            failure: None,
        }
    }
}

/// Descriptor of what a node is currently waiting on.
///
/// Persisted on the record so waiters can be re-registered after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutableHandle {
    Sync,
    Async {
        callback_ids: Vec<String>,
    },
    Task {
        correlation_id: String,
        task_type: String,
    },
    TaskChain {
        correlation_id: String,
        task_type: String,
        link_index: u32,
    },
    Child {
        node_id: String,
    },
    Children {
        node_ids: Vec<String>,
    },
}

impl ExecutableHandle {
    /// Correlation IDs the node is waiting on.
    pub fn correlation_ids(&self, node_execution_id: Uuid) -> Vec<String> {
        match self {
            ExecutableHandle::Sync => Vec::new(),
            ExecutableHandle::Async { callback_ids } => callback_ids.clone(),
            ExecutableHandle::Task { correlation_id, .. }
            | ExecutableHandle::TaskChain { correlation_id, .. } => vec![correlation_id.clone()],
            ExecutableHandle::Child { .. } | ExecutableHandle::Children { .. } => {
                vec![children_correlation_id(node_execution_id)]
            }
        }
    }
}

/// Correlation key a parent waits on for its children's join.
pub fn children_correlation_id(parent_id: Uuid) -> String {
    format!("children-{parent_id}")
}

/// The mutable runtime record of one scheduled PlanNode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: Uuid,
    pub plan_execution_id: Uuid,
    pub node_id: String,
    pub ambiance: Ambiance,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Set once the node's outcome is settled and reported to its parent.
    /// A failed node awaiting a retry or an intervention is not concluded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concluded_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    /// None only for the root node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Insertion-ordered.
    #[serde(default)]
    pub child_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_decision: Option<AdviseAction>,
    #[serde(default)]
    pub outcomes: Outcomes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ExecutableHandle>,
    /// Status to return to when a PAUSED node is resumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_from: Option<Status>,
    /// Responses accepted for the current wait and not yet handed to the
    /// step. Held while the node is paused and replayed after a restart.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parked_responses: BTreeMap<String, ResponseData>,
    pub retry_index: u32,
    /// IDs of the earlier attempts this record replaces, oldest first.
    #[serde(default)]
    pub retry_ids: Vec<Uuid>,
    /// Set once a newer attempt has replaced this record.
    #[serde(default)]
    pub old_retry: bool,
    #[serde(default)]
    pub interrupt_history: Vec<InterruptEffect>,
    pub version: u64,
}

impl NodeExecution {
    /// A fresh QUEUED record addressed by `ambiance` (whose current level
    /// carries the record's ID).
    pub fn queued(ambiance: Ambiance, node_id: impl Into<String>, parent_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        let (id, retry_index) = ambiance
            .current_level()
            .map(|l| (l.node_execution_id, l.retry_index))
            .unwrap_or_else(|| (Uuid::now_v7(), 0));
        Self {
            id,
            plan_execution_id: ambiance.plan_execution_id,
            node_id: node_id.into(),
            ambiance,
            status: Status::Queued,
            mode: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            concluded_at: None,
            last_updated_at: now,
            parent_id,
            child_ids: Vec::new(),
            adviser_decision: None,
            outcomes: Outcomes::new(),
            failure: None,
            handle: None,
            paused_from: None,
            parked_responses: BTreeMap::new(),
            retry_index,
            retry_ids: Vec::new(),
            old_retry: false,
            interrupt_history: Vec::new(),
            version: 0,
        }
    }

    /// A failure the adviser chose to ignore counts as non-failed for the
    /// parent's join.
    pub fn is_ignored_failure(&self) -> bool {
        self.status.is_failure() && matches!(self.adviser_decision, Some(AdviseAction::Ignore))
    }

    /// Correlations of the current wait that have no received response yet.
    pub fn outstanding_correlations(&self) -> Vec<String> {
        self.handle
            .as_ref()
            .map(|h| h.correlation_ids(self.id))
            .unwrap_or_default()
            .into_iter()
            .filter(|id| !self.parked_responses.contains_key(id))
            .collect()
    }

    /// Whether every correlation of the current wait has been answered.
    pub fn has_complete_response(&self) -> bool {
        self.handle.is_some()
            && !self.parked_responses.is_empty()
            && self.outstanding_correlations().is_empty()
    }

    /// Whether this record failed in a way its parent should see.
    pub fn counts_as_failure(&self) -> bool {
        (self.status.is_failure() || self.status == Status::Aborted) && !self.is_ignored_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambiance::{Level, StepType};

    fn ambiance_with(node_id: &str) -> Ambiance {
        Ambiance::new(Uuid::now_v7(), Uuid::now_v7()).with_level(Level {
            node_id: node_id.into(),
            node_execution_id: Uuid::now_v7(),
            step_type: StepType::new("noop"),
            retry_index: 2,
            start_ts: Utc::now(),
        })
    }

    #[test]
    fn test_queued_takes_id_from_ambiance() {
        let amb = ambiance_with("a");
        let expected = amb.node_execution_id().unwrap();
        let ne = NodeExecution::queued(amb, "a", None);
        assert_eq!(ne.id, expected);
        assert_eq!(ne.status, Status::Queued);
        assert_eq!(ne.retry_index, 2);
        assert_eq!(ne.version, 0);
    }

    #[test]
    fn test_ignored_failure_does_not_count() {
        let mut ne = NodeExecution::queued(ambiance_with("a"), "a", None);
        ne.status = Status::Failed;
        assert!(ne.counts_as_failure());
        ne.adviser_decision = Some(AdviseAction::Ignore);
        assert!(ne.is_ignored_failure());
        assert!(!ne.counts_as_failure());
    }

    #[test]
    fn test_received_responses_complete_the_wait() {
        let mut ne = NodeExecution::queued(ambiance_with("a"), "a", None);
        ne.handle = Some(ExecutableHandle::Async {
            callback_ids: vec!["cb-1".into(), "cb-2".into()],
        });
        assert!(!ne.has_complete_response());
        assert_eq!(ne.outstanding_correlations(), vec!["cb-1", "cb-2"]);

        ne.parked_responses
            .insert("cb-2".into(), ResponseData::success(serde_json::json!(null)));
        assert_eq!(ne.outstanding_correlations(), vec!["cb-1"]);
        assert!(!ne.has_complete_response());

        ne.parked_responses
            .insert("cb-1".into(), ResponseData::success(serde_json::json!(null)));
        assert!(ne.outstanding_correlations().is_empty());
        assert!(ne.has_complete_response());
    }

    #[test]
    fn test_configuration_failure_not_retryable() {
        assert!(!FailureInfo::configuration("no facilitator").retryable);
        assert!(FailureInfo::timeout("deadline").retryable);
    }

    #[test]
    fn test_handle_correlation_ids() {
        let id = Uuid::now_v7();
        let handle = ExecutableHandle::Children { node_ids: vec!["a".into(), "b".into()] };
        assert_eq!(handle.correlation_ids(id), vec![children_correlation_id(id)]);

        let task = ExecutableHandle::Task {
            correlation_id: "c-1".into(),
            task_type: "shell".into(),
        };
        assert_eq!(task.correlation_ids(id), vec!["c-1".to_string()]);
        assert!(ExecutableHandle::Sync.correlation_ids(id).is_empty());
    }
}
