//! Delegate tasks and correlated responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::FailureInfo;

/// Work a step asks the engine to hand to a remote worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Addressing key/values the worker needs (e.g. account, environment).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub abstractions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            abstractions: BTreeMap::new(),
            timeout_secs: None,
        }
    }
}

/// A task as submitted to the remote worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateTask {
    pub correlation_id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub abstractions: BTreeMap<String, String>,
    pub plan_execution_id: Uuid,
    pub node_execution_id: Uuid,
    pub timeout_secs: u64,
}

/// Result of handing a task to the remote worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted,
    Rejected { reason: String },
}

/// Payload delivered on a correlation ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ResponseData {
    Success {
        #[serde(default)]
        data: serde_json::Value,
    },
    Failure {
        failure: FailureInfo,
    },
}

impl ResponseData {
    pub fn success(data: serde_json::Value) -> Self {
        ResponseData::Success { data }
    }

    pub fn failure(failure: FailureInfo) -> Self {
        ResponseData::Failure { failure }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseData::Success { .. })
    }
}

/// Responses collected for one wait, keyed by correlation ID.
pub type ResponseBundle = BTreeMap<String, ResponseData>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::FailureKind;
    use serde_json::json;

    #[test]
    fn test_response_data_tagging() {
        let ok = ResponseData::success(json!({"exit_code": 0}));
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["result"], "success");
        assert_eq!(v["data"]["exit_code"], 0);

        let failed: ResponseData = serde_json::from_value(json!({
            "result": "failure",
            "failure": {"kind": "delegate_failure", "message": "boom"}
        }))
        .unwrap();
        match failed {
            ResponseData::Failure { failure } => {
                assert_eq!(failure.kind, FailureKind::DelegateFailure);
                assert!(!failure.retryable);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_submit_outcome_serde() {
        let rejected: SubmitOutcome =
            serde_json::from_value(json!({"outcome": "rejected", "reason": "queue full"})).unwrap();
        assert_eq!(rejected, SubmitOutcome::Rejected { reason: "queue full".into() });
    }
}
