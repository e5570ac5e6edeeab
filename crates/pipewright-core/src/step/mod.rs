//! Step implementation contract.
//!
//! A step type implements [`Step`]: it declares the execution mode it wants
//! when no facilitator is obtained, executes against its parameters, and
//! (for async, task and child modes) turns the correlated responses into a
//! final [`StepResponse`]. Steps never touch node records; the engine owns
//! every status transition.

pub mod box_step;
pub mod builtin;
pub mod registry;

use std::future::Future;

use pipewright_types::ambiance::Ambiance;
use pipewright_types::execution::{ExecutionMode, Outcomes, StepResponse};
use pipewright_types::plan::PlanNode;
use pipewright_types::task::{ResponseBundle, ResponseData, TaskRequest};

pub use box_step::BoxStep;
pub use registry::StepRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid step parameters: {0}")]
    InvalidParameters(String),

    #[error("step failed: {0}")]
    Failed(String),

    #[error("step does not support {0}")]
    Unsupported(String),
}

/// What a step asks the engine to do after `execute`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutableResponse {
    /// Finished inline.
    Sync(StepResponse),
    /// Wait for external callbacks on these correlation IDs.
    Async {
        callback_ids: Vec<String>,
        timeout_secs: Option<u64>,
    },
    /// Hand one task to a remote worker.
    Task(TaskRequest),
    /// First link of a task chain; later links come from `next_link`.
    TaskChain(TaskRequest),
    Child { node_id: String },
    Children { node_ids: Vec<String> },
}

impl ExecutableResponse {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            ExecutableResponse::Sync(_) => ExecutionMode::Sync,
            ExecutableResponse::Async { .. } => ExecutionMode::Async,
            ExecutableResponse::Task(_) => ExecutionMode::Task,
            ExecutableResponse::TaskChain(_) => ExecutionMode::TaskChain,
            ExecutableResponse::Child { .. } => ExecutionMode::Child,
            ExecutableResponse::Children { .. } => ExecutionMode::Children,
        }
    }

    /// Whether this response is acceptable under the facilitated `mode`.
    ///
    /// A step may always finish inline, and a single task is a chain of one.
    pub fn fits(&self, mode: ExecutionMode) -> bool {
        let own = self.mode();
        own == mode
            || own == ExecutionMode::Sync
            || (own == ExecutionMode::Task && mode == ExecutionMode::TaskChain)
    }
}

/// Contract every step type implements.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
/// Use [`BoxStep`] for dynamic dispatch.
pub trait Step: Send + Sync {
    /// Mode used when the plan node obtains no facilitator.
    fn facilitate_default(&self) -> ExecutionMode;

    fn execute(
        &self,
        ambiance: &Ambiance,
        node: &PlanNode,
        inputs: &Outcomes,
    ) -> impl Future<Output = Result<ExecutableResponse, StepError>> + Send;

    /// Produce the final response once every awaited correlation resolved.
    /// The default merges successful payloads into outcomes and fails on the
    /// first failure.
    fn resume_after_response(
        &self,
        _ambiance: &Ambiance,
        _node: &PlanNode,
        responses: &ResponseBundle,
    ) -> impl Future<Output = Result<StepResponse, StepError>> + Send {
        let response = aggregate_responses(responses);
        async move { Ok(response) }
    }

    /// Next task of a chain after link `completed_link` answered, or `None`
    /// to finish the chain.
    fn next_link(
        &self,
        _ambiance: &Ambiance,
        _node: &PlanNode,
        _completed_link: u32,
        _responses: &ResponseBundle,
    ) -> impl Future<Output = Result<Option<TaskRequest>, StepError>> + Send {
        async { Ok(None) }
    }
}

/// Fold a response bundle into a step response.
pub fn aggregate_responses(responses: &ResponseBundle) -> StepResponse {
    let mut outcomes = Outcomes::new();
    for (key, data) in responses {
        match data {
            ResponseData::Failure { failure } => return StepResponse::failed(failure.clone()),
            ResponseData::Success { data } => match data {
                serde_json::Value::Object(map) => {
                    outcomes.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                serde_json::Value::Null => {}
                other => {
                    outcomes.insert(key.clone(), other.clone());
                }
            },
        }
    }
    StepResponse::succeeded(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_types::execution::{FailureInfo, FailureKind};
    use pipewright_types::status::Status;
    use serde_json::json;

    #[test]
    fn test_aggregate_merges_objects() {
        let mut bundle = ResponseBundle::new();
        bundle.insert("a".into(), ResponseData::success(json!({"x": 1})));
        bundle.insert("b".into(), ResponseData::success(json!("plain")));
        let r = aggregate_responses(&bundle);
        assert_eq!(r.status, Status::Succeeded);
        assert_eq!(r.outcomes["x"], 1);
        assert_eq!(r.outcomes["b"], "plain");
    }

    #[test]
    fn test_aggregate_fails_on_failure() {
        let mut bundle = ResponseBundle::new();
        bundle.insert("a".into(), ResponseData::success(json!({"x": 1})));
        bundle.insert(
            "b".into(),
            ResponseData::failure(FailureInfo::new(FailureKind::DelegateFailure, "exit 1")),
        );
        let r = aggregate_responses(&bundle);
        assert_eq!(r.status, Status::Failed);
        assert_eq!(r.failure.unwrap().message, "exit 1");
    }

    #[test]
    fn test_fits_mode() {
        let task = ExecutableResponse::Task(TaskRequest::new("shell", json!({})));
        assert!(task.fits(ExecutionMode::Task));
        assert!(task.fits(ExecutionMode::TaskChain));
        assert!(!task.fits(ExecutionMode::Async));
        let sync = ExecutableResponse::Sync(StepResponse::skipped());
        assert!(sync.fits(ExecutionMode::Children));
    }
}
