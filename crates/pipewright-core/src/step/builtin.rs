//! Generic built-in steps.
//!
//! These are structural steps, not product steps: `noop`, `fork`,
//! `section`, `delegate` and `wait`. Each owns the decoding of its own
//! parameters.

use std::collections::BTreeMap;

use pipewright_types::ambiance::Ambiance;
use pipewright_types::execution::{ExecutionMode, FailureInfo, Outcomes, StepResponse};
use pipewright_types::plan::PlanNode;
use pipewright_types::task::{ResponseBundle, ResponseData, TaskRequest};
use serde::Deserialize;

use super::{ExecutableResponse, Step, StepError};

fn decode<T: for<'de> Deserialize<'de>>(node: &PlanNode) -> Result<T, StepError> {
    node.parameters()
        .map_err(|e| StepError::InvalidParameters(format!("{}: {e}", node.id)))
}

// ---------------------------------------------------------------------------
// noop
// ---------------------------------------------------------------------------

/// Succeeds inline, publishing its parameters as outcomes.
#[derive(Debug, Default)]
pub struct NoopStep;

impl Step for NoopStep {
    fn facilitate_default(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    async fn execute(
        &self,
        _ambiance: &Ambiance,
        node: &PlanNode,
        _inputs: &Outcomes,
    ) -> Result<ExecutableResponse, StepError> {
        let outcomes: Outcomes = match &node.step_parameters {
            serde_json::Value::Object(map) => {
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            serde_json::Value::Null => Outcomes::new(),
            other => BTreeMap::from([("value".to_string(), other.clone())]),
        };
        Ok(ExecutableResponse::Sync(StepResponse::succeeded(outcomes)))
    }
}

// ---------------------------------------------------------------------------
// fork / section
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ForkParameters {
    children: Vec<String>,
}

/// Starts every listed child in parallel and succeeds once all of them
/// concluded without an unignored failure.
#[derive(Debug, Default)]
pub struct ForkStep;

impl Step for ForkStep {
    fn facilitate_default(&self) -> ExecutionMode {
        ExecutionMode::Children
    }

    async fn execute(
        &self,
        _ambiance: &Ambiance,
        node: &PlanNode,
        _inputs: &Outcomes,
    ) -> Result<ExecutableResponse, StepError> {
        let params: ForkParameters = decode(node)?;
        Ok(ExecutableResponse::Children {
            node_ids: params.children,
        })
    }

    async fn resume_after_response(
        &self,
        _ambiance: &Ambiance,
        _node: &PlanNode,
        responses: &ResponseBundle,
    ) -> Result<StepResponse, StepError> {
        Ok(join_children(responses))
    }
}

#[derive(Debug, Deserialize)]
struct SectionParameters {
    child: String,
}

/// Runs a single child node and takes on its outcome.
#[derive(Debug, Default)]
pub struct SectionStep;

impl Step for SectionStep {
    fn facilitate_default(&self) -> ExecutionMode {
        ExecutionMode::Child
    }

    async fn execute(
        &self,
        _ambiance: &Ambiance,
        node: &PlanNode,
        _inputs: &Outcomes,
    ) -> Result<ExecutableResponse, StepError> {
        let params: SectionParameters = decode(node)?;
        Ok(ExecutableResponse::Child {
            node_id: params.child,
        })
    }

    async fn resume_after_response(
        &self,
        _ambiance: &Ambiance,
        _node: &PlanNode,
        responses: &ResponseBundle,
    ) -> Result<StepResponse, StepError> {
        Ok(join_children(responses))
    }
}

/// Child bundles are keyed by child node ID; outcomes are nested under it.
fn join_children(responses: &ResponseBundle) -> StepResponse {
    let mut outcomes = Outcomes::new();
    for (node_id, data) in responses {
        match data {
            ResponseData::Success { data } => {
                outcomes.insert(node_id.clone(), data.clone());
            }
            ResponseData::Failure { failure } => {
                return StepResponse::failed(FailureInfo {
                    kind: failure.kind,
                    message: format!("child '{node_id}' failed: {}", failure.message),
                    retryable: failure.retryable,
                });
            }
        }
    }
    StepResponse::succeeded(outcomes)
}

// ---------------------------------------------------------------------------
// delegate
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DelegateParameters {
    task_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    abstractions: BTreeMap<String, String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    /// Further links; present only for task-chain nodes.
    #[serde(default)]
    chain: Vec<TaskRequest>,
}

impl DelegateParameters {
    fn first_task(&self) -> TaskRequest {
        TaskRequest {
            task_type: self.task_type.clone(),
            payload: self.payload.clone(),
            abstractions: self.abstractions.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Hands its parameters to a remote worker. With a non-empty `chain` the
/// node runs as a task chain: the first task, then each chain entry in
/// order, every link's response merged into the final outcomes.
#[derive(Debug, Default)]
pub struct DelegateStep;

impl Step for DelegateStep {
    fn facilitate_default(&self) -> ExecutionMode {
        ExecutionMode::Task
    }

    async fn execute(
        &self,
        _ambiance: &Ambiance,
        node: &PlanNode,
        _inputs: &Outcomes,
    ) -> Result<ExecutableResponse, StepError> {
        let params: DelegateParameters = decode(node)?;
        if params.task_type.trim().is_empty() {
            return Ok(ExecutableResponse::Sync(StepResponse::failed(
                FailureInfo::configuration(format!("node '{}' has an empty task_type", node.id)),
            )));
        }
        let task = params.first_task();
        if params.chain.is_empty() {
            Ok(ExecutableResponse::Task(task))
        } else {
            Ok(ExecutableResponse::TaskChain(task))
        }
    }

    async fn next_link(
        &self,
        _ambiance: &Ambiance,
        node: &PlanNode,
        completed_link: u32,
        responses: &ResponseBundle,
    ) -> Result<Option<TaskRequest>, StepError> {
        if responses.values().any(|r| !r.is_success()) {
            return Ok(None);
        }
        let params: DelegateParameters = decode(node)?;
        Ok(params.chain.get(completed_link as usize).cloned())
    }
}

// ---------------------------------------------------------------------------
// wait
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct WaitParameters {
    #[serde(default)]
    callback_ids: Vec<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Parks the node until external callbacks arrive. Without explicit
/// `callback_ids` it waits on `<node_execution_id>-callback`.
#[derive(Debug, Default)]
pub struct WaitStep;

impl Step for WaitStep {
    fn facilitate_default(&self) -> ExecutionMode {
        ExecutionMode::Async
    }

    async fn execute(
        &self,
        ambiance: &Ambiance,
        node: &PlanNode,
        _inputs: &Outcomes,
    ) -> Result<ExecutableResponse, StepError> {
        let params: WaitParameters = if node.step_parameters.is_null() {
            WaitParameters::default()
        } else {
            decode(node)?
        };
        let callback_ids = if params.callback_ids.is_empty() {
            let id = ambiance
                .node_execution_id()
                .ok_or_else(|| StepError::Failed("wait step has no node level".into()))?;
            vec![format!("{id}-callback")]
        } else {
            params.callback_ids
        };
        Ok(ExecutableResponse::Async {
            callback_ids,
            timeout_secs: params.timeout_secs,
        })
    }
}
