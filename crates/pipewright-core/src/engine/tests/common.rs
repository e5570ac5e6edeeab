//! Shared fixtures for the engine scenarios.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::engine::{EngineBuilder, OrchestrationEngine};
use crate::repository::MemoryStore;
use crate::step::{ExecutableResponse, Step, StepError};
use pipewright_types::ambiance::Ambiance;
use pipewright_types::config::EngineConfig;
use pipewright_types::event::OrchestrationEvent;
use pipewright_types::execution::{ExecutionMode, FailureInfo, FailureKind, NodeExecution, Outcomes, StepResponse};
use pipewright_types::plan::{Plan, PlanNode};
use pipewright_types::status::Status;
use tokio::sync::broadcast;
use uuid::Uuid;

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        timeout_sweep_interval_ms: 10,
        ..EngineConfig::default()
    }
}

pub fn builder(store: MemoryStore) -> EngineBuilder<MemoryStore> {
    OrchestrationEngine::builder(store).config(fast_config())
}

pub async fn start(builder: EngineBuilder<MemoryStore>) -> OrchestrationEngine<MemoryStore> {
    let engine = builder.build();
    engine.start().await.unwrap();
    engine
}

pub fn plan(root: &str, nodes: Vec<PlanNode>) -> Plan {
    Plan {
        id: Uuid::now_v7(),
        root_node_id: root.to_string(),
        nodes,
        resources: vec![],
        barriers: vec![],
    }
}

/// Poll until `check` holds, failing the test after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// The current record of `node_id` in a plan execution.
pub async fn current(
    engine: &OrchestrationEngine<MemoryStore>,
    plan_execution_id: Uuid,
    node_id: &str,
) -> Option<NodeExecution> {
    engine
        .list_node_executions(plan_execution_id, false)
        .await
        .unwrap()
        .into_iter()
        .find(|n| n.node_id == node_id)
}

pub async fn wait_for_status(
    engine: &OrchestrationEngine<MemoryStore>,
    plan_execution_id: Uuid,
    node_id: &str,
    status: Status,
) -> NodeExecution {
    for _ in 0..500 {
        if let Some(node) = current(engine, plan_execution_id, node_id).await {
            if node.status == status {
                return node;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {node_id} to reach {status}");
}

pub async fn await_plan(engine: &OrchestrationEngine<MemoryStore>, plan_execution_id: Uuid) -> Status {
    tokio::time::timeout(Duration::from_secs(5), engine.await_plan(plan_execution_id))
        .await
        .expect("plan did not finish")
        .unwrap()
}

/// Drain whatever is buffered on an event receiver.
pub fn drain(rx: &mut broadcast::Receiver<OrchestrationEvent>) -> Vec<OrchestrationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// `to` statuses of every status change of `node_id`, in order.
pub fn status_trace(events: &[OrchestrationEvent], node_id: &str) -> Vec<Status> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestrationEvent::StatusChanged { node_id: n, to, .. } if n == node_id => Some(*to),
            _ => None,
        })
        .collect()
}

/// Fails inline a set number of times, then succeeds.
#[derive(Clone)]
pub struct FlakyStep {
    failures_left: Arc<AtomicU32>,
}

impl FlakyStep {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: Arc::new(AtomicU32::new(times)),
        }
    }
}

impl Step for FlakyStep {
    fn facilitate_default(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    async fn execute(
        &self,
        _ambiance: &Ambiance,
        node: &PlanNode,
        _inputs: &Outcomes,
    ) -> Result<ExecutableResponse, StepError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Ok(ExecutableResponse::Sync(StepResponse::failed(FailureInfo::new(
                FailureKind::Application,
                format!("{} failed, {} failures left", node.id, left - 1),
            ))));
        }
        let outcomes = Outcomes::from([("ok".to_string(), serde_json::json!(true))]);
        Ok(ExecutableResponse::Sync(StepResponse::succeeded(outcomes)))
    }
}
