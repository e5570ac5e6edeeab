use std::time::Duration;

use super::common::{await_plan, builder, current, drain, eventually, plan, start, wait_for_status};
use crate::dispatch::{ChannelDelegateClient, DelegateMessage, NotifyOutcome};
use crate::repository::MemoryStore;
use pipewright_types::event::OrchestrationEvent;
use pipewright_types::execution::FailureKind;
use pipewright_types::plan::PlanNode;
use pipewright_types::status::Status;
use pipewright_types::task::{DelegateTask, ResponseData};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

async fn next_task(rx: &mut UnboundedReceiver<DelegateMessage>) -> DelegateTask {
    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no task submitted")
        .expect("worker channel closed");
    match message {
        DelegateMessage::Submit(task) => task,
        other => panic!("expected a submit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_response_is_discarded() {
    let (client, mut rx) = ChannelDelegateClient::new();
    let engine = start(builder(MemoryStore::new()).delegate_client(client)).await;
    let mut events = engine.subscribe();

    let p = plan(
        "build",
        vec![PlanNode::new("build", "delegate").with_parameters(json!({
            "task_type": "shell",
            "payload": {"cmd": "make"},
        }))],
    );
    let handle = engine.start_plan(p).await.unwrap();
    let task = next_task(&mut rx).await;
    assert_eq!(task.task_type, "shell");
    assert_eq!(task.node_execution_id, handle.root_node_execution_id);
    wait_for_status(&engine, handle.plan_execution_id, "build", Status::TaskWaiting).await;

    let first = engine
        .ingest_response(&task.correlation_id, ResponseData::success(json!({"exit": 0})))
        .await
        .unwrap();
    assert!(matches!(first, NotifyOutcome::Completed { .. }));
    let second = engine
        .ingest_response(&task.correlation_id, ResponseData::success(json!({"exit": 1})))
        .await
        .unwrap();
    assert_eq!(second, NotifyOutcome::Discarded);

    assert_eq!(await_plan(&engine, handle.plan_execution_id).await, Status::Succeeded);
    let node = engine.node_execution(handle.root_node_execution_id).await.unwrap();
    assert_eq!(node.outcomes["exit"], json!(0));

    let events = drain(&mut events);
    let completions = events
        .iter()
        .filter(|e| matches!(e, OrchestrationEvent::StatusChanged { to: Status::Succeeded, .. }))
        .count();
    assert_eq!(completions, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        OrchestrationEvent::ResponseDiscarded { correlation_id } if *correlation_id == task.correlation_id
    )));
}

#[tokio::test]
async fn test_response_and_timeout_race_settles_once() {
    let engine = start(builder(MemoryStore::new())).await;
    let mut events = engine.subscribe();

    let p = plan(
        "gate",
        vec![PlanNode::new("gate", "wait").with_parameters(json!({
            "callback_ids": ["cb-1"],
            "timeout_secs": 0,
        }))],
    );
    let handle = engine.start_plan(p).await.unwrap();
    // The deadline is already due, so the node may expire before it is seen waiting.
    eventually("gate to start waiting", || {
        let engine = engine.clone();
        async move {
            current(&engine, handle.plan_execution_id, "gate")
                .await
                .is_some_and(|n| n.status == Status::AsyncWaiting || n.status.is_final())
        }
    })
    .await;
    engine.ingest_response("cb-1", ResponseData::success(json!({"approved": true}))).await.unwrap();

    let status = await_plan(&engine, handle.plan_execution_id).await;
    assert!(matches!(status, Status::Succeeded | Status::Expired), "{status}");

    let events = drain(&mut events);
    let left_waiting = events
        .iter()
        .filter(|e| matches!(e, OrchestrationEvent::StatusChanged { from: Status::AsyncWaiting, .. }))
        .count();
    assert_eq!(left_waiting, 1);
}

#[tokio::test]
async fn test_unanswered_wait_expires() {
    let engine = start(builder(MemoryStore::new())).await;

    let p = plan(
        "gate",
        vec![PlanNode::new("gate", "wait").with_parameters(json!({
            "callback_ids": ["never"],
            "timeout_secs": 0,
        }))],
    );
    let handle = engine.start_plan(p).await.unwrap();
    assert_eq!(await_plan(&engine, handle.plan_execution_id).await, Status::Expired);

    let node = engine.node_execution(handle.root_node_execution_id).await.unwrap();
    assert_eq!(node.failure.unwrap().kind, FailureKind::Timeout);
    assert!(node.concluded_at.is_some());

    // The expired correlation no longer resolves anything.
    assert_eq!(
        engine.ingest_response("never", ResponseData::success(json!(null))).await.unwrap(),
        NotifyOutcome::Discarded
    );
}

#[tokio::test]
async fn test_task_without_worker_fails_as_rejected() {
    let engine = start(builder(MemoryStore::new())).await;

    let p = plan(
        "deploy",
        vec![PlanNode::new("deploy", "delegate").with_parameters(json!({"task_type": "helm"}))],
    );
    let handle = engine.start_plan(p).await.unwrap();
    assert_eq!(await_plan(&engine, handle.plan_execution_id).await, Status::Failed);

    let node = engine.node_execution(handle.root_node_execution_id).await.unwrap();
    assert_eq!(node.failure.unwrap().kind, FailureKind::DelegateRejected);
}

#[tokio::test]
async fn test_task_chain_merges_every_link() {
    let (client, mut rx) = ChannelDelegateClient::new();
    let engine = start(builder(MemoryStore::new()).delegate_client(client)).await;

    let p = plan(
        "release",
        vec![
            PlanNode::new("release", "delegate")
                .with_facilitator("task_chain", serde_json::Value::Null)
                .with_parameters(json!({
                    "task_type": "build",
                    "chain": [{"task_type": "verify", "payload": {"strict": true}}],
                })),
        ],
    );
    let handle = engine.start_plan(p).await.unwrap();

    let build = next_task(&mut rx).await;
    assert_eq!(build.task_type, "build");
    assert!(build.correlation_id.ends_with("-0"));
    wait_for_status(&engine, handle.plan_execution_id, "release", Status::TaskWaiting).await;
    engine
        .ingest_response(&build.correlation_id, ResponseData::success(json!({"image": "app:1"})))
        .await
        .unwrap();

    let verify = next_task(&mut rx).await;
    assert_eq!(verify.task_type, "verify");
    assert_eq!(verify.payload, json!({"strict": true}));
    assert!(verify.correlation_id.ends_with("-1"));
    engine
        .ingest_response(&verify.correlation_id, ResponseData::success(json!({"verified": true})))
        .await
        .unwrap();

    assert_eq!(await_plan(&engine, handle.plan_execution_id).await, Status::Succeeded);
    let node = engine.node_execution(handle.root_node_execution_id).await.unwrap();
    assert_eq!(node.outcomes["image"], json!("app:1"));
    assert_eq!(node.outcomes["verified"], json!(true));
}

#[tokio::test]
async fn test_worker_failure_fails_the_node() {
    let (client, mut rx) = ChannelDelegateClient::new();
    let engine = start(builder(MemoryStore::new()).delegate_client(client)).await;

    let p = plan(
        "build",
        vec![PlanNode::new("build", "delegate").with_parameters(json!({"task_type": "shell"}))],
    );
    let handle = engine.start_plan(p).await.unwrap();
    let task = next_task(&mut rx).await;
    wait_for_status(&engine, handle.plan_execution_id, "build", Status::TaskWaiting).await;

    let failure = pipewright_types::execution::FailureInfo::new(FailureKind::DelegateFailure, "exit 2");
    engine.ingest_response(&task.correlation_id, ResponseData::failure(failure)).await.unwrap();

    assert_eq!(await_plan(&engine, handle.plan_execution_id).await, Status::Failed);
    let node = engine.node_execution(handle.root_node_execution_id).await.unwrap();
    let failure = node.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::DelegateFailure);
    assert_eq!(failure.message, "exit 2");
}
