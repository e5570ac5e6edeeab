//! The engine running on the SQLite store, including a restart against the
//! same database file.

use std::time::Duration;

use pipewright_core::dispatch::NotifyOutcome;
use pipewright_core::engine::OrchestrationEngine;
use pipewright_types::config::EngineConfig;
use pipewright_types::constraint::ResourceConstraint;
use pipewright_types::plan::{Plan, PlanNode, ResourceRequirement};
use pipewright_types::status::Status;
use pipewright_types::task::ResponseData;
use serde_json::json;
use uuid::Uuid;

use super::SqliteStore;
use super::pool::database_url_in;

fn config() -> EngineConfig {
    EngineConfig {
        timeout_sweep_interval_ms: 10,
        ..EngineConfig::default()
    }
}

async fn engine_on(url: &str) -> OrchestrationEngine<SqliteStore> {
    let store = SqliteStore::connect(url).await.unwrap();
    let engine = OrchestrationEngine::builder(store).config(config()).build();
    engine.start().await.unwrap();
    engine
}

fn plan(root: &str, nodes: Vec<PlanNode>) -> Plan {
    Plan {
        id: Uuid::now_v7(),
        root_node_id: root.into(),
        nodes,
        resources: vec![],
        barriers: vec![],
    }
}

async fn finished(engine: &OrchestrationEngine<SqliteStore>, pe: Uuid) -> Status {
    tokio::time::timeout(Duration::from_secs(10), engine.await_plan(pe))
        .await
        .expect("plan did not finish")
        .unwrap()
}

async fn status_of(engine: &OrchestrationEngine<SqliteStore>, pe: Uuid, node_id: &str) -> Option<Status> {
    engine
        .list_node_executions(pe, false)
        .await
        .unwrap()
        .into_iter()
        .find(|n| n.node_id == node_id)
        .map(|n| n.status)
}

async fn wait_for(engine: &OrchestrationEngine<SqliteStore>, pe: Uuid, node_id: &str, status: Status) {
    for _ in 0..1000 {
        if status_of(engine, pe, node_id).await == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{node_id} never reached {status}");
}

#[tokio::test]
async fn test_fork_runs_to_completion_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_on(&database_url_in(dir.path())).await;

    let p = plan(
        "root",
        vec![
            PlanNode::new("root", "fork").with_parameters(json!({"children": ["a", "b"]})),
            PlanNode::new("a", "noop").with_parameters(json!({"v": 1})),
            PlanNode::new("b", "noop"),
        ],
    );
    let handle = engine.start_plan(p).await.unwrap();
    assert_eq!(finished(&engine, handle.plan_execution_id).await, Status::Succeeded);

    let nodes = engine
        .list_node_executions(handle.plan_execution_id, false)
        .await
        .unwrap();
    assert_eq!(nodes.len(), 3);
    assert!(nodes.iter().all(|n| n.status == Status::Succeeded));
    let root = engine.node_execution(handle.root_node_execution_id).await.unwrap();
    assert_eq!(root.outcomes["a"], json!({"v": 1}));
}

#[tokio::test]
async fn test_waiting_node_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = database_url_in(dir.path());

    let first = engine_on(&url).await;
    let p = plan(
        "gate",
        vec![PlanNode::new("gate", "wait").with_parameters(json!({"callback_ids": ["cb-restart"]}))],
    );
    let handle = first.start_plan(p).await.unwrap();
    wait_for(&first, handle.plan_execution_id, "gate", Status::AsyncWaiting).await;
    first.shutdown();
    drop(first);

    let second = engine_on(&url).await;
    let outcome = second
        .ingest_response("cb-restart", ResponseData::success(json!({"approved": true})))
        .await
        .unwrap();
    assert!(matches!(outcome, NotifyOutcome::Completed { .. }));
    assert_eq!(finished(&second, handle.plan_execution_id).await, Status::Succeeded);

    let node = second.node_execution(handle.root_node_execution_id).await.unwrap();
    assert_eq!(node.outcomes["approved"], json!(true));
    assert!(node.concluded_at.is_some());
}

#[tokio::test]
async fn test_restraint_queue_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_on(&database_url_in(dir.path())).await;
    engine
        .register_resource(ResourceConstraint::restraint("db", 1))
        .await
        .unwrap();

    let restrained = |id: &str, node: PlanNode| {
        let mut node = node;
        node.restraint = Some(ResourceRequirement {
            resource_key: "db".into(),
            permits: 1,
            priority: 0,
        });
        plan(id, vec![node])
    };

    let holder = engine
        .start_plan(restrained(
            "hold",
            PlanNode::new("hold", "wait").with_parameters(json!({"callback_ids": ["cb-db"]})),
        ))
        .await
        .unwrap();
    wait_for(&engine, holder.plan_execution_id, "hold", Status::AsyncWaiting).await;

    let queued = engine
        .start_plan(restrained("next", PlanNode::new("next", "noop")))
        .await
        .unwrap();
    for _ in 0..500 {
        if engine.resource_snapshot("db").await.unwrap().consumers.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let snapshot = engine.resource_snapshot("db").await.unwrap();
    assert_eq!(snapshot.active_permits, 1);
    assert_eq!(snapshot.consumers.len(), 2);

    engine.ingest_response("cb-db", ResponseData::success(json!(null))).await.unwrap();
    assert_eq!(finished(&engine, holder.plan_execution_id).await, Status::Succeeded);
    assert_eq!(finished(&engine, queued.plan_execution_id).await, Status::Succeeded);
    assert_eq!(engine.resource_snapshot("db").await.unwrap().active_permits, 0);
}
