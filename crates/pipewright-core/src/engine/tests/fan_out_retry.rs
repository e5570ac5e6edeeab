use super::common::{FlakyStep, await_plan, builder, drain, plan, start, status_trace};
use crate::repository::MemoryStore;
use pipewright_types::plan::PlanNode;
use pipewright_types::status::Status;
use serde_json::json;

#[tokio::test]
async fn test_fork_retries_flaky_child_until_it_succeeds() {
    let engine = start(builder(MemoryStore::new()).step("flaky", FlakyStep::failing(2))).await;
    let mut events = engine.subscribe();

    let p = plan(
        "root",
        vec![
            PlanNode::new("root", "fork").with_parameters(json!({"children": ["a", "b", "c"]})),
            PlanNode::new("a", "noop").with_parameters(json!({"artifact": "a.tar"})),
            PlanNode::new("b", "flaky").with_adviser("retry", json!({"max_attempts": 2})),
            PlanNode::new("c", "noop"),
        ],
    );
    let handle = engine.start_plan(p).await.unwrap();
    assert_eq!(await_plan(&engine, handle.plan_execution_id).await, Status::Succeeded);

    let events = drain(&mut events);
    assert_eq!(
        status_trace(&events, "b"),
        vec![
            Status::Running,
            Status::Failed,
            Status::Running,
            Status::Failed,
            Status::Running,
            Status::Succeeded,
        ]
    );

    let all = engine
        .list_node_executions(handle.plan_execution_id, true)
        .await
        .unwrap();
    let mut attempts: Vec<_> = all.iter().filter(|n| n.node_id == "b").collect();
    attempts.sort_by_key(|n| n.retry_index);
    assert_eq!(
        attempts.iter().map(|n| n.retry_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(attempts[0].old_retry && attempts[1].old_retry);
    assert!(!attempts[2].old_retry);
    assert_eq!(attempts[2].retry_ids, vec![attempts[0].id, attempts[1].id]);

    // The parent only lists the latest attempt.
    let root = engine.node_execution(handle.root_node_execution_id).await.unwrap();
    assert_eq!(root.child_ids.len(), 3);
    assert!(root.child_ids.contains(&attempts[2].id));
    assert_eq!(root.outcomes["a"], json!({"artifact": "a.tar"}));

    // Every child concluded before the root finished.
    let current = engine
        .list_node_executions(handle.plan_execution_id, false)
        .await
        .unwrap();
    let root_concluded = root.concluded_at.unwrap();
    for child in current.iter().filter(|n| n.parent_id == Some(root.id)) {
        assert_eq!(child.status, Status::Succeeded);
        assert!(child.concluded_at.unwrap() <= root_concluded);
    }
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_parent() {
    let engine = start(builder(MemoryStore::new()).step("flaky", FlakyStep::failing(5))).await;

    let p = plan(
        "root",
        vec![
            PlanNode::new("root", "fork").with_parameters(json!({"children": ["b"]})),
            PlanNode::new("b", "flaky").with_adviser("retry", json!({"max_attempts": 1})),
        ],
    );
    let handle = engine.start_plan(p).await.unwrap();
    assert_eq!(await_plan(&engine, handle.plan_execution_id).await, Status::Failed);

    let all = engine
        .list_node_executions(handle.plan_execution_id, true)
        .await
        .unwrap();
    assert_eq!(all.iter().filter(|n| n.node_id == "b").count(), 2);

    let root = engine.node_execution(handle.root_node_execution_id).await.unwrap();
    let failure = root.failure.unwrap();
    assert!(failure.message.contains("child 'b' failed"), "{}", failure.message);
}

#[tokio::test]
async fn test_skipped_node_does_not_run() {
    let engine = start(builder(MemoryStore::new())).await;
    let mut events = engine.subscribe();

    let mut skipped = PlanNode::new("s", "flaky-but-unregistered");
    skipped.skip = true;
    let p = plan(
        "root",
        vec![
            PlanNode::new("root", "fork").with_parameters(json!({"children": ["s", "n"]})),
            skipped,
            PlanNode::new("n", "noop"),
        ],
    );
    let handle = engine.start_plan(p).await.unwrap();
    assert_eq!(await_plan(&engine, handle.plan_execution_id).await, Status::Succeeded);

    let events = drain(&mut events);
    assert_eq!(status_trace(&events, "s"), vec![Status::Skipped]);
}

#[tokio::test]
async fn test_failed_sibling_aborts_plan_through_on_fail() {
    let engine = start(builder(MemoryStore::new()).step("flaky", FlakyStep::failing(1))).await;

    let p = plan(
        "root",
        vec![
            PlanNode::new("root", "fork").with_parameters(json!({"children": ["b"]})),
            PlanNode::new("b", "flaky").with_adviser("on_fail", json!({"action": "abort"})),
        ],
    );
    let handle = engine.start_plan(p).await.unwrap();
    assert_eq!(await_plan(&engine, handle.plan_execution_id).await, Status::Aborted);

    let interrupts = engine.list_interrupts(handle.plan_execution_id).await.unwrap();
    assert_eq!(interrupts.len(), 1);
    assert!(interrupts[0].is_plan_wide());
}
