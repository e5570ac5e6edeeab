//! Interrupt targeting over the flat node-execution records.

use std::collections::VecDeque;

use pipewright_types::error::RepositoryError;
use pipewright_types::execution::NodeExecution;
use uuid::Uuid;

use crate::repository::NodeExecutionRepository;

/// Every current (non-replaced) descendant of `root_id`, breadth first.
pub async fn collect_descendants<S: NodeExecutionRepository>(
    store: &S,
    root_id: Uuid,
) -> Result<Vec<NodeExecution>, RepositoryError> {
    let mut found = Vec::new();
    let mut frontier = VecDeque::from([root_id]);
    while let Some(id) = frontier.pop_front() {
        for child in store.list_children(&id).await? {
            frontier.push_back(child.id);
            found.push(child);
        }
    }
    Ok(found)
}

/// Parents before children: by nesting depth, then creation time.
pub fn order_top_down(nodes: &mut [NodeExecution]) {
    nodes.sort_by(|a, b| {
        a.ambiance
            .depth()
            .cmp(&b.ambiance.depth())
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use chrono::Utc;
    use pipewright_types::ambiance::{Ambiance, Level, StepType};

    fn child_of(parent: Option<&NodeExecution>, node_id: &str, plan_execution_id: Uuid) -> NodeExecution {
        let base = parent
            .map(|p| p.ambiance.clone())
            .unwrap_or_else(|| Ambiance::new(Uuid::now_v7(), plan_execution_id));
        let ambiance = base.with_level(Level {
            node_id: node_id.into(),
            node_execution_id: Uuid::now_v7(),
            step_type: StepType::new("fork"),
            retry_index: 0,
            start_ts: Utc::now(),
        });
        NodeExecution::queued(ambiance, node_id, parent.map(|p| p.id))
    }

    #[tokio::test]
    async fn descendants_skip_replaced_retries_and_sort_top_down() {
        let store = MemoryStore::new();
        let pe = Uuid::now_v7();
        let root = child_of(None, "root", pe);
        let a = child_of(Some(&root), "a", pe);
        let a1 = child_of(Some(&a), "a1", pe);
        let mut old = child_of(Some(&root), "b", pe);
        old.old_retry = true;
        for n in [&root, &a, &a1, &old] {
            store.create_node_execution(n).await.unwrap();
        }

        let mut found = collect_descendants(&store, root.id).await.unwrap();
        found.reverse();
        order_top_down(&mut found);
        let ids: Vec<&str> = found.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "a1"]);
    }
}
