//! In-memory implementation of every repository port.
//!
//! Backed by `DashMap`s behind one `Arc`, so clones share state. Values are
//! cloned on read; no `DashMap` guard is ever held across an await. Used by
//! `pwr run` and by the engine's tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pipewright_types::constraint::{Consumer, ConsumerState, ResourceConstraint};
use pipewright_types::error::RepositoryError;
use pipewright_types::execution::NodeExecution;
use pipewright_types::interrupt::Interrupt;
use pipewright_types::plan::PlanExecution;
use pipewright_types::status::Status;
use pipewright_types::timeout::TimeoutInstance;
use uuid::Uuid;

use super::{
    ConstraintRepository, InterruptRepository, NodeExecutionRepository, PlanExecutionRepository,
    TimeoutRepository,
};

#[derive(Default)]
struct MemoryInner {
    nodes: DashMap<Uuid, NodeExecution>,
    interrupts: DashMap<Uuid, Interrupt>,
    constraints: DashMap<String, ResourceConstraint>,
    consumers: DashMap<Uuid, Consumer>,
    timeouts: DashMap<Uuid, TimeoutInstance>,
    plan_executions: DashMap<Uuid, PlanExecution>,
}

/// Shared, cloneable in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("node_executions", &self.inner.nodes.len())
            .field("interrupts", &self.inner.interrupts.len())
            .field("timeouts", &self.inner.timeouts.len())
            .finish()
    }
}

/// Compare-and-swap on a versioned map entry.
fn swap_if_version<K, V>(
    map: &DashMap<K, V>,
    key: &K,
    value: &V,
    expected_version: u64,
    version_of: impl Fn(&V) -> u64,
) -> Result<(), RepositoryError>
where
    K: std::hash::Hash + Eq,
    V: Clone,
{
    let mut entry = map.get_mut(key).ok_or(RepositoryError::NotFound)?;
    let actual = version_of(entry.value());
    if actual != expected_version {
        return Err(RepositoryError::VersionConflict {
            expected: expected_version,
            actual,
        });
    }
    *entry.value_mut() = value.clone();
    Ok(())
}

fn insert_new<K, V>(map: &DashMap<K, V>, key: K, value: &V) -> Result<(), RepositoryError>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
    V: Clone,
{
    match map.entry(key) {
        dashmap::mapref::entry::Entry::Occupied(e) => Err(RepositoryError::Conflict(format!(
            "record {} already exists",
            e.key()
        ))),
        dashmap::mapref::entry::Entry::Vacant(e) => {
            e.insert(value.clone());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Node executions
// ---------------------------------------------------------------------------

impl NodeExecutionRepository for MemoryStore {
    async fn create_node_execution(&self, node: &NodeExecution) -> Result<(), RepositoryError> {
        insert_new(&self.inner.nodes, node.id, node)
    }

    async fn get_node_execution(&self, id: &Uuid) -> Result<Option<NodeExecution>, RepositoryError> {
        Ok(self.inner.nodes.get(id).map(|n| n.value().clone()))
    }

    async fn update_node_execution_if_version(
        &self,
        node: &NodeExecution,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        swap_if_version(&self.inner.nodes, &node.id, node, expected_version, |n| {
            n.version
        })
    }

    async fn list_node_executions(
        &self,
        plan_execution_id: &Uuid,
        include_retries: bool,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        let mut nodes: Vec<NodeExecution> = self
            .inner
            .nodes
            .iter()
            .filter(|n| n.plan_execution_id == *plan_execution_id)
            .filter(|n| include_retries || !n.old_retry)
            .map(|n| n.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn list_children(&self, parent_id: &Uuid) -> Result<Vec<NodeExecution>, RepositoryError> {
        let mut nodes: Vec<NodeExecution> = self
            .inner
            .nodes
            .iter()
            .filter(|n| n.parent_id == Some(*parent_id) && !n.old_retry)
            .map(|n| n.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn list_node_executions_with_status(
        &self,
        statuses: &[Status],
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        let mut nodes: Vec<NodeExecution> = self
            .inner
            .nodes
            .iter()
            .filter(|n| !n.old_retry && statuses.contains(&n.status))
            .map(|n| n.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(nodes)
    }
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

impl InterruptRepository for MemoryStore {
    async fn create_interrupt(&self, interrupt: &Interrupt) -> Result<(), RepositoryError> {
        insert_new(&self.inner.interrupts, interrupt.id, interrupt)
    }

    async fn get_interrupt(&self, id: &Uuid) -> Result<Option<Interrupt>, RepositoryError> {
        Ok(self.inner.interrupts.get(id).map(|i| i.value().clone()))
    }

    async fn update_interrupt_if_version(
        &self,
        interrupt: &Interrupt,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        swap_if_version(
            &self.inner.interrupts,
            &interrupt.id,
            interrupt,
            expected_version,
            |i| i.version,
        )
    }

    async fn list_interrupts(&self, plan_execution_id: &Uuid) -> Result<Vec<Interrupt>, RepositoryError> {
        let mut interrupts: Vec<Interrupt> = self
            .inner
            .interrupts
            .iter()
            .filter(|i| i.plan_execution_id == *plan_execution_id)
            .map(|i| i.value().clone())
            .collect();
        interrupts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(interrupts)
    }

    async fn list_pending_interrupts(&self) -> Result<Vec<Interrupt>, RepositoryError> {
        let mut interrupts: Vec<Interrupt> = self
            .inner
            .interrupts
            .iter()
            .filter(|i| i.is_pending())
            .map(|i| i.value().clone())
            .collect();
        interrupts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(interrupts)
    }
}

// ---------------------------------------------------------------------------
// Resource constraints
// ---------------------------------------------------------------------------

impl ConstraintRepository for MemoryStore {
    async fn save_constraint(&self, constraint: &ResourceConstraint) -> Result<(), RepositoryError> {
        self.inner
            .constraints
            .insert(constraint.key.clone(), constraint.clone());
        Ok(())
    }

    async fn get_constraint(&self, key: &str) -> Result<Option<ResourceConstraint>, RepositoryError> {
        Ok(self.inner.constraints.get(key).map(|c| c.value().clone()))
    }

    async fn list_constraints(&self) -> Result<Vec<ResourceConstraint>, RepositoryError> {
        let mut constraints: Vec<ResourceConstraint> =
            self.inner.constraints.iter().map(|c| c.value().clone()).collect();
        constraints.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(constraints)
    }

    async fn create_consumer(&self, consumer: &Consumer) -> Result<(), RepositoryError> {
        insert_new(&self.inner.consumers, consumer.id, consumer)
    }

    async fn update_consumer_if_version(
        &self,
        consumer: &Consumer,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        swap_if_version(
            &self.inner.consumers,
            &consumer.id,
            consumer,
            expected_version,
            |c| c.version,
        )
    }

    async fn list_consumers(
        &self,
        resource_key: &str,
        states: &[ConsumerState],
    ) -> Result<Vec<Consumer>, RepositoryError> {
        let mut consumers: Vec<Consumer> = self
            .inner
            .consumers
            .iter()
            .filter(|c| c.resource_key == resource_key && states.contains(&c.state))
            .map(|c| c.value().clone())
            .collect();
        consumers.sort_by_key(|c| c.sequence);
        Ok(consumers)
    }

    async fn find_open_consumer(
        &self,
        resource_key: &str,
        consumer_id: &str,
    ) -> Result<Option<Consumer>, RepositoryError> {
        Ok(self
            .inner
            .consumers
            .iter()
            .find(|c| {
                c.resource_key == resource_key
                    && c.consumer_id == consumer_id
                    && c.state != ConsumerState::Finished
            })
            .map(|c| c.value().clone()))
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

impl TimeoutRepository for MemoryStore {
    async fn create_timeout(&self, timeout: &TimeoutInstance) -> Result<(), RepositoryError> {
        insert_new(&self.inner.timeouts, timeout.id, timeout)
    }

    async fn update_timeout_if_version(
        &self,
        timeout: &TimeoutInstance,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        swap_if_version(
            &self.inner.timeouts,
            &timeout.id,
            timeout,
            expected_version,
            |t| t.version,
        )
    }

    async fn delete_timeout(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.inner.timeouts.remove(id).is_some())
    }

    async fn delete_timeouts_for_node(&self, node_execution_id: &Uuid) -> Result<u64, RepositoryError> {
        let before = self.inner.timeouts.len();
        self.inner
            .timeouts
            .retain(|_, t| t.node_execution_id != *node_execution_id);
        Ok(before.saturating_sub(self.inner.timeouts.len()) as u64)
    }

    async fn list_timeouts_for_node(
        &self,
        node_execution_id: &Uuid,
    ) -> Result<Vec<TimeoutInstance>, RepositoryError> {
        let mut timeouts: Vec<TimeoutInstance> = self
            .inner
            .timeouts
            .iter()
            .filter(|t| t.node_execution_id == *node_execution_id)
            .map(|t| t.value().clone())
            .collect();
        timeouts.sort_by_key(|t| t.deadline);
        Ok(timeouts)
    }

    async fn list_due_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<TimeoutInstance>, RepositoryError> {
        let mut timeouts: Vec<TimeoutInstance> = self
            .inner
            .timeouts
            .iter()
            .filter(|t| t.is_due(now))
            .map(|t| t.value().clone())
            .collect();
        timeouts.sort_by_key(|t| t.deadline);
        Ok(timeouts)
    }
}

// ---------------------------------------------------------------------------
// Plan executions
// ---------------------------------------------------------------------------

impl PlanExecutionRepository for MemoryStore {
    async fn create_plan_execution(&self, execution: &PlanExecution) -> Result<(), RepositoryError> {
        insert_new(&self.inner.plan_executions, execution.id, execution)
    }

    async fn get_plan_execution(&self, id: &Uuid) -> Result<Option<PlanExecution>, RepositoryError> {
        Ok(self.inner.plan_executions.get(id).map(|p| p.value().clone()))
    }

    async fn update_plan_execution_if_version(
        &self,
        execution: &PlanExecution,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        swap_if_version(
            &self.inner.plan_executions,
            &execution.id,
            execution,
            expected_version,
            |p| p.version,
        )
    }

    async fn list_running_plan_executions(&self) -> Result<Vec<PlanExecution>, RepositoryError> {
        let mut executions: Vec<PlanExecution> = self
            .inner
            .plan_executions
            .iter()
            .filter(|p| !p.is_finished())
            .map(|p| p.value().clone())
            .collect();
        executions.sort_by_key(|p| p.created_at);
        Ok(executions)
    }
}
