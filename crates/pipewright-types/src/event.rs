//! Event types for the orchestration event bus.
//!
//! `OrchestrationEvent` is the ordered, fire-and-forget log the engine emits
//! for dashboards and audit. Nothing in the correctness path consumes it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advise::AdviseAction;
use crate::interrupt::InterruptType;
use crate::status::Status;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    PlanStarted {
        plan_id: Uuid,
        plan_execution_id: Uuid,
    },

    NodeStarted {
        plan_execution_id: Uuid,
        node_execution_id: Uuid,
        node_id: String,
        retry_index: u32,
    },

    StatusChanged {
        plan_execution_id: Uuid,
        node_execution_id: Uuid,
        node_id: String,
        from: Status,
        to: Status,
    },

    /// An illegal or stale status event was dropped.
    TransitionRejected {
        node_execution_id: Uuid,
        from: Status,
        to: Status,
        source: String,
    },

    AdviseApplied {
        node_execution_id: Uuid,
        node_id: String,
        action: AdviseAction,
    },

    InterruptRegistered {
        interrupt_id: Uuid,
        plan_execution_id: Uuid,
        interrupt_type: InterruptType,
    },

    InterruptApplied {
        interrupt_id: Uuid,
        plan_execution_id: Uuid,
        interrupt_type: InterruptType,
        /// Node executions the interrupt transitioned.
        affected: Vec<Uuid>,
    },

    ResourceGranted {
        resource_key: String,
        consumer_id: String,
        permits: u32,
    },

    ResourceQueued {
        resource_key: String,
        consumer_id: String,
        permits: u32,
        /// Position in the wait queue (0 = head).
        position: usize,
    },

    ResourceReleased {
        resource_key: String,
        consumer_id: String,
        permits: u32,
    },

    TaskDispatched {
        node_execution_id: Uuid,
        correlation_id: String,
        task_type: String,
    },

    /// A response arrived for an unknown or already-resolved correlation.
    ResponseDiscarded { correlation_id: String },

    TimeoutFired {
        node_execution_id: Uuid,
        timeout_id: Uuid,
    },

    PlanFinished {
        plan_execution_id: Uuid,
        status: Status,
    },
}

impl OrchestrationEvent {
    /// Plan execution the event belongs to, when it names one.
    pub fn plan_execution_id(&self) -> Option<Uuid> {
        match self {
            OrchestrationEvent::PlanStarted { plan_execution_id, .. }
            | OrchestrationEvent::NodeStarted { plan_execution_id, .. }
            | OrchestrationEvent::StatusChanged { plan_execution_id, .. }
            | OrchestrationEvent::InterruptRegistered { plan_execution_id, .. }
            | OrchestrationEvent::InterruptApplied { plan_execution_id, .. }
            | OrchestrationEvent::PlanFinished { plan_execution_id, .. } => Some(*plan_execution_id),
            _ => None,
        }
    }
}
