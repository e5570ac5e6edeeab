//! Interrupt bookkeeping.
//!
//! Interrupts are append-then-apply: [`InterruptLedger::record`] persists
//! the interrupt before the engine touches any node, and the outcome of
//! applying it is stamped afterwards. A crash between the two leaves a
//! REGISTERED record that recovery replays.

pub mod target;

use chrono::Utc;
use pipewright_types::error::RepositoryError;
use pipewright_types::event::OrchestrationEvent;
use pipewright_types::interrupt::{Interrupt, InterruptState, InterruptType};
use uuid::Uuid;

pub use target::{collect_descendants, order_top_down};

use crate::event::EventBus;
use crate::repository::InterruptRepository;

#[derive(Debug, thiserror::Error)]
pub enum InterruptError {
    #[error("interrupt {0} not found")]
    NotFound(Uuid),

    #[error("{interrupt_type} interrupt rejected: {reason}")]
    Rejected {
        interrupt_id: Uuid,
        interrupt_type: InterruptType,
        reason: String,
    },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

pub struct InterruptLedger<S> {
    store: S,
    bus: EventBus,
}

impl<S: InterruptRepository> InterruptLedger<S> {
    pub fn new(store: S, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Durably record a new interrupt.
    pub async fn record(&self, interrupt: &Interrupt) -> Result<(), InterruptError> {
        self.store.create_interrupt(interrupt).await?;
        tracing::info!(
            interrupt_id = %interrupt.id,
            interrupt_type = %interrupt.interrupt_type,
            plan_execution_id = %interrupt.plan_execution_id,
            node_execution_id = ?interrupt.node_execution_id,
            issued_by = ?interrupt.issued_by,
            "interrupt registered"
        );
        self.bus.publish(OrchestrationEvent::InterruptRegistered {
            interrupt_id: interrupt.id,
            plan_execution_id: interrupt.plan_execution_id,
            interrupt_type: interrupt.interrupt_type,
        });
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Interrupt, InterruptError> {
        self.store
            .get_interrupt(&id)
            .await?
            .ok_or(InterruptError::NotFound(id))
    }

    pub async fn list(&self, plan_execution_id: Uuid) -> Result<Vec<Interrupt>, InterruptError> {
        Ok(self.store.list_interrupts(&plan_execution_id).await?)
    }

    pub async fn pending(&self) -> Result<Vec<Interrupt>, InterruptError> {
        Ok(self.store.list_pending_interrupts().await?)
    }

    /// Stamp the interrupt as applied to `affected`.
    pub async fn mark_applied(&self, interrupt: &Interrupt, affected: Vec<Uuid>) -> Result<Interrupt, InterruptError> {
        let mut updated = interrupt.clone();
        updated.state = InterruptState::Applied;
        updated.applied_at = Some(Utc::now());
        updated.version = interrupt.version + 1;
        self.store
            .update_interrupt_if_version(&updated, interrupt.version)
            .await?;
        tracing::info!(
            interrupt_id = %interrupt.id,
            interrupt_type = %interrupt.interrupt_type,
            affected = affected.len(),
            "interrupt applied"
        );
        self.bus.publish(OrchestrationEvent::InterruptApplied {
            interrupt_id: interrupt.id,
            plan_execution_id: interrupt.plan_execution_id,
            interrupt_type: interrupt.interrupt_type,
            affected,
        });
        Ok(updated)
    }

    /// Stamp the interrupt as rejected and build the error for the caller.
    pub async fn mark_rejected(&self, interrupt: &Interrupt, reason: String) -> Result<InterruptError, InterruptError> {
        let mut updated = interrupt.clone();
        updated.state = InterruptState::Rejected;
        updated.rejection_reason = Some(reason.clone());
        updated.version = interrupt.version + 1;
        self.store
            .update_interrupt_if_version(&updated, interrupt.version)
            .await?;
        tracing::warn!(
            interrupt_id = %interrupt.id,
            interrupt_type = %interrupt.interrupt_type,
            reason = %reason,
            "interrupt rejected"
        );
        Ok(InterruptError::Rejected {
            interrupt_id: interrupt.id,
            interrupt_type: interrupt.interrupt_type,
            reason,
        })
    }
}
