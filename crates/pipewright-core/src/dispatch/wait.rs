//! Correlation-keyed wait/notify.
//!
//! A node execution registers the set of correlation IDs it needs; every
//! notify consumes one correlation. The notify that consumes the last one
//! receives the full bundle and is the only caller told to resume the node.
//! Removal from the correlation map is the exactly-once gate: a duplicate
//! or late response finds nothing to remove and is discarded.

use std::collections::HashSet;

use dashmap::DashMap;
use pipewright_types::task::{ResponseBundle, ResponseData};
use uuid::Uuid;

use super::DispatchError;

#[derive(Debug, Default)]
struct PendingWait {
    outstanding: HashSet<String>,
    received: ResponseBundle,
}

/// Result of delivering one response.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyOutcome {
    /// Every correlation of the wait has answered.
    Completed {
        node_execution_id: Uuid,
        responses: ResponseBundle,
    },
    /// Accepted; the node still waits on other correlations.
    Pending { node_execution_id: Uuid },
    /// Unknown or already consumed correlation.
    Discarded,
}

#[derive(Debug, Default)]
pub struct WaitNotifyEngine {
    correlations: DashMap<String, Uuid>,
    waits: DashMap<Uuid, PendingWait>,
}

impl WaitNotifyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for `node_execution_id` on every ID in
    /// `correlation_ids`. Fails without registering anything if one of them
    /// is already taken.
    pub fn wait_for_all(
        &self,
        node_execution_id: Uuid,
        correlation_ids: &[String],
    ) -> Result<(), DispatchError> {
        if let Some(taken) = correlation_ids
            .iter()
            .find(|id| self.correlations.contains_key(id.as_str()))
        {
            return Err(DispatchError::DuplicateCorrelation(taken.clone()));
        }

        // The wait exists before any correlation points at it, so a notify
        // racing this registration always finds it.
        self.waits
            .entry(node_execution_id)
            .or_default()
            .outstanding
            .extend(correlation_ids.iter().cloned());

        let mut claimed = Vec::with_capacity(correlation_ids.len());
        for id in correlation_ids {
            match self.correlations.entry(id.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    for c in &claimed {
                        self.correlations.remove(c);
                    }
                    if let Some(mut wait) = self.waits.get_mut(&node_execution_id) {
                        for c in correlation_ids {
                            wait.outstanding.remove(c);
                        }
                    }
                    self.waits.remove_if(&node_execution_id, |_, w| {
                        w.outstanding.is_empty() && w.received.is_empty()
                    });
                    return Err(DispatchError::DuplicateCorrelation(id.clone()));
                }
                dashmap::mapref::entry::Entry::Vacant(e) => {
                    e.insert(node_execution_id);
                    claimed.push(id.clone());
                }
            }
        }
        Ok(())
    }

    /// Deliver one response.
    pub fn notify(&self, correlation_id: &str, data: ResponseData) -> NotifyOutcome {
        let Some((_, node_execution_id)) = self.correlations.remove(correlation_id) else {
            return NotifyOutcome::Discarded;
        };

        let done = {
            let Some(mut wait) = self.waits.get_mut(&node_execution_id) else {
                return NotifyOutcome::Discarded;
            };
            wait.outstanding.remove(correlation_id);
            wait.received.insert(correlation_id.to_string(), data);
            wait.outstanding.is_empty()
        };

        if !done {
            return NotifyOutcome::Pending { node_execution_id };
        }
        match self
            .waits
            .remove_if(&node_execution_id, |_, w| w.outstanding.is_empty())
        {
            Some((_, wait)) => NotifyOutcome::Completed {
                node_execution_id,
                responses: wait.received,
            },
            None => NotifyOutcome::Pending { node_execution_id },
        }
    }

    /// Drop the node's wait. Returns the correlations that were still
    /// outstanding.
    pub fn cancel_node(&self, node_execution_id: Uuid) -> Vec<String> {
        let Some((_, wait)) = self.waits.remove(&node_execution_id) else {
            return Vec::new();
        };
        let mut outstanding: Vec<String> = wait.outstanding.into_iter().collect();
        for id in &outstanding {
            self.correlations
                .remove_if(id, |_, owner| *owner == node_execution_id);
        }
        outstanding.sort();
        outstanding
    }

    pub fn is_waiting(&self, node_execution_id: Uuid) -> bool {
        self.waits.contains_key(&node_execution_id)
    }

    /// Node execution currently waiting on `correlation_id`.
    pub fn waiter(&self, correlation_id: &str) -> Option<Uuid> {
        self.correlations.get(correlation_id).map(|e| *e.value())
    }

    pub fn pending_count(&self) -> usize {
        self.correlations.len()
    }
}
