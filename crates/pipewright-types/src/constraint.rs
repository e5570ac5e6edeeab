//! Resource constraints, barriers and their consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Incremental admission up to `capacity` permits.
    Restraint,
    /// All-or-none rendezvous of `capacity` single-permit consumers.
    Barrier,
}

/// A named capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConstraint {
    pub key: String,
    pub capacity: u32,
    pub kind: ConstraintKind,
}

impl ResourceConstraint {
    pub fn restraint(key: impl Into<String>, capacity: u32) -> Self {
        Self {
            key: key.into(),
            capacity,
            kind: ConstraintKind::Restraint,
        }
    }

    pub fn barrier(key: impl Into<String>, parties: u32) -> Self {
        Self {
            key: key.into(),
            capacity: parties,
            kind: ConstraintKind::Barrier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Blocked,
    Active,
    Finished,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Blocked => "blocked",
            ConsumerState::Active => "active",
            ConsumerState::Finished => "finished",
        }
    }
}

/// One request against a resource, queued or holding permits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    pub id: Uuid,
    pub resource_key: String,
    /// Caller-chosen identity, usually a node execution ID.
    pub consumer_id: String,
    pub permits: u32,
    pub priority: i32,
    pub state: ConsumerState,
    /// Arrival order within the resource; breaks priority ties.
    pub sequence: u64,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Consumer {
    pub fn new(
        resource_key: impl Into<String>,
        consumer_id: impl Into<String>,
        permits: u32,
        priority: i32,
        sequence: u64,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            resource_key: resource_key.into(),
            consumer_id: consumer_id.into(),
            permits,
            priority,
            state: ConsumerState::Blocked,
            sequence,
            enqueued_at: Utc::now(),
            granted_at: None,
            released_at: None,
            version: 0,
        }
    }
}

/// Result of an acquire call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireOutcome {
    Granted,
    Queued,
}

/// Point-in-time view of a resource for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub constraint: ResourceConstraint,
    pub active_permits: u32,
    /// Active consumers followed by the wait queue in admission order.
    pub consumers: Vec<Consumer>,
}
