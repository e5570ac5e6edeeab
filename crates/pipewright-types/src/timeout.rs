use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an armed deadline guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPurpose {
    /// A node waiting on a callback or delegate response.
    Response,
    /// A node parked in INTERVENTION_WAITING; fires an abort.
    Intervention,
}

impl TimeoutPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutPurpose::Response => "response",
            TimeoutPurpose::Intervention => "intervention",
        }
    }
}

/// A durable armed deadline for one node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutInstance {
    pub id: Uuid,
    pub node_execution_id: Uuid,
    pub plan_execution_id: Uuid,
    pub purpose: TimeoutPurpose,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl TimeoutInstance {
    pub fn new(
        node_execution_id: Uuid,
        plan_execution_id: Uuid,
        purpose: TimeoutPurpose,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            node_execution_id,
            plan_execution_id,
            purpose,
            deadline,
            created_at: Utc::now(),
            version: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deadline <= now
    }
}
