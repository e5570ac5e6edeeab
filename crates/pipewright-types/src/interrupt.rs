//! Interrupt records.
//!
//! Interrupts are appended, never deleted. Applying one only stamps
//! `applied_at` (or records a rejection reason) on the stored record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptType {
    Abort,
    Pause,
    Resume,
    Retry,
    MarkSuccess,
    MarkFailed,
    Ignore,
}

impl InterruptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptType::Abort => "abort",
            InterruptType::Pause => "pause",
            InterruptType::Resume => "resume",
            InterruptType::Retry => "retry",
            InterruptType::MarkSuccess => "mark_success",
            InterruptType::MarkFailed => "mark_failed",
            InterruptType::Ignore => "ignore",
        }
    }
}

impl fmt::Display for InterruptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterruptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "abort" => Ok(InterruptType::Abort),
            "pause" => Ok(InterruptType::Pause),
            "resume" => Ok(InterruptType::Resume),
            "retry" => Ok(InterruptType::Retry),
            "mark_success" => Ok(InterruptType::MarkSuccess),
            "mark_failed" => Ok(InterruptType::MarkFailed),
            "ignore" => Ok(InterruptType::Ignore),
            other => Err(format!("unknown interrupt type: '{other}'")),
        }
    }
}

/// Who raised an interrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum IssuedBy {
    Manual { user: String },
    Adviser,
    Timeout,
    Trigger,
}

impl Default for IssuedBy {
    fn default() -> Self {
        IssuedBy::Manual {
            user: "anonymous".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptState {
    Registered,
    Applied,
    Rejected,
}

impl InterruptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptState::Registered => "registered",
            InterruptState::Applied => "applied",
            InterruptState::Rejected => "rejected",
        }
    }
}

/// A registered interrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interrupt {
    pub id: Uuid,
    pub interrupt_type: InterruptType,
    pub plan_execution_id: Uuid,
    /// None targets the whole plan execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<Uuid>,
    pub issued_by: IssuedBy,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    pub state: InterruptState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub version: u64,
}

impl Interrupt {
    pub fn new(
        interrupt_type: InterruptType,
        plan_execution_id: Uuid,
        node_execution_id: Option<Uuid>,
        issued_by: IssuedBy,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            interrupt_type,
            plan_execution_id,
            node_execution_id,
            issued_by,
            created_at: Utc::now(),
            applied_at: None,
            state: InterruptState::Registered,
            rejection_reason: None,
            version: 0,
        }
    }

    pub fn is_plan_wide(&self) -> bool {
        self.node_execution_id.is_none()
    }

    pub fn is_pending(&self) -> bool {
        self.state == InterruptState::Registered
    }
}

/// Entry appended to a NodeExecution's interrupt history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptEffect {
    pub interrupt_id: Uuid,
    pub interrupt_type: InterruptType,
    pub issued_by: IssuedBy,
    pub applied_at: DateTime<Utc>,
}
