//! Ambiance: the immutable execution-context chain.
//!
//! Every operation in the engine is addressed by an `Ambiance`: the plan
//! execution it belongs to plus an ordered stack of `Level`s, one per
//! nesting step from the root node down to the current node. A child
//! ambiance is always derived by appending a level to a clone of the
//! parent; nothing mutates an ambiance in place.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type tag of a step implementation (e.g. "fork", "delegate").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepType(pub String);

impl StepType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One entry in the ambiance stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// ID of the `PlanNode` this level executes.
    pub node_id: String,
    /// ID of the `NodeExecution` created for this level.
    pub node_execution_id: Uuid,
    /// Step type of the node.
    pub step_type: StepType,
    /// Run sequence: 0 for the first attempt, incremented on every retry.
    pub retry_index: u32,
    /// When this level was entered.
    pub start_ts: DateTime<Utc>,
}

/// Immutable, append-only execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    pub plan_execution_id: Uuid,
    pub plan_id: Uuid,
    #[serde(default)]
    levels: Vec<Level>,
}

impl Ambiance {
    /// Root ambiance for a plan execution (no levels yet).
    pub fn new(plan_id: Uuid, plan_execution_id: Uuid) -> Self {
        Self {
            plan_execution_id,
            plan_id,
            levels: Vec::new(),
        }
    }

    /// Derive a child ambiance by appending `level`.
    pub fn with_level(&self, level: Level) -> Self {
        let mut levels = Vec::with_capacity(self.levels.len() + 1);
        levels.extend(self.levels.iter().cloned());
        levels.push(level);
        Self {
            plan_execution_id: self.plan_execution_id,
            plan_id: self.plan_id,
            levels,
        }
    }

    /// Derive the ambiance of a retry: same stack, last level replaced.
    pub fn for_retry(&self, level: Level) -> Self {
        let keep = self.levels.len().saturating_sub(1);
        let mut levels: Vec<Level> = self.levels[..keep].to_vec();
        levels.push(level);
        Self {
            plan_execution_id: self.plan_execution_id,
            plan_id: self.plan_id,
            levels,
        }
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Nesting depth (0 for the plan-level ambiance).
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn node_execution_id(&self) -> Option<Uuid> {
        self.current_level().map(|l| l.node_execution_id)
    }

    /// Node-ID path from the root, e.g. `root/fork/b`.
    pub fn node_path(&self) -> String {
        self.levels
            .iter()
            .map(|l| l.node_id.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}
