//! Compiled plan types.
//!
//! A `Plan` is supplied fully resolved by the plan compiler; the engine
//! never parses authoring formats. Nodes are addressed by string ID and are
//! immutable once the plan is created.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ambiance::StepType;
use crate::error::PlanError;
use crate::status::Status;

/// A compiled execution graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Node the engine starts first. Every other node is reached from it.
    pub root_node_id: String,
    pub nodes: Vec<PlanNode>,
    /// Resource capacities this plan relies on (merged with startup config).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceDeclaration>,
    /// Barriers scoped to one execution of this plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub barriers: Vec<BarrierDeclaration>,
}

impl Plan {
    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn root(&self) -> Option<&PlanNode> {
        self.node(&self.root_node_id)
    }

    /// Structural checks: non-empty, unique node IDs, root present, and every
    /// barrier a node names is declared.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.nodes.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(PlanError::InvalidNode("node id must not be empty".into()));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(PlanError::DuplicateNode(node.id.clone()));
            }
            if let Some(req) = &node.restraint {
                if req.permits == 0 {
                    return Err(PlanError::InvalidNode(format!(
                        "node '{}' requests zero permits",
                        node.id
                    )));
                }
            }
            if let Some(barrier) = &node.barrier {
                if !self.barriers.iter().any(|b| &b.key == barrier) {
                    return Err(PlanError::UnknownBarrier(barrier.clone()));
                }
            }
        }

        if !seen.contains(self.root_node_id.as_str()) {
            return Err(PlanError::MissingRoot(self.root_node_id.clone()));
        }

        for barrier in &self.barriers {
            if barrier.parties == 0 {
                return Err(PlanError::InvalidNode(format!(
                    "barrier '{}' must have at least one party",
                    barrier.key
                )));
            }
        }

        Ok(())
    }
}

/// One run of a plan. Holds the plan itself so a restarted engine can
/// resume the execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanExecution {
    pub id: Uuid,
    pub plan: Plan,
    /// RUNNING until the root node concludes, then the root's status.
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_node_execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl PlanExecution {
    pub fn new(plan: Plan) -> Self {
        Self {
            id: Uuid::now_v7(),
            plan,
            status: Status::Running,
            root_node_execution_id: None,
            created_at: Utc::now(),
            ended_at: None,
            version: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != Status::Running
    }
}

/// A static node of the plan graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub step_type: StepType,
    /// Opaque payload; only the step implementation interprets it.
    #[serde(default)]
    pub step_parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adviser_obtainments: Vec<AdviserObtainment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facilitator_obtainments: Vec<FacilitatorObtainment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<WhenCondition>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Deadline for the node while it waits on a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restraint: Option<ResourceRequirement>,
    /// Key of a barrier declared on the plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barrier: Option<String>,
}

impl PlanNode {
    /// Minimal node with no obtainments, used by builders and tests.
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            step_type: StepType::new(step_type),
            step_parameters: serde_json::Value::Null,
            adviser_obtainments: Vec::new(),
            facilitator_obtainments: Vec::new(),
            when: None,
            skip: false,
            group: None,
            timeout_secs: None,
            restraint: None,
            barrier: None,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    pub fn with_adviser(mut self, adviser_type: &str, parameters: serde_json::Value) -> Self {
        self.adviser_obtainments.push(AdviserObtainment {
            adviser_type: adviser_type.to_string(),
            parameters,
        });
        self
    }

    pub fn with_facilitator(mut self, facilitator_type: &str, parameters: serde_json::Value) -> Self {
        self.facilitator_obtainments.push(FacilitatorObtainment {
            facilitator_type: facilitator_type.to_string(),
            parameters,
        });
        self
    }

    /// Decode the step parameters into the step's own parameter type.
    pub fn parameters<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.step_parameters.clone())
    }
}

/// Declares an adviser type plus its adviser-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviserObtainment {
    #[serde(rename = "type")]
    pub adviser_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Declares a facilitator type plus its configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilitatorObtainment {
    #[serde(rename = "type")]
    pub facilitator_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Run predicate evaluated when the node is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhenCondition {
    pub plan_status: PlanStatusFilter,
}

/// Which plan outcome-so-far lets the node run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatusFilter {
    /// Only while no node of the plan execution has failed.
    Success,
    /// Only once some node has failed.
    Failure,
    Always,
}

impl WhenCondition {
    pub fn allows(&self, plan_has_failure: bool) -> bool {
        match self.plan_status {
            PlanStatusFilter::Success => !plan_has_failure,
            PlanStatusFilter::Failure => plan_has_failure,
            PlanStatusFilter::Always => true,
        }
    }
}

/// Permits a node needs on a named restraint before it may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub resource_key: String,
    #[serde(default = "default_permits")]
    pub permits: u32,
    #[serde(default)]
    pub priority: i32,
}

fn default_permits() -> u32 {
    1
}

/// A named capacity declared by a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub key: String,
    pub capacity: u32,
}

/// An N-way rendezvous declared by a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierDeclaration {
    pub key: String,
    pub parties: u32,
}
