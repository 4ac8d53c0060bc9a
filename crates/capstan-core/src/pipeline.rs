//! Pipeline, workflow, and step domain records.
//!
//! A pipeline is one execution of a pipeline definition; it fans out into
//! workflows (one queue task each), which in turn contain steps. These
//! records are persisted through the store ports and mutated only by the
//! coordinator.

use crate::ids::{AgentId, PipelineId, StepId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
    Blocked,
    Killed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Success | Status::Failure | Status::Skipped | Status::Killed
        )
    }

    /// Whether this outcome counts as passing for aggregate status.
    pub fn is_passing(&self) -> bool {
        matches!(self, Status::Success | Status::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub number: u64,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Pipeline {
    pub fn new(number: u64) -> Self {
        Self {
            id: PipelineId::new(),
            number,
            status: Status::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub status: Status,
    pub agent_id: Option<AgentId>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Workflow {
    pub fn new(pipeline_id: PipelineId, name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            pipeline_id,
            name: name.into(),
            status: Status::Pending,
            agent_id: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Also the key used by the log-append protocol.
    pub id: StepId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub status: Status,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(workflow_id: WorkflowId, name: impl Into<String>) -> Self {
        Self {
            id: StepId::new(),
            workflow_id,
            name: name.into(),
            status: Status::Pending,
            exit_code: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}
