//! Domain events published by the coordinator.

use crate::ids::{AgentId, PipelineId, WorkflowId};
use crate::pipeline::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All events published over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PipelineStarted(PipelinePayload),
    PipelineCompleted(PipelinePayload),
    WorkflowCompleted(WorkflowPayload),
    StepUpdated(StepPayload),
    AgentRegistered(AgentPayload),
}

impl Event {
    /// Subject string for topic-based subscribers.
    pub fn subject(&self) -> String {
        match self {
            Event::PipelineStarted(p) => format!("pipeline.started.{}", p.pipeline_id),
            Event::PipelineCompleted(p) => format!("pipeline.completed.{}", p.pipeline_id),
            Event::WorkflowCompleted(p) => {
                format!("pipeline.{}.workflow.{}.completed", p.pipeline_id, p.workflow_id)
            }
            Event::StepUpdated(p) => format!("workflow.{}.step.{}", p.workflow_id, p.step_uuid),
            Event::AgentRegistered(_) => "agent.registered".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePayload {
    pub pipeline_id: PipelineId,
    pub number: u64,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPayload {
    pub pipeline_id: PipelineId,
    pub workflow_id: WorkflowId,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPayload {
    pub workflow_id: WorkflowId,
    pub step_uuid: String,
    pub status: Status,
    pub exit_code: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPayload {
    pub agent_id: AgentId,
    pub platform: String,
    pub backend: String,
    pub timestamp: DateTime<Utc>,
}
