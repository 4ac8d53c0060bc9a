//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduling core and
//! external adapters: the task queue itself, persistent storage, the
//! event bus, and the forge integration.

use crate::agent::Agent;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::ids::{AgentId, PipelineId, WorkflowId};
use crate::pipeline::{Pipeline, Step, Workflow};
use crate::rpc::LogEntry;
use crate::task::{Task, TaskStatus};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Decides whether an agent can run a task, and how well it fits.
/// `None` means no match; higher scores win assignment.
pub trait Matcher: Send + Sync {
    fn matches(&self, task: &Task) -> Option<u32>;
}

/// Read-only snapshot of queue contents, taken under the queue's lock.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueInfo {
    pub pending: Vec<Task>,
    pub waiting_on_deps: Vec<Task>,
    pub running: Vec<Task>,
    pub stats: QueueStats,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub workers: usize,
    pub pending: usize,
    pub waiting_on_deps: usize,
    pub running: usize,
    pub completed: u64,
}

/// The dependency-aware task queue.
///
/// A task ID lives in at most one of pending / waiting-on-deps / running
/// at any instant. Delivery is at-least-once: a running task whose lease
/// expires is requeued, never duplicated.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Append a task to the pending set. Task IDs must be unique;
    /// a duplicate push is accepted but shadows the earlier copy until
    /// that one completes.
    async fn push(&self, task: Task) -> Result<()>;

    /// Append several tasks atomically with respect to scheduling.
    async fn push_at_once(&self, tasks: Vec<Task>) -> Result<()>;

    /// Register a waiting worker and block until a task is handed to it.
    /// Cancelling the caller (dropping the future) deregisters the
    /// worker; a closed handoff resolves to `None`.
    async fn poll(&self, matcher: Arc<dyn Matcher>) -> Result<Option<Task>>;

    /// Reset a running task's lease deadline.
    async fn extend(&self, id: &str) -> Result<()>;

    /// Block until the task's completion signal fires; returns the
    /// stored completion error, if any.
    async fn wait(&self, id: &str) -> Result<()>;

    /// Mark a task complete with the given terminal status.
    async fn done(&self, id: &str, status: TaskStatus) -> Result<()>;

    /// Mark a task failed, storing `err` for `wait` callers.
    async fn error(&self, id: &str, err: Error) -> Result<()>;

    /// Mark several tasks failed with the same error.
    async fn error_at_once(&self, ids: &[String], err: Error) -> Result<()>;

    /// Remove an as-yet-undispatched task.
    async fn evict(&self, id: &str) -> Result<()>;

    /// Remove several undispatched tasks.
    async fn evict_at_once(&self, ids: &[String]) -> Result<()>;

    /// Consistent snapshot of queue contents and counters.
    async fn info(&self) -> QueueInfo;

    /// Stop dispatching new tasks. Push and poll registration still work.
    async fn pause(&self);

    /// Resume dispatch and immediately run a scheduling pass.
    async fn resume(&self);
}

/// Durable record store backing the queue across restarts.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<Task>>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>>;
    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<()>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn workflow(&self, id: WorkflowId) -> Result<Option<Workflow>>;
    async fn workflows(&self, pipeline_id: PipelineId) -> Result<Vec<Workflow>>;
    async fn update_workflow(&self, workflow: &Workflow) -> Result<()>;
}

#[async_trait]
pub trait StepStore: Send + Sync {
    async fn steps(&self, workflow_id: WorkflowId) -> Result<Vec<Step>>;
    async fn step_by_uuid(&self, uuid: &str) -> Result<Option<Step>>;
    async fn update_step(&self, step: &Step) -> Result<()>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append_log(&self, entry: &LogEntry) -> Result<()>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn create_agent(&self, agent: &Agent) -> Result<AgentId>;
}

/// The full persistence collaborator consumed by the coordinator.
pub trait Store:
    PipelineStore + WorkflowStore + StepStore + LogStore + AgentStore + Send + Sync
{
}

impl<T> Store for T where
    T: PipelineStore + WorkflowStore + StepStore + LogStore + AgentStore + Send + Sync
{
}

/// Event bus for publishing domain events.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}

/// Upstream source-control integration. Only the status surface is
/// consumed here.
#[async_trait]
pub trait Forge: Send + Sync {
    async fn send_status(&self, pipeline: &Pipeline, workflow: &Workflow) -> Result<()>;
}
