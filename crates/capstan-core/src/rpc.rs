//! The peer protocol between coordinator and agents.
//!
//! The transport carrying these calls is out of scope; both the
//! server-side coordinator and the agent-side client implement [`Peer`].

use crate::agent::AgentInfo;
use crate::error::Result;
use crate::ids::AgentId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The exact status string an agent must report for a health check to
/// pass. Anything else is rejected.
pub const HEALTHY_STATUS: &str = "healthy";

/// Label filter an agent submits when asking for work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextFilter {
    pub labels: HashMap<String, String>,
}

impl NextFilter {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }
}

/// The unit of work handed to an agent by `next`. The task's opaque data
/// decodes into this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPayload {
    pub id: String,
    /// Execution timeout in minutes; zero means the agent default.
    #[serde(default)]
    pub timeout: u64,
    /// Opaque backend configuration, forwarded to the engine unchanged.
    pub config: serde_json::Value,
}

/// Workflow-level state reported by `init` and `done`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub error: String,
}

impl WorkflowState {
    /// A non-zero exit code or a non-empty error string marks failure.
    pub fn failed(&self) -> bool {
        self.exit_code != 0 || !self.error.is_empty()
    }
}

/// Per-step state reported by `update` while a workflow runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepState {
    pub step_uuid: String,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exited: bool,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Stdout,
    Stderr,
    ExitCode,
}

/// A single log line keyed by step identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub step_uuid: String,
    pub time: DateTime<Utc>,
    pub kind: LogKind,
    pub line: u32,
    pub data: String,
}

/// The bidirectional coordination protocol. `next` has long-poll
/// semantics; every call is retried by the client per its backoff policy.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Ask for the next workflow matching the agent's labels. Blocks
    /// until work is available or the server shuts the poll down.
    async fn next(&self, filter: NextFilter) -> Result<Option<WorkflowPayload>>;

    /// Block until the workflow completes or is cancelled server-side.
    async fn wait(&self, workflow_id: &str) -> Result<()>;

    /// Report that execution has started.
    async fn init(&self, workflow_id: &str, state: WorkflowState) -> Result<()>;

    /// Report an intermediate per-step state change.
    async fn update(&self, workflow_id: &str, state: StepState) -> Result<()>;

    /// Report final state, driving dependency propagation.
    async fn done(&self, workflow_id: &str, state: WorkflowState) -> Result<()>;

    /// Lease heartbeat for a running workflow.
    async fn extend(&self, workflow_id: &str) -> Result<()>;

    /// Append a log line and fan it out to live subscribers.
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Announce this agent to the fleet and obtain its identity.
    async fn register_agent(&self, info: AgentInfo) -> Result<AgentId>;

    /// Periodic health report; fails unless `status` equals
    /// [`HEALTHY_STATUS`].
    async fn report_health(&self, status: &str) -> Result<()>;
}
