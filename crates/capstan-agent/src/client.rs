//! Retrying peer client.
//!
//! Wraps any [`Peer`] transport and retries calls that fail with a
//! transient transport error, on a fixed backoff, forever. Fatal errors
//! and cancellation pass straight through. The runner above never sees a
//! blip in coordinator connectivity.

use async_trait::async_trait;
use capstan_core::agent::AgentInfo;
use capstan_core::error::{Error, Result};
use capstan_core::ids::AgentId;
use capstan_core::rpc::{LogEntry, NextFilter, Peer, StepState, WorkflowPayload, WorkflowState};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct RetryClient<P> {
    peer: P,
    backoff: Duration,
    shutdown: CancellationToken,
}

impl<P: Peer> RetryClient<P> {
    pub fn new(peer: P, shutdown: CancellationToken) -> Self {
        Self {
            peer,
            backoff: RETRY_BACKOFF,
            shutdown,
        }
    }

    pub fn with_backoff(peer: P, backoff: Duration, shutdown: CancellationToken) -> Self {
        Self {
            peer,
            backoff,
            shutdown,
        }
    }

    async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    debug!(error = %err, "transient peer error, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<P: Peer> Peer for RetryClient<P> {
    async fn next(&self, filter: NextFilter) -> Result<Option<WorkflowPayload>> {
        self.call(|| self.peer.next(filter.clone())).await
    }

    async fn wait(&self, workflow_id: &str) -> Result<()> {
        self.call(|| self.peer.wait(workflow_id)).await
    }

    async fn init(&self, workflow_id: &str, state: WorkflowState) -> Result<()> {
        self.call(|| self.peer.init(workflow_id, state.clone())).await
    }

    async fn update(&self, workflow_id: &str, state: StepState) -> Result<()> {
        self.call(|| self.peer.update(workflow_id, state.clone()))
            .await
    }

    async fn done(&self, workflow_id: &str, state: WorkflowState) -> Result<()> {
        self.call(|| self.peer.done(workflow_id, state.clone())).await
    }

    async fn extend(&self, workflow_id: &str) -> Result<()> {
        self.call(|| self.peer.extend(workflow_id)).await
    }

    async fn log(&self, entry: LogEntry) -> Result<()> {
        self.call(|| self.peer.log(entry.clone())).await
    }

    async fn register_agent(&self, info: AgentInfo) -> Result<AgentId> {
        self.call(|| self.peer.register_agent(info.clone())).await
    }

    async fn report_health(&self, status: &str) -> Result<()> {
        self.call(|| self.peer.report_health(status)).await
    }
}
