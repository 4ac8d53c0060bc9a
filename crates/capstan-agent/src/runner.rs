//! The runner: drives one workflow from `next` to `done`.
//!
//! Each runner slot loops: pull a workflow, register it in the agent
//! state, execute it through the [`Engine`] while renewing the lease and
//! watching for server-side cancellation, then report the final state.
//! Log lines and step transitions stream back to the coordinator through
//! forwarder tasks so the engine never blocks on the network.

use crate::config::AgentConfig;
use crate::state::{AgentState, WorkInfo};
use async_trait::async_trait;
use capstan_core::error::{Error, Result};
use capstan_core::rpc::{LogEntry, NextFilter, Peer, StepState, WorkflowPayload, WorkflowState};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const LEASE_RENEWAL_INTERVAL: Duration = Duration::from_secs(60);

const EXIT_CODE_KILLED: i32 = 137;
const CHANNEL_CAPACITY: usize = 64;

/// Handles the engine gets for streaming progress and observing
/// cancellation. Dropping it closes both streams.
pub struct ExecContext {
    pub cancel: CancellationToken,
    pub logs: mpsc::Sender<LogEntry>,
    pub steps: mpsc::Sender<StepState>,
}

/// Executes a workflow against some backend. Implementations watch
/// `ctx.cancel` and abandon work promptly when it fires.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn run(&self, payload: &WorkflowPayload, ctx: ExecContext) -> Result<()>;
}

pub struct Runner {
    client: Arc<dyn Peer>,
    engine: Arc<dyn Engine>,
    state: Arc<AgentState>,
    config: AgentConfig,
}

impl Runner {
    pub fn new(
        client: Arc<dyn Peer>,
        engine: Arc<dyn Engine>,
        state: Arc<AgentState>,
        config: AgentConfig,
    ) -> Self {
        Self {
            client,
            engine,
            state,
            config,
        }
    }

    /// Pull one workflow and drive it to completion. Returns `false`
    /// without doing work when the poll comes back empty or `shutdown`
    /// fires first.
    pub async fn run_once(&self, shutdown: CancellationToken) -> Result<bool> {
        let filter = NextFilter::new(self.config.labels.clone());
        let payload = tokio::select! {
            _ = shutdown.cancelled() => return Ok(false),
            polled = self.client.next(filter) => polled?,
        };
        let Some(payload) = payload else {
            return Ok(false);
        };
        let workflow_id = payload.id.clone();

        let timeout_minutes = if payload.timeout > 0 {
            payload.timeout
        } else {
            self.config.default_timeout_minutes
        };
        let deadline = Duration::from_secs(timeout_minutes * 60);
        info!(workflow_id = %workflow_id, timeout_minutes, "received workflow");

        self.state
            .register(WorkInfo {
                workflow_id: workflow_id.clone(),
                started: Utc::now(),
                timeout: deadline,
            })
            .await;

        let cancel = shutdown.child_token();
        let cancelled_remotely = Arc::new(AtomicBool::new(false));

        let timeout_guard = tokio::spawn({
            let cancel = cancel.clone();
            let workflow_id = workflow_id.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(deadline) => {
                        warn!(workflow_id = %workflow_id, timeout_minutes, "workflow timed out");
                        cancel.cancel();
                    }
                }
            }
        });

        // `wait` resolving with a cancellation or lost lease means the
        // server gave up on us; stop the engine. Our own `done` call
        // resolves it cleanly at the end.
        let watcher = tokio::spawn({
            let client = Arc::clone(&self.client);
            let cancel = cancel.clone();
            let cancelled_remotely = Arc::clone(&cancelled_remotely);
            let workflow_id = workflow_id.clone();
            async move {
                match client.wait(&workflow_id).await {
                    Err(err) if err.is_cancelled() || matches!(err, Error::LeaseExpired) => {
                        info!(workflow_id = %workflow_id, "workflow cancelled server-side");
                        cancelled_remotely.store(true, Ordering::SeqCst);
                        cancel.cancel();
                    }
                    Err(err) => warn!(workflow_id = %workflow_id, error = %err, "wait failed"),
                    Ok(()) => {}
                }
            }
        });

        let lease_ticker = tokio::spawn({
            let client = Arc::clone(&self.client);
            let cancel = cancel.clone();
            let workflow_id = workflow_id.clone();
            async move {
                let mut ticker = tokio::time::interval(LEASE_RENEWAL_INTERVAL);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(err) = client.extend(&workflow_id).await {
                                warn!(workflow_id = %workflow_id, error = %err, "lease extension failed");
                            }
                        }
                    }
                }
            }
        });

        if let Err(err) = self
            .client
            .init(
                &workflow_id,
                WorkflowState {
                    started: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(workflow_id = %workflow_id, error = %err, "init failed");
        }

        let (log_tx, mut log_rx) = mpsc::channel::<LogEntry>(CHANNEL_CAPACITY);
        let (step_tx, mut step_rx) = mpsc::channel::<StepState>(CHANNEL_CAPACITY);
        let mut uploads = JoinSet::new();
        uploads.spawn({
            let client = Arc::clone(&self.client);
            async move {
                while let Some(entry) = log_rx.recv().await {
                    if let Err(err) = client.log(entry).await {
                        warn!(error = %err, "log upload failed");
                    }
                }
            }
        });
        uploads.spawn({
            let client = Arc::clone(&self.client);
            let workflow_id = workflow_id.clone();
            async move {
                while let Some(state) = step_rx.recv().await {
                    if let Err(err) = client.update(&workflow_id, state).await {
                        warn!(workflow_id = %workflow_id, error = %err, "step update failed");
                    }
                }
            }
        });

        let ctx = ExecContext {
            cancel: cancel.clone(),
            logs: log_tx,
            steps: step_tx,
        };
        let result = self.engine.run(&payload, ctx).await;

        let mut state = WorkflowState {
            finished: Some(Utc::now()),
            ..Default::default()
        };
        if cancel.is_cancelled() {
            state.exit_code = EXIT_CODE_KILLED;
        } else if let Err(err) = result {
            match err {
                Error::StepFailure { exit_code, message } => {
                    state.exit_code = exit_code;
                    state.error = message;
                }
                other => {
                    state.exit_code = 1;
                    state.error = other.to_string();
                }
            }
        }

        // Dropping ExecContext closed the channels; let the forwarders
        // flush what is in flight before reporting done.
        while uploads.join_next().await.is_some() {}

        debug!(workflow_id = %workflow_id, exit_code = state.exit_code, "reporting done");
        if let Err(err) = self.client.done(&workflow_id, state.clone()).await {
            warn!(workflow_id = %workflow_id, error = %err, "done report failed");
        }

        cancel.cancel();
        watcher.abort();
        let _ = timeout_guard.await;
        let _ = lease_ticker.await;

        self.state.finish(&workflow_id).await;
        info!(
            workflow_id = %workflow_id,
            exit_code = state.exit_code,
            cancelled = cancelled_remotely.load(Ordering::SeqCst),
            "workflow finished"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::ids::AgentId;
    use capstan_core::rpc::LogKind;
    use capstan_core::agent::AgentInfo;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct ScriptedPeer {
        payloads: Mutex<Vec<WorkflowPayload>>,
        calls: Mutex<Vec<String>>,
        done_states: Mutex<Vec<WorkflowState>>,
        logs: Mutex<Vec<LogEntry>>,
        wait_error: Mutex<Option<Error>>,
    }

    impl ScriptedPeer {
        fn with_payload(id: &str) -> Self {
            let peer = Self::default();
            peer.payloads.try_lock().unwrap().push(WorkflowPayload {
                id: id.to_string(),
                timeout: 0,
                config: serde_json::Value::Null,
            });
            peer
        }
    }

    #[async_trait]
    impl Peer for ScriptedPeer {
        async fn next(&self, _filter: NextFilter) -> Result<Option<WorkflowPayload>> {
            self.calls.lock().await.push("next".to_string());
            Ok(self.payloads.lock().await.pop())
        }

        async fn wait(&self, _workflow_id: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            match self.wait_error.lock().await.take() {
                Some(err) => Err(err),
                None => std::future::pending().await,
            }
        }

        async fn init(&self, _workflow_id: &str, _state: WorkflowState) -> Result<()> {
            self.calls.lock().await.push("init".to_string());
            Ok(())
        }

        async fn update(&self, _workflow_id: &str, _state: StepState) -> Result<()> {
            self.calls.lock().await.push("update".to_string());
            Ok(())
        }

        async fn done(&self, _workflow_id: &str, state: WorkflowState) -> Result<()> {
            self.calls.lock().await.push("done".to_string());
            self.done_states.lock().await.push(state);
            Ok(())
        }

        async fn extend(&self, _workflow_id: &str) -> Result<()> {
            Ok(())
        }

        async fn log(&self, entry: LogEntry) -> Result<()> {
            self.logs.lock().await.push(entry);
            Ok(())
        }

        async fn register_agent(&self, _info: AgentInfo) -> Result<AgentId> {
            Ok(AgentId::new())
        }

        async fn report_health(&self, _status: &str) -> Result<()> {
            Ok(())
        }
    }

    struct OkEngine;

    #[async_trait]
    impl Engine for OkEngine {
        async fn run(&self, payload: &WorkflowPayload, ctx: ExecContext) -> Result<()> {
            ctx.logs
                .send(LogEntry {
                    step_uuid: "step-1".to_string(),
                    time: Utc::now(),
                    kind: LogKind::Stdout,
                    line: 0,
                    data: format!("running {}", payload.id),
                })
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
            ctx.steps
                .send(StepState {
                    step_uuid: "step-1".to_string(),
                    finished: Some(Utc::now()),
                    exited: true,
                    ..Default::default()
                })
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
            Ok(())
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl Engine for FailingEngine {
        async fn run(&self, _payload: &WorkflowPayload, _ctx: ExecContext) -> Result<()> {
            Err(Error::StepFailure {
                exit_code: 2,
                message: "compile failed".to_string(),
            })
        }
    }

    struct BlockingEngine;

    #[async_trait]
    impl Engine for BlockingEngine {
        async fn run(&self, _payload: &WorkflowPayload, ctx: ExecContext) -> Result<()> {
            ctx.cancel.cancelled().await;
            Err(Error::Cancelled)
        }
    }

    fn runner(peer: Arc<ScriptedPeer>, engine: Arc<dyn Engine>) -> Runner {
        Runner::new(
            peer,
            engine,
            Arc::new(AgentState::new(1)),
            AgentConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_successful_workflow_reports_clean_done() {
        let peer = Arc::new(ScriptedPeer::with_payload("wf-1"));
        let r = runner(peer.clone(), Arc::new(OkEngine));

        r.run_once(CancellationToken::new()).await.unwrap();

        let done = peer.done_states.lock().await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].exit_code, 0);
        assert!(done[0].error.is_empty());

        // Uploads flushed before done was reported.
        assert_eq!(peer.logs.lock().await.len(), 1);
        let calls = peer.calls.lock().await;
        assert_eq!(
            calls.as_slice(),
            &["next", "init", "update", "done"].map(String::from)
        );
    }

    #[tokio::test]
    async fn test_engine_failure_maps_to_exit_code() {
        let peer = Arc::new(ScriptedPeer::with_payload("wf-1"));
        let r = runner(peer.clone(), Arc::new(FailingEngine));

        r.run_once(CancellationToken::new()).await.unwrap();

        let done = peer.done_states.lock().await;
        assert_eq!(done[0].exit_code, 2);
        assert_eq!(done[0].error, "compile failed");
    }

    #[tokio::test]
    async fn test_server_side_cancellation_kills_workflow() {
        let peer = Arc::new(ScriptedPeer::with_payload("wf-1"));
        *peer.wait_error.try_lock().unwrap() = Some(Error::Cancelled);
        let r = runner(peer.clone(), Arc::new(BlockingEngine));

        r.run_once(CancellationToken::new()).await.unwrap();

        let done = peer.done_states.lock().await;
        assert_eq!(done[0].exit_code, EXIT_CODE_KILLED);
        assert!(done[0].error.is_empty());
    }

    #[tokio::test]
    async fn test_empty_poll_returns_without_work() {
        let peer = Arc::new(ScriptedPeer::default());
        let r = runner(peer.clone(), Arc::new(OkEngine));

        let did_work = r.run_once(CancellationToken::new()).await.unwrap();
        assert!(!did_work);
        assert!(peer.done_states.lock().await.is_empty());
        assert_eq!(peer.calls.lock().await.as_slice(), &["next".to_string()]);
    }
}
