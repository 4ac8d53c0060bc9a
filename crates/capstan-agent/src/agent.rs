//! Agent supervisor.
//!
//! Registers with the coordinator, spawns one runner loop per capacity
//! slot, and reports health on an interval until shutdown.

use crate::client::RetryClient;
use crate::config::AgentConfig;
use crate::runner::{Engine, Runner};
use crate::state::AgentState;
use capstan_core::agent::AgentInfo;
use capstan_core::error::Result;
use capstan_core::rpc::{HEALTHY_STATUS, Peer};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Agent {
    client: Arc<dyn Peer>,
    engine: Arc<dyn Engine>,
    config: AgentConfig,
    state: Arc<AgentState>,
}

impl Agent {
    /// Build an agent over a raw peer transport; calls are wrapped in a
    /// [`RetryClient`] bound to `shutdown`.
    pub fn new<P: Peer + 'static>(
        peer: P,
        engine: Arc<dyn Engine>,
        config: AgentConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let state = Arc::new(AgentState::new(config.capacity));
        Self {
            client: Arc::new(RetryClient::new(peer, shutdown)),
            engine,
            config,
            state,
        }
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    /// Register, then run until `shutdown` fires and every in-flight
    /// workflow has been reported.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let info = AgentInfo {
            platform: self.config.platform.clone(),
            backend: self.config.backend.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capacity: self.config.capacity,
        };
        let agent_id = self.client.register_agent(info).await?;
        info!(
            agent_id = %agent_id,
            platform = %self.config.platform,
            capacity = self.config.capacity,
            "agent registered"
        );

        let mut tasks = JoinSet::new();

        tasks.spawn({
            let client = Arc::clone(&self.client);
            let shutdown = shutdown.clone();
            let interval = Duration::from_secs(self.config.health_interval_secs);
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(err) = client.report_health(HEALTHY_STATUS).await {
                                warn!(error = %err, "health report failed");
                            }
                        }
                    }
                }
            }
        });

        for slot in 0..self.config.capacity {
            let runner = Runner::new(
                Arc::clone(&self.client),
                Arc::clone(&self.engine),
                Arc::clone(&self.state),
                self.config.clone(),
            );
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                info!(slot, "runner loop started");
                while !shutdown.is_cancelled() {
                    match runner.run_once(shutdown.clone()).await {
                        Ok(true) => {}
                        // empty poll; back off instead of hammering next
                        Ok(false) => {
                            tokio::select! {
                                _ = shutdown.cancelled() => {}
                                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            }
                        }
                        Err(err) => {
                            error!(slot, error = %err, "runner failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                info!(slot, "runner loop stopped");
            });
        }

        while tasks.join_next().await.is_some() {}
        info!(agent_id = %agent_id, "agent shut down");
        Ok(())
    }
}
