//! Live log fan-out.
//!
//! Log lines are persisted through [`capstan_core::ports::LogStore`]; this
//! broker additionally streams them to live subscribers keyed by step
//! UUID. A step with no subscribers costs nothing beyond a map lookup.

use capstan_core::rpc::LogEntry;
use std::collections::HashMap;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

/// Per-step broadcast channels for live log streaming.
#[derive(Debug, Default)]
pub struct LogBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<LogEntry>>>,
}

impl LogBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the live log stream for one step. Lines published
    /// before the subscription are not replayed; readers wanting history
    /// go through the log store.
    pub async fn subscribe(&self, step_uuid: &str) -> broadcast::Receiver<LogEntry> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(step_uuid.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fan a line out to current subscribers, if any.
    pub async fn publish(&self, entry: &LogEntry) {
        let channels = self.channels.lock().await;
        if let Some(tx) = channels.get(&entry.step_uuid) {
            // A send error just means every subscriber is gone.
            let _ = tx.send(entry.clone());
        }
    }

    /// Tear down the channel for a finished step, disconnecting any
    /// remaining subscribers.
    pub async fn close(&self, step_uuid: &str) {
        let mut channels = self.channels.lock().await;
        if channels.remove(step_uuid).is_some() {
            debug!(step_uuid, "closed log stream");
        }
    }
}
