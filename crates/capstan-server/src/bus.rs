//! In-process event bus.
//!
//! Deployments wanting durable or cross-process delivery implement
//! [`EventBus`] against their broker of choice; this broadcast-backed bus
//! is the default for single-process servers and tests.

use async_trait::async_trait;
use capstan_core::Result;
use capstan_core::events::Event;
use capstan_core::ports::EventBus;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast-backed [`EventBus`] implementation.
#[derive(Debug)]
pub struct MemoryBus {
    tx: broadcast::Sender<Event>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, event: Event) -> Result<()> {
        debug!(subject = %event.subject(), "publishing event");
        // No subscribers is fine; events are fire-and-forget.
        let _ = self.tx.send(event);
        Ok(())
    }
}
