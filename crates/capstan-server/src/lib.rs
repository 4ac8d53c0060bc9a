//! Server-side protocol coordination.
//!
//! The [`Coordinator`] implements the agent-facing [`capstan_core::rpc::Peer`]
//! protocol on top of the task queue and the persistence ports, and owns
//! the live log fan-out and the in-memory event bus.

pub mod bus;
pub mod coordinator;
pub mod logs;
pub mod metrics;

pub use bus::MemoryBus;
pub use coordinator::{Coordinator, CoordinatorContext};
pub use logs::LogBroker;
pub use metrics::{CoordinatorMetrics, MetricsSnapshot};
