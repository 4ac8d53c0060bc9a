//! The distributed scheduling core: an in-memory dependency-aware task
//! queue with lease-based redelivery, label matching for agent
//! assignment, and an optional persistence decorator.

pub mod durable;
pub mod fifo;
pub mod matcher;

pub use durable::DurableQueue;
pub use fifo::Fifo;
pub use matcher::LabelMatcher;
