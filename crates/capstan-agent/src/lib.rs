//! Agent-side peer client and workflow runner.
//!
//! An [`Agent`] registers with the coordinator, runs as many concurrent
//! [`Runner`] loops as its configured capacity, and reports health on an
//! interval. Protocol calls go through [`RetryClient`] so transient
//! transport failures never surface to the runner state machine.

pub mod agent;
pub mod client;
pub mod config;
pub mod logging;
pub mod runner;
pub mod state;

pub use agent::Agent;
pub use client::RetryClient;
pub use config::AgentConfig;
pub use runner::{Engine, ExecContext, Runner};
pub use state::{AgentState, WorkInfo};
