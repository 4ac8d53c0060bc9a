//! Capstan Core
//!
//! Core domain types, traits, and error handling for Capstan.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod agent;
pub mod error;
pub mod events;
pub mod ids;
pub mod pipeline;
pub mod ports;
pub mod rpc;
pub mod task;

pub use error::{Error, Result};
pub use ids::*;
