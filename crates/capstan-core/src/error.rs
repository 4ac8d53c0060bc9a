//! Error types for Capstan.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level error class reported by the RPC layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportCode {
    Aborted,
    DataLoss,
    DeadlineExceeded,
    Internal,
    Unavailable,
    InvalidArgument,
    PermissionDenied,
    Unimplemented,
}

impl TransportCode {
    /// Codes a peer client may retry with backoff. Everything else is
    /// fatal to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportCode::Aborted
                | TransportCode::DataLoss
                | TransportCode::DeadlineExceeded
                | TransportCode::Internal
                | TransportCode::Unavailable
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    // Queue errors
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Lease expired before completion was reported")]
    LeaseExpired,

    // Execution errors
    #[error("Step failed with exit code {exit_code}: {message}")]
    StepFailure { exit_code: i32, message: String },

    #[error("Workflow timeout after {minutes} minutes")]
    WorkflowTimeout { minutes: u64 },

    // Protocol errors
    #[error("Transport error ({code:?}): {message}")]
    Transport { code: TransportCode, message: String },

    #[error("Unexpected agent health status: {0}")]
    UnhealthyAgent(String),

    // Domain errors
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    // Infrastructure errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a failed protocol call may be retried against the same peer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport { code, .. } if code.is_transient())
    }

    /// Whether this error marks a deliberate cancellation, as opposed to
    /// a failure. Cancelled pipelines are not reported as failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = Error::Transport {
            code: TransportCode::Unavailable,
            message: "connection refused".to_string(),
        };
        assert!(transient.is_transient());

        let fatal = Error::Transport {
            code: TransportCode::PermissionDenied,
            message: "bad token".to_string(),
        };
        assert!(!fatal.is_transient());

        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_cancelled_is_not_failure() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::LeaseExpired.is_cancelled());
    }
}
