//! Metrics for coordinator observability.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the coordinator across protocol calls.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    /// Workflows handed to agents via `next`.
    pub workflows_dispatched: AtomicU64,
    /// Workflows auto-skipped because their dependencies disqualified them.
    pub workflows_skipped: AtomicU64,
    /// Workflows reported done (any terminal status).
    pub workflows_completed: AtomicU64,
    /// Pipelines whose aggregate status reached a terminal state.
    pub pipelines_completed: AtomicU64,
    /// Log lines appended.
    pub log_lines: AtomicU64,
    /// Agents registered.
    pub agents_registered: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_dispatch(&self) {
        self.workflows_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.workflows_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_workflow_completed(&self) {
        self.workflows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pipeline_completed(&self) {
        self.pipelines_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_line(&self) {
        self.log_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_agent_registered(&self) {
        self.agents_registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            workflows_dispatched: self.workflows_dispatched.load(Ordering::Relaxed),
            workflows_skipped: self.workflows_skipped.load(Ordering::Relaxed),
            workflows_completed: self.workflows_completed.load(Ordering::Relaxed),
            pipelines_completed: self.pipelines_completed.load(Ordering::Relaxed),
            log_lines: self.log_lines.load(Ordering::Relaxed),
            agents_registered: self.agents_registered.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub workflows_dispatched: u64,
    pub workflows_skipped: u64,
    pub workflows_completed: u64,
    pub pipelines_completed: u64,
    pub log_lines: u64,
    pub agents_registered: u64,
}
