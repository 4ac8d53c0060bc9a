//! Shared agent bookkeeping.
//!
//! Tracks how many runner slots are idle versus busy and what each busy
//! slot is working on. Health reporting and graceful shutdown read this.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// What one busy runner slot is executing.
#[derive(Debug, Clone)]
pub struct WorkInfo {
    pub workflow_id: String,
    pub started: DateTime<Utc>,
    pub timeout: Duration,
}

#[derive(Debug, Default)]
pub struct AgentState {
    /// Slots currently blocked in `next`.
    pub polling: AtomicI64,
    /// Slots currently executing a workflow.
    pub running: AtomicI64,
    work: Mutex<HashMap<String, WorkInfo>>,
}

impl AgentState {
    pub fn new(capacity: u32) -> Self {
        Self {
            polling: AtomicI64::new(capacity as i64),
            running: AtomicI64::new(0),
            work: Mutex::new(HashMap::new()),
        }
    }

    /// Move one slot from polling to running.
    pub async fn register(&self, info: WorkInfo) {
        self.polling.fetch_sub(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);
        self.work.lock().await.insert(info.workflow_id.clone(), info);
    }

    /// Move one slot back from running to polling.
    pub async fn finish(&self, workflow_id: &str) {
        if self.work.lock().await.remove(workflow_id).is_some() {
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.polling.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub async fn current_work(&self) -> Vec<WorkInfo> {
        self.work.lock().await.values().cloned().collect()
    }

    pub fn is_idle(&self) -> bool {
        self.running.load(Ordering::SeqCst) == 0
    }
}
