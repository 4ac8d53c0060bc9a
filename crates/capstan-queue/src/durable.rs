//! Persistence decorator for the task queue.
//!
//! Every push writes the task's durable record before it enters memory;
//! the record is deleted at dispatch time. Dependency-completion history
//! is not persisted, so reloaded tasks start with an empty `dep_status`.

use async_trait::async_trait;
use capstan_core::error::{Error, Result};
use capstan_core::ports::{Matcher, Queue, QueueInfo, TaskStore};
use capstan_core::task::{Task, TaskStatus};
use std::sync::Arc;
use tracing::{info, warn};

/// Wraps a queue with durable records, enabling recovery after a server
/// restart. A crash between dispatch and completion loses the record for
/// a task that may still be running remotely; that gap is accepted, since
/// deleting at completion instead would redeliver tasks that are still
/// executing when the server comes back.
pub struct DurableQueue {
    inner: Arc<dyn Queue>,
    store: Arc<dyn TaskStore>,
}

impl DurableQueue {
    /// Reload all persisted tasks into `inner`, then return the
    /// decorated queue.
    pub async fn open(inner: Arc<dyn Queue>, store: Arc<dyn TaskStore>) -> Result<Arc<Self>> {
        let mut tasks = store.list().await?;
        for task in &mut tasks {
            task.dep_status.clear();
        }
        if !tasks.is_empty() {
            info!(count = tasks.len(), "restoring persisted tasks");
            inner.push_at_once(tasks).await?;
        }
        Ok(Arc::new(Self { inner, store }))
    }
}

#[async_trait]
impl Queue for DurableQueue {
    async fn push(&self, task: Task) -> Result<()> {
        self.store.insert(&task).await?;
        let id = task.id.clone();
        if let Err(err) = self.inner.push(task).await {
            // the queue never accepted the task; a restart must not
            // resurrect it
            if let Err(store_err) = self.store.delete(&id).await {
                warn!(task_id = %id, error = %store_err, "failed to roll back durable record");
            }
            return Err(err);
        }
        Ok(())
    }

    async fn push_at_once(&self, tasks: Vec<Task>) -> Result<()> {
        for task in &tasks {
            self.store.insert(task).await?;
        }
        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        if let Err(err) = self.inner.push_at_once(tasks).await {
            for id in &ids {
                if let Err(store_err) = self.store.delete(id).await {
                    warn!(task_id = %id, error = %store_err, "failed to roll back durable record");
                }
            }
            return Err(err);
        }
        Ok(())
    }

    async fn poll(&self, matcher: Arc<dyn Matcher>) -> Result<Option<Task>> {
        let task = self.inner.poll(matcher).await?;
        if let Some(task) = &task {
            // dispatched; the durable record has served its purpose
            if let Err(err) = self.store.delete(&task.id).await {
                warn!(task_id = %task.id, error = %err, "failed to delete durable record");
            }
        }
        Ok(task)
    }

    async fn extend(&self, id: &str) -> Result<()> {
        self.inner.extend(id).await
    }

    async fn wait(&self, id: &str) -> Result<()> {
        self.inner.wait(id).await
    }

    async fn done(&self, id: &str, status: TaskStatus) -> Result<()> {
        self.inner.done(id, status).await
    }

    async fn error(&self, id: &str, err: Error) -> Result<()> {
        self.inner.error(id, err).await
    }

    async fn error_at_once(&self, ids: &[String], err: Error) -> Result<()> {
        self.inner.error_at_once(ids, err).await
    }

    async fn evict(&self, id: &str) -> Result<()> {
        self.inner.evict(id).await
    }

    async fn evict_at_once(&self, ids: &[String]) -> Result<()> {
        self.inner.evict_at_once(ids).await
    }

    async fn info(&self) -> QueueInfo {
        self.inner.info().await
    }

    async fn pause(&self) {
        self.inner.pause().await
    }

    async fn resume(&self) {
        self.inner.resume().await
    }
}
