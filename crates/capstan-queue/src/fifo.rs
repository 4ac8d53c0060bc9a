//! In-memory dependency-aware task queue.
//!
//! All mutable state lives behind a single mutex; blocking waits happen
//! on per-call channels outside that lock, so delivery from inside a
//! scheduling pass cannot deadlock against a blocked caller. A dedicated
//! scheduler loop coalesces "state changed" wakeups and periodically
//! reclaims expired leases.

use async_trait::async_trait;
use capstan_core::error::{Error, Result};
use capstan_core::ports::{Matcher, Queue, QueueInfo, QueueStats};
use capstan_core::task::{Task, TaskStatus};
use futures::FutureExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, Notify, oneshot, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tracing::{debug, error, warn};

/// Lease window granted at dispatch and on every `extend`.
pub const LEASE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Completion state observed by `wait` callers.
#[derive(Clone)]
enum Outcome {
    Pending,
    Finished(Option<Error>),
}

/// A task assigned to exactly one worker, with its lease deadline.
struct RunningEntry {
    task: Task,
    deadline: Instant,
    done: watch::Sender<Outcome>,
}

/// One agent's outstanding pull request: a match predicate plus a
/// single-slot delivery target. Lives only until delivery or until the
/// poller drops its end.
struct Worker {
    matcher: Arc<dyn Matcher>,
    slot: oneshot::Sender<Task>,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Task>,
    waiting_on_deps: VecDeque<Task>,
    running: HashMap<String, RunningEntry>,
    workers: Vec<Worker>,
    paused: bool,
    completed: u64,
}

/// The in-memory task queue. State is local to one server process; see
/// the design notes on the single-instance limitation.
pub struct Fifo {
    state: Mutex<State>,
    kick: Arc<Notify>,
    lease: Duration,
}

impl Fifo {
    pub fn new() -> Arc<Self> {
        Self::with_lease(LEASE_TIMEOUT)
    }

    /// Create a queue with a custom lease window. The scheduler loop
    /// ticks at half the lease interval, bounded to [10ms, 1s].
    pub fn with_lease(lease: Duration) -> Arc<Self> {
        let queue = Arc::new(Self {
            state: Mutex::new(State::default()),
            kick: Arc::new(Notify::new()),
            lease,
        });

        let tick = (lease / 2).clamp(Duration::from_millis(10), Duration::from_secs(1));
        tokio::spawn(scheduler_loop(Arc::downgrade(&queue), Arc::clone(&queue.kick), tick));

        queue
    }

    /// One scheduling pass: reclaim expired leases, re-derive dependency
    /// eligibility from scratch, then hand eligible tasks to matching
    /// workers.
    async fn process(&self) {
        let mut state = self.state.lock().await;
        if state.paused {
            return;
        }
        self.reclaim_expired(&mut state);
        partition_deps(&mut state);
        self.assign(&mut state);
    }

    fn reclaim_expired(&self, state: &mut State) {
        let now = Instant::now();
        let expired: Vec<String> = state
            .running
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(entry) = state.running.remove(&id) {
                warn!(task_id = %id, "lease expired, requeueing task");
                // the agent may still be executing; wait callers observe
                // an ambiguous outcome, never a silent success
                entry
                    .done
                    .send_replace(Outcome::Finished(Some(Error::LeaseExpired)));
                state.pending.push_front(entry.task);
            }
        }
    }

    fn assign(&self, state: &mut State) {
        state.workers.retain(|w| !w.slot.is_closed());

        let mut i = 0;
        while i < state.pending.len() {
            let best = {
                let task = &state.pending[i];
                let mut best: Option<(usize, u32)> = None;
                for (wi, worker) in state.workers.iter().enumerate() {
                    if worker.slot.is_closed() {
                        continue;
                    }
                    if let Some(score) = worker.matcher.matches(task)
                        && best.map_or(true, |(_, s)| score > s)
                    {
                        best = Some((wi, score));
                    }
                }
                best
            };

            let Some((wi, _)) = best else {
                i += 1;
                continue;
            };
            let Some(task) = state.pending.remove(i) else {
                break;
            };
            let worker = state.workers.swap_remove(wi);

            match worker.slot.send(task.clone()) {
                Ok(()) => {
                    debug!(task_id = %task.id, "task dispatched");
                    let (done, _) = watch::channel(Outcome::Pending);
                    state.running.insert(
                        task.id.clone(),
                        RunningEntry {
                            deadline: Instant::now() + self.lease,
                            task,
                            done,
                        },
                    );
                }
                Err(task) => {
                    // poller went away between matching and handoff;
                    // rescan the same slot against the remaining workers
                    state.pending.insert(i, task);
                }
            }
        }
    }

    async fn finish(&self, ids: &[String], status: TaskStatus, err: Option<Error>) {
        {
            let mut state = self.state.lock().await;
            for id in ids {
                let completed = if let Some(entry) = state.running.remove(id.as_str()) {
                    entry.done.send_replace(Outcome::Finished(err.clone()));
                    true
                } else if let Some(pos) = state.pending.iter().position(|t| t.id == *id) {
                    state.pending.remove(pos);
                    true
                } else if let Some(pos) = state.waiting_on_deps.iter().position(|t| t.id == *id) {
                    state.waiting_on_deps.remove(pos);
                    true
                } else {
                    // unknown or already completed; completion must stay
                    // idempotent under lease-based redelivery
                    false
                };

                if !completed {
                    continue;
                }
                state.completed += 1;
                debug!(task_id = %id, status = ?status, "task finished");

                for task in state.pending.iter_mut() {
                    if task.depends_on(id) {
                        task.dep_status.insert(id.clone(), status);
                    }
                }
                for task in state.waiting_on_deps.iter_mut() {
                    if task.depends_on(id) {
                        task.dep_status.insert(id.clone(), status);
                    }
                }
                for entry in state.running.values_mut() {
                    if entry.task.depends_on(id) {
                        entry.task.dep_status.insert(id.clone(), status);
                    }
                }
            }
        }
        self.kick.notify_one();
    }
}

/// Move every queued task into pending or waiting-on-deps based on
/// whether any of its dependencies is still present in the queue.
/// Recomputed from scratch on each pass, never cached.
fn partition_deps(state: &mut State) {
    let tasks: Vec<Task> = state
        .waiting_on_deps
        .drain(..)
        .chain(state.pending.drain(..))
        .collect();

    let active: HashSet<String> = tasks
        .iter()
        .map(|t| t.id.clone())
        .chain(state.running.keys().cloned())
        .collect();

    for task in tasks {
        if task.dependencies.iter().any(|d| active.contains(d)) {
            state.waiting_on_deps.push_back(task);
        } else {
            state.pending.push_back(task);
        }
    }
}

async fn scheduler_loop(queue: Weak<Fifo>, kick: Arc<Notify>, tick: Duration) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = kick.notified() => {}
            _ = ticker.tick() => {}
        }

        let Some(queue) = queue.upgrade() else {
            break;
        };

        // one bad task must not wedge dispatch for everyone else
        if let Err(panic) = AssertUnwindSafe(queue.process()).catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(message = %message, "scheduling pass panicked; dispatch continues");
        }
    }
}

#[async_trait]
impl Queue for Fifo {
    async fn push(&self, task: Task) -> Result<()> {
        self.state.lock().await.pending.push_back(task);
        self.kick.notify_one();
        Ok(())
    }

    async fn push_at_once(&self, tasks: Vec<Task>) -> Result<()> {
        self.state.lock().await.pending.extend(tasks);
        self.kick.notify_one();
        Ok(())
    }

    async fn poll(&self, matcher: Arc<dyn Matcher>) -> Result<Option<Task>> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().await.workers.push(Worker { matcher, slot: tx });
        self.kick.notify_one();

        // a dropped sender means the queue went away before handing off;
        // a cancelled caller simply drops this future and the worker is
        // swept on the next pass
        Ok(rx.await.ok())
    }

    async fn extend(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.running.get_mut(id) {
            Some(entry) => {
                entry.deadline = Instant::now() + self.lease;
                Ok(())
            }
            None => Err(Error::TaskNotFound(id.to_string())),
        }
    }

    async fn wait(&self, id: &str) -> Result<()> {
        let mut rx = {
            let state = self.state.lock().await;
            match state.running.get(id) {
                Some(entry) => entry.done.subscribe(),
                None => return Err(Error::TaskNotFound(id.to_string())),
            }
        };

        loop {
            if let Outcome::Finished(err) = rx.borrow_and_update().clone() {
                return match err {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
            }
            if rx.changed().await.is_err() {
                return Ok(());
            }
        }
    }

    async fn done(&self, id: &str, status: TaskStatus) -> Result<()> {
        self.finish(&[id.to_string()], status, None).await;
        Ok(())
    }

    async fn error(&self, id: &str, err: Error) -> Result<()> {
        self.error_at_once(&[id.to_string()], err).await
    }

    async fn error_at_once(&self, ids: &[String], err: Error) -> Result<()> {
        self.finish(ids, TaskStatus::Failure, Some(err)).await;
        Ok(())
    }

    async fn evict(&self, id: &str) -> Result<()> {
        self.evict_at_once(std::slice::from_ref(&id.to_string())).await
    }

    async fn evict_at_once(&self, ids: &[String]) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            for id in ids {
                let queued = state.pending.iter().any(|t| t.id == *id)
                    || state.waiting_on_deps.iter().any(|t| t.id == *id);
                if !queued {
                    return Err(Error::TaskNotFound(id.clone()));
                }
            }
            for id in ids {
                state.pending.retain(|t| t.id != *id);
                state.waiting_on_deps.retain(|t| t.id != *id);
            }
        }
        self.kick.notify_one();
        Ok(())
    }

    async fn info(&self) -> QueueInfo {
        let state = self.state.lock().await;
        QueueInfo {
            pending: state.pending.iter().cloned().collect(),
            waiting_on_deps: state.waiting_on_deps.iter().cloned().collect(),
            running: state.running.values().map(|e| e.task.clone()).collect(),
            stats: QueueStats {
                workers: state.workers.iter().filter(|w| !w.slot.is_closed()).count(),
                pending: state.pending.len(),
                waiting_on_deps: state.waiting_on_deps.len(),
                running: state.running.len(),
                completed: state.completed,
            },
            paused: state.paused,
        }
    }

    async fn pause(&self) {
        self.state.lock().await.paused = true;
    }

    async fn resume(&self) {
        self.state.lock().await.paused = false;
        self.kick.notify_one();
    }
}
