//! The coordinator: server-side implementation of the peer protocol.
//!
//! Sits between polling agents and the task queue. Dispatch decisions
//! (label matching, dependency gating, leases) belong to the queue; the
//! coordinator translates protocol calls into queue operations, keeps the
//! pipeline/workflow/step records current, and fires events, forge
//! statuses, and log fan-out as side effects.

use crate::logs::LogBroker;
use crate::metrics::CoordinatorMetrics;
use capstan_core::agent::{Agent, AgentInfo};
use capstan_core::error::{Error, Result};
use capstan_core::events::{
    AgentPayload, Event, PipelinePayload, StepPayload, WorkflowPayload as WorkflowEventPayload,
};
use capstan_core::ids::{AgentId, WorkflowId};
use capstan_core::pipeline::{Pipeline, Status, Workflow};
use capstan_core::ports::{EventBus, Forge, Matcher, Queue, QueueInfo, Store};
use capstan_core::rpc::{
    HEALTHY_STATUS, LogEntry, LogKind, NextFilter, Peer, StepState, WorkflowPayload, WorkflowState,
};
use capstan_core::task::{Task, TaskStatus};
use capstan_queue::LabelMatcher;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EXIT_CODE_KILLED: i32 = 137;

/// The collaborators a [`Coordinator`] is built from.
pub struct CoordinatorContext {
    pub queue: Arc<dyn Queue>,
    pub store: Arc<dyn Store>,
    pub bus: Arc<dyn EventBus>,
    pub forge: Arc<dyn Forge>,
}

pub struct Coordinator {
    queue: Arc<dyn Queue>,
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    forge: Arc<dyn Forge>,
    logs: Arc<LogBroker>,
    metrics: Arc<CoordinatorMetrics>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(ctx: CoordinatorContext) -> Self {
        Self {
            queue: ctx.queue,
            store: ctx.store,
            bus: ctx.bus,
            forge: ctx.forge,
            logs: Arc::new(LogBroker::new()),
            metrics: CoordinatorMetrics::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn logs(&self) -> &Arc<LogBroker> {
        &self.logs
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    /// Release every long-poll in `next` with `Ok(None)` so agents can
    /// drain and stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Enqueue one compiled workflow task.
    pub async fn push_task(&self, task: Task) -> Result<()> {
        self.queue.push(task).await
    }

    /// Enqueue a pipeline's workflow tasks as one scheduling batch.
    pub async fn push_tasks(&self, tasks: Vec<Task>) -> Result<()> {
        self.queue.push_at_once(tasks).await
    }

    /// Cancel queued or running workflows. Undispatched tasks are
    /// evicted; running ones get a stored cancellation their agents see
    /// through `wait`.
    pub async fn cancel_tasks(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            if self.queue.evict(id).await.is_err() {
                self.queue.error(id, Error::Cancelled).await?;
            }
        }
        Ok(())
    }

    pub async fn queue_info(&self) -> QueueInfo {
        self.queue.info().await
    }

    pub async fn pause_queue(&self) {
        self.queue.pause().await;
    }

    pub async fn resume_queue(&self) {
        self.queue.resume().await;
    }

    /// Block until the queue holds no pending, waiting, or running tasks.
    pub async fn block_until_idle(&self) {
        loop {
            let stats = self.queue.info().await.stats;
            if stats.pending == 0 && stats.waiting_on_deps == 0 && stats.running == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn load_workflow(&self, workflow_id: &str) -> Result<Workflow> {
        let id: WorkflowId = workflow_id
            .parse()
            .map_err(|_| Error::WorkflowNotFound(workflow_id.to_string()))?;
        self.store
            .workflow(id)
            .await?
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))
    }

    async fn load_pipeline(&self, workflow: &Workflow) -> Result<Pipeline> {
        self.store
            .pipeline(workflow.pipeline_id)
            .await?
            .ok_or_else(|| Error::PipelineNotFound(workflow.pipeline_id.to_string()))
    }

    /// Persist a workflow's terminal state, skip its unfinished steps,
    /// publish completion, and fold the result into the pipeline once no
    /// sibling is still outstanding.
    async fn complete_workflow(
        &self,
        workflow_id: &str,
        status: Status,
        state: &WorkflowState,
    ) -> Result<()> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        workflow.status = status;
        if workflow.started_at.is_none() {
            workflow.started_at = state.started;
        }
        workflow.finished_at = Some(state.finished.unwrap_or_else(Utc::now));
        workflow.error = (!state.error.is_empty()).then(|| state.error.clone());
        self.store.update_workflow(&workflow).await?;
        self.metrics.record_workflow_completed();

        // Steps the agent never reported on are skipped, not left pending.
        for mut step in self.store.steps(workflow.id).await? {
            if !step.status.is_terminal() {
                step.status = Status::Skipped;
                step.finished_at = workflow.finished_at;
                self.store.update_step(&step).await?;
            }
        }

        if let Err(err) = self
            .bus
            .publish(Event::WorkflowCompleted(WorkflowEventPayload {
                pipeline_id: workflow.pipeline_id,
                workflow_id: workflow.id,
                status,
                timestamp: Utc::now(),
            }))
            .await
        {
            warn!(workflow_id = %workflow.id, error = %err, "event publish failed");
        }

        self.finalize_pipeline(&workflow).await
    }

    /// Recompute the pipeline's aggregate status once every workflow has
    /// reached a terminal state.
    async fn finalize_pipeline(&self, workflow: &Workflow) -> Result<()> {
        let mut pipeline = self.load_pipeline(workflow).await?;
        if pipeline.status.is_terminal() {
            return Ok(());
        }

        let workflows = self.store.workflows(pipeline.id).await?;
        if workflows.iter().any(|w| !w.status.is_terminal()) {
            return Ok(());
        }

        pipeline.status = aggregate_status(&workflows);
        pipeline.finished_at = Some(Utc::now());
        self.store.update_pipeline(&pipeline).await?;
        self.metrics.record_pipeline_completed();
        info!(
            pipeline_id = %pipeline.id,
            status = ?pipeline.status,
            "pipeline completed"
        );

        if let Err(err) = self.forge.send_status(&pipeline, workflow).await {
            warn!(pipeline_id = %pipeline.id, error = %err, "forge status failed");
        }
        if let Err(err) = self
            .bus
            .publish(Event::PipelineCompleted(PipelinePayload {
                pipeline_id: pipeline.id,
                number: pipeline.number,
                status: pipeline.status,
                timestamp: Utc::now(),
            }))
            .await
        {
            warn!(pipeline_id = %pipeline.id, error = %err, "event publish failed");
        }
        Ok(())
    }
}

/// Killed trumps failure, failure trumps success. Skipped workflows
/// count as passing.
fn aggregate_status(workflows: &[Workflow]) -> Status {
    if workflows.iter().any(|w| w.status == Status::Killed) {
        Status::Killed
    } else if workflows.iter().any(|w| !w.status.is_passing()) {
        Status::Failure
    } else {
        Status::Success
    }
}

#[async_trait::async_trait]
impl Peer for Coordinator {
    async fn next(&self, filter: NextFilter) -> Result<Option<WorkflowPayload>> {
        let matcher: Arc<dyn Matcher> = Arc::new(LabelMatcher::new(filter.labels));
        loop {
            let polled = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(None),
                polled = self.queue.poll(Arc::clone(&matcher)) => polled?,
            };
            let Some(task) = polled else {
                return Ok(None);
            };

            if task.should_run() {
                debug!(task_id = %task.id, "dispatching workflow");
                self.metrics.record_dispatch();
                let payload: WorkflowPayload = serde_json::from_slice(&task.data)?;
                return Ok(Some(payload));
            }

            // Dependencies disqualified this workflow. Close it out as
            // skipped and keep polling on the agent's behalf.
            info!(task_id = %task.id, "skipping workflow, dependencies unsatisfied");
            self.metrics.record_skip();
            self.queue.done(&task.id, TaskStatus::Skipped).await?;
            let state = WorkflowState {
                finished: Some(Utc::now()),
                ..Default::default()
            };
            self.complete_workflow(&task.id, Status::Skipped, &state)
                .await?;
        }
    }

    async fn wait(&self, workflow_id: &str) -> Result<()> {
        self.queue.wait(workflow_id).await
    }

    async fn init(&self, workflow_id: &str, state: WorkflowState) -> Result<()> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        workflow.status = Status::Running;
        workflow.started_at = Some(state.started.unwrap_or_else(Utc::now));
        self.store.update_workflow(&workflow).await?;
        info!(workflow_id = %workflow.id, name = %workflow.name, "workflow started");

        let mut pipeline = self.load_pipeline(&workflow).await?;
        if pipeline.status == Status::Pending {
            pipeline.status = Status::Running;
            pipeline.started_at = workflow.started_at;
            self.store.update_pipeline(&pipeline).await?;

            if let Err(err) = self.forge.send_status(&pipeline, &workflow).await {
                warn!(pipeline_id = %pipeline.id, error = %err, "forge status failed");
            }
            if let Err(err) = self
                .bus
                .publish(Event::PipelineStarted(PipelinePayload {
                    pipeline_id: pipeline.id,
                    number: pipeline.number,
                    status: pipeline.status,
                    timestamp: Utc::now(),
                }))
                .await
            {
                warn!(pipeline_id = %pipeline.id, error = %err, "event publish failed");
            }
        }
        Ok(())
    }

    async fn update(&self, workflow_id: &str, state: StepState) -> Result<()> {
        let mut step = self
            .store
            .step_by_uuid(&state.step_uuid)
            .await?
            .ok_or_else(|| Error::Internal(format!("unknown step: {}", state.step_uuid)))?;

        if state.exited {
            step.status = if state.exit_code == 0 {
                Status::Success
            } else if state.exit_code == EXIT_CODE_KILLED {
                Status::Killed
            } else {
                Status::Failure
            };
            step.exit_code = Some(state.exit_code);
            step.finished_at = Some(state.finished.unwrap_or_else(Utc::now));
            step.error = (!state.error.is_empty()).then(|| state.error.clone());
        } else {
            step.status = Status::Running;
            step.started_at = Some(state.started.unwrap_or_else(Utc::now));
        }
        self.store.update_step(&step).await?;
        debug!(
            workflow_id,
            step_uuid = %state.step_uuid,
            status = ?step.status,
            "step updated"
        );

        if let Err(err) = self
            .bus
            .publish(Event::StepUpdated(StepPayload {
                workflow_id: step.workflow_id,
                step_uuid: state.step_uuid.clone(),
                status: step.status,
                exit_code: step.exit_code,
                timestamp: Utc::now(),
            }))
            .await
        {
            warn!(step_uuid = %state.step_uuid, error = %err, "event publish failed");
        }

        if state.exited {
            self.logs.close(&state.step_uuid).await;
        }
        Ok(())
    }

    async fn done(&self, workflow_id: &str, state: WorkflowState) -> Result<()> {
        if state.failed() {
            self.queue
                .error(
                    workflow_id,
                    Error::StepFailure {
                        exit_code: state.exit_code,
                        message: state.error.clone(),
                    },
                )
                .await?;
        } else {
            self.queue.done(workflow_id, TaskStatus::Success).await?;
        }

        let status = if state.exit_code == EXIT_CODE_KILLED {
            Status::Killed
        } else if state.failed() {
            Status::Failure
        } else {
            Status::Success
        };
        info!(workflow_id, status = ?status, exit_code = state.exit_code, "workflow done");
        self.complete_workflow(workflow_id, status, &state).await
    }

    async fn extend(&self, workflow_id: &str) -> Result<()> {
        self.queue.extend(workflow_id).await
    }

    async fn log(&self, entry: LogEntry) -> Result<()> {
        self.metrics.record_log_line();
        self.store.append_log(&entry).await?;
        self.logs.publish(&entry).await;
        if entry.kind == LogKind::ExitCode {
            self.logs.close(&entry.step_uuid).await;
        }
        Ok(())
    }

    async fn register_agent(&self, info: AgentInfo) -> Result<AgentId> {
        let agent = Agent::from_info(&info);
        let id = self.store.create_agent(&agent).await?;
        self.metrics.record_agent_registered();
        info!(
            agent_id = %id,
            platform = %info.platform,
            backend = %info.backend,
            capacity = info.capacity,
            "agent registered"
        );

        if let Err(err) = self
            .bus
            .publish(Event::AgentRegistered(AgentPayload {
                agent_id: id,
                platform: info.platform,
                backend: info.backend,
                timestamp: Utc::now(),
            }))
            .await
        {
            warn!(agent_id = %id, error = %err, "event publish failed");
        }
        Ok(id)
    }

    async fn report_health(&self, status: &str) -> Result<()> {
        if status != HEALTHY_STATUS {
            return Err(Error::UnhealthyAgent(status.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::pipeline::Step;
    use capstan_core::ports::{PipelineStore, StepStore, WorkflowStore};
    use capstan_queue::Fifo;
    use std::collections::HashMap;
    use tokio::sync::Mutex;
    use tokio::time::timeout;

    #[derive(Default)]
    struct MemStore {
        pipelines: Mutex<HashMap<String, Pipeline>>,
        workflows: Mutex<HashMap<String, Workflow>>,
        steps: Mutex<HashMap<String, Step>>,
        logs: Mutex<Vec<LogEntry>>,
        agents: Mutex<Vec<Agent>>,
    }

    #[async_trait::async_trait]
    impl capstan_core::ports::PipelineStore for MemStore {
        async fn pipeline(
            &self,
            id: capstan_core::ids::PipelineId,
        ) -> Result<Option<Pipeline>> {
            Ok(self.pipelines.lock().await.get(&id.to_string()).cloned())
        }

        async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
            self.pipelines
                .lock()
                .await
                .insert(pipeline.id.to_string(), pipeline.clone());
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl capstan_core::ports::WorkflowStore for MemStore {
        async fn workflow(&self, id: WorkflowId) -> Result<Option<Workflow>> {
            Ok(self.workflows.lock().await.get(&id.to_string()).cloned())
        }

        async fn workflows(
            &self,
            pipeline_id: capstan_core::ids::PipelineId,
        ) -> Result<Vec<Workflow>> {
            Ok(self
                .workflows
                .lock()
                .await
                .values()
                .filter(|w| w.pipeline_id == pipeline_id)
                .cloned()
                .collect())
        }

        async fn update_workflow(&self, workflow: &Workflow) -> Result<()> {
            self.workflows
                .lock()
                .await
                .insert(workflow.id.to_string(), workflow.clone());
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl capstan_core::ports::StepStore for MemStore {
        async fn steps(&self, workflow_id: WorkflowId) -> Result<Vec<Step>> {
            Ok(self
                .steps
                .lock()
                .await
                .values()
                .filter(|s| s.workflow_id == workflow_id)
                .cloned()
                .collect())
        }

        async fn step_by_uuid(&self, uuid: &str) -> Result<Option<Step>> {
            Ok(self.steps.lock().await.get(uuid).cloned())
        }

        async fn update_step(&self, step: &Step) -> Result<()> {
            self.steps
                .lock()
                .await
                .insert(step.id.to_string(), step.clone());
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl capstan_core::ports::LogStore for MemStore {
        async fn append_log(&self, entry: &LogEntry) -> Result<()> {
            self.logs.lock().await.push(entry.clone());
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl capstan_core::ports::AgentStore for MemStore {
        async fn create_agent(&self, agent: &Agent) -> Result<AgentId> {
            self.agents.lock().await.push(agent.clone());
            Ok(agent.id)
        }
    }

    #[derive(Default)]
    struct RecordingForge {
        statuses: Mutex<Vec<(String, Status)>>,
    }

    #[async_trait::async_trait]
    impl Forge for RecordingForge {
        async fn send_status(&self, pipeline: &Pipeline, _workflow: &Workflow) -> Result<()> {
            self.statuses
                .lock()
                .await
                .push((pipeline.id.to_string(), pipeline.status));
            Ok(())
        }
    }

    struct Harness {
        coordinator: Coordinator,
        store: Arc<MemStore>,
        forge: Arc<RecordingForge>,
        queue: Arc<Fifo>,
    }

    fn harness() -> Harness {
        let queue = Fifo::new();
        let store = Arc::new(MemStore::default());
        let forge = Arc::new(RecordingForge::default());
        let coordinator = Coordinator::new(CoordinatorContext {
            queue: queue.clone(),
            store: store.clone(),
            bus: Arc::new(crate::bus::MemoryBus::new()),
            forge: forge.clone(),
        });
        Harness {
            coordinator,
            store,
            forge,
            queue,
        }
    }

    /// Insert pipeline and workflow records, push the queue task, and
    /// return the workflow id string the agent will see.
    async fn seed_workflow(h: &Harness, pipeline: &Pipeline, name: &str, deps: &[String]) -> String {
        let workflow = Workflow::new(pipeline.id, name);
        let id = workflow.id.to_string();
        h.store.update_pipeline(pipeline).await.unwrap();
        h.store.update_workflow(&workflow).await.unwrap();

        let payload = WorkflowPayload {
            id: id.clone(),
            timeout: 0,
            config: serde_json::json!({"image": "rust:1.83"}),
        };
        let mut task = Task::new(id.clone());
        task.data = serde_json::to_vec(&payload).unwrap();
        task.dependencies = deps.to_vec();
        h.queue.push(task).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_next_dispatches_runnable_workflow() {
        let h = harness();
        let pipeline = Pipeline::new(1);
        let id = seed_workflow(&h, &pipeline, "build", &[]).await;

        let payload = timeout(Duration::from_secs(1), h.coordinator.next(NextFilter::default()))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(payload.id, id);
        assert_eq!(h.coordinator.metrics().snapshot().workflows_dispatched, 1);
    }

    #[tokio::test]
    async fn test_next_auto_skips_disqualified_workflow() {
        let h = harness();
        let pipeline = Pipeline::new(2);
        let build = seed_workflow(&h, &pipeline, "build", &[]).await;
        let deploy = seed_workflow(&h, &pipeline, "deploy", std::slice::from_ref(&build)).await;

        // Fail the build; deploy defaults to run-on-success.
        let got = timeout(Duration::from_secs(1), h.coordinator.next(NextFilter::default()))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.id, build);
        h.coordinator
            .done(
                &build,
                WorkflowState {
                    exit_code: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // The poll must swallow the skipped deploy rather than hand it out.
        let next = timeout(
            Duration::from_millis(300),
            h.coordinator.next(NextFilter::default()),
        )
        .await;
        assert!(next.is_err(), "skipped workflow must not be dispatched");

        let deploy_record = h
            .store
            .workflow(deploy.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deploy_record.status, Status::Skipped);
        assert_eq!(h.coordinator.metrics().snapshot().workflows_skipped, 1);
    }

    #[tokio::test]
    async fn test_init_marks_pipeline_running() {
        let h = harness();
        let pipeline = Pipeline::new(3);
        let id = seed_workflow(&h, &pipeline, "build", &[]).await;

        h.coordinator
            .init(
                &id,
                WorkflowState {
                    started: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let pipeline = h.store.pipeline(pipeline.id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, Status::Running);
        assert!(pipeline.started_at.is_some());
        let workflow = h.store.workflow(id.parse().unwrap()).await.unwrap().unwrap();
        assert_eq!(workflow.status, Status::Running);
    }

    #[tokio::test]
    async fn test_done_failure_finalizes_pipeline_and_notifies_forge() {
        let h = harness();
        let pipeline = Pipeline::new(4);
        let id = seed_workflow(&h, &pipeline, "build", &[]).await;

        // Leave one step unfinished so the cascade has work to do.
        let workflow_id: WorkflowId = id.parse().unwrap();
        let mut step = Step::new(workflow_id, "compile");
        step.status = Status::Running;
        h.store.update_step(&step).await.unwrap();

        h.coordinator
            .done(
                &id,
                WorkflowState {
                    finished: Some(Utc::now()),
                    exit_code: 2,
                    error: "compile failed".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let workflow = h.store.workflow(workflow_id).await.unwrap().unwrap();
        assert_eq!(workflow.status, Status::Failure);
        assert_eq!(workflow.error.as_deref(), Some("compile failed"));

        let step = h
            .store
            .step_by_uuid(&step.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step.status, Status::Skipped);

        let pipeline = h.store.pipeline(pipeline.id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, Status::Failure);
        assert!(pipeline.finished_at.is_some());

        let statuses = h.forge.statuses.lock().await;
        assert_eq!(statuses.as_slice(), &[(pipeline.id.to_string(), Status::Failure)]);
    }

    #[tokio::test]
    async fn test_done_kill_exit_code_marks_killed() {
        let h = harness();
        let pipeline = Pipeline::new(5);
        let id = seed_workflow(&h, &pipeline, "build", &[]).await;

        h.coordinator
            .done(
                &id,
                WorkflowState {
                    exit_code: EXIT_CODE_KILLED,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let workflow = h.store.workflow(id.parse().unwrap()).await.unwrap().unwrap();
        assert_eq!(workflow.status, Status::Killed);
        let pipeline = h.store.pipeline(pipeline.id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, Status::Killed);
    }

    #[tokio::test]
    async fn test_update_records_step_transitions() {
        let h = harness();
        let pipeline = Pipeline::new(6);
        let id = seed_workflow(&h, &pipeline, "build", &[]).await;
        let step = Step::new(id.parse().unwrap(), "compile");
        h.store.update_step(&step).await.unwrap();
        let uuid = step.id.to_string();

        h.coordinator
            .update(
                &id,
                StepState {
                    step_uuid: uuid.clone(),
                    started: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let running = h.store.step_by_uuid(&uuid).await.unwrap().unwrap();
        assert_eq!(running.status, Status::Running);

        h.coordinator
            .update(
                &id,
                StepState {
                    step_uuid: uuid.clone(),
                    finished: Some(Utc::now()),
                    exited: true,
                    exit_code: 0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let finished = h.store.step_by_uuid(&uuid).await.unwrap().unwrap();
        assert_eq!(finished.status, Status::Success);
        assert_eq!(finished.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_log_appends_and_streams() {
        let h = harness();
        let mut rx = h.coordinator.logs().subscribe("step-9").await;

        h.coordinator
            .log(LogEntry {
                step_uuid: "step-9".to_string(),
                time: Utc::now(),
                kind: LogKind::Stdout,
                line: 0,
                data: "compiling".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().data, "compiling");
        assert_eq!(h.store.logs.lock().await.len(), 1);
        assert_eq!(h.coordinator.metrics().snapshot().log_lines, 1);
    }

    #[tokio::test]
    async fn test_register_agent_persists_and_counts() {
        let h = harness();
        let id = h
            .coordinator
            .register_agent(AgentInfo {
                platform: "linux/amd64".to_string(),
                backend: "docker".to_string(),
                version: "0.1.0".to_string(),
                capacity: 2,
            })
            .await
            .unwrap();

        let agents = h.store.agents.lock().await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, id);
        assert_eq!(h.coordinator.metrics().snapshot().agents_registered, 1);
    }

    #[tokio::test]
    async fn test_report_health_rejects_unknown_status() {
        let h = harness();
        assert!(h.coordinator.report_health(HEALTHY_STATUS).await.is_ok());
        assert!(matches!(
            h.coordinator.report_health("degraded").await,
            Err(Error::UnhealthyAgent(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_releases_pollers() {
        let h = harness();
        let coordinator = Arc::new(h.coordinator);
        let poller = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.next(NextFilter::default()).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.shutdown();

        let result = timeout(Duration::from_secs(1), poller)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}
