use crate::agent::AgentRegistry;
use crate::classifier::Classifier;
use crate::config::OrchestratorConfig;
use crate::executor::{AgentPool, WorkerContext};
use crate::hub::{NotificationHub, Subscription};
use crate::ledger::TaskLedger;
use crate::monitor::{AgentMonitor, SystemMetrics};
use crate::scheduler::PriorityScheduler;
use agentos_core::{
    AgentosError, AgentosResult, Capability, Metadata, Priority, Task, TaskError, TaskErrorKind,
    TaskEvent, TaskId, TaskStatus, TaskView,
};
use agentos_security::{RateLimiter, Sanitizer};
use agentos_store::TaskStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A task as handed to [`Orchestrator::submit`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Raw task text, sanitized on submission.
    pub text: String,
    /// Scheduling tier; medium when omitted.
    #[serde(default)]
    pub priority: Priority,
    /// Scalar key/value pairs stored with the task.
    #[serde(default)]
    pub metadata: Metadata,
    /// Identity used for rate limiting and listing.
    pub submitter: String,
}

impl SubmitRequest {
    /// A medium-priority request without metadata.
    pub fn new(text: impl Into<String>, submitter: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            submitter: submitter.into(),
            ..Self::default()
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Id of the new task.
    pub task_id: TaskId,
    /// Always `queued` on acceptance.
    pub status: TaskStatus,
    /// Capability the classifier routed it to.
    pub capability: Capability,
}

/// The task orchestration engine.
///
/// Validates and admits submissions, routes them to a capability, queues them
/// by priority and runs them on per-capability worker pools. Every status
/// change is published to the [`NotificationHub`] and written to the store.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    sanitizer: Sanitizer,
    admission: Arc<RateLimiter>,
    classifier: Classifier,
    scheduler: Arc<PriorityScheduler>,
    ledger: Arc<TaskLedger>,
    hub: Arc<NotificationHub>,
    monitor: Arc<AgentMonitor>,
    agents: AgentRegistry,
    shutdown: CancellationToken,
    started: AtomicBool,
    pools: tokio::sync::Mutex<Vec<AgentPool>>,
    maintenance: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build an orchestrator. Workers do not run until [`start`](Self::start).
    pub fn new(
        config: OrchestratorConfig,
        agents: AgentRegistry,
        store: Arc<dyn TaskStore>,
    ) -> AgentosResult<Self> {
        config.validate()?;
        agents.ensure_complete()?;

        let hub = Arc::new(NotificationHub::new(config.hub.clone()));
        let ledger = Arc::new(TaskLedger::new(store, hub.clone(), config.store_timeout()));
        Ok(Self {
            sanitizer: Sanitizer::new(config.max_input_length),
            admission: Arc::new(RateLimiter::new(config.admission)),
            classifier: Classifier::new(),
            scheduler: Arc::new(PriorityScheduler::new(config.aging_threshold())),
            monitor: Arc::new(AgentMonitor::new(&config.capabilities)),
            ledger,
            hub,
            agents,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            pools: tokio::sync::Mutex::new(Vec::new()),
            maintenance: tokio::sync::Mutex::new(None),
            config: Arc::new(config),
        })
    }

    /// Pick up the tasks a previous process left unfinished in the store and
    /// spawn the worker pools and the housekeeping loop.
    ///
    /// Recovered `queued` tasks are enqueued again at their priority, oldest
    /// first. Tasks caught `assigned` or `running` fail with
    /// [`TaskErrorKind::Internal`]: their attempt died with the old process.
    pub async fn start(&self) -> AgentosResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(AgentosError::Orchestrator(
                "orchestrator has been shut down".into(),
            ));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AgentosError::Orchestrator("orchestrator already started".into()));
        }

        self.recover().await;

        let mut pools = self.pools.lock().await;
        for capability in Capability::ALL {
            let agent = self.agents.get(capability).ok_or_else(|| {
                AgentosError::Config(format!("no agent registered for {capability}"))
            })?;
            let ctx = Arc::new(WorkerContext {
                capability,
                agent,
                scheduler: self.scheduler.clone(),
                ledger: self.ledger.clone(),
                monitor: self.monitor.clone(),
                config: self.config.clone(),
                shutdown: self.shutdown.clone(),
            });
            let size = self.config.capabilities.get(capability).concurrency;
            pools.push(AgentPool::spawn(ctx, size));
        }

        *self.maintenance.lock().await = Some(self.spawn_maintenance());
        info!(
            max_retries = self.config.max_retries,
            aging_threshold_ms = self.config.aging_threshold_ms,
            "Orchestrator started"
        );
        Ok(())
    }

    async fn recover(&self) {
        let unfinished = match self.ledger.store().list_unfinished().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Could not read unfinished tasks from the store");
                return;
            }
        };
        let (mut requeued, mut interrupted) = (0usize, 0usize);
        for task in unfinished {
            let (id, status, capability, priority) =
                (task.id, task.status, task.capability, task.priority);
            if !self.ledger.restore(task, self.shutdown.child_token()) {
                continue;
            }
            match status {
                TaskStatus::Queued => {
                    self.scheduler.enqueue(id, capability, priority);
                    requeued += 1;
                }
                _ => {
                    let error = TaskError::new(
                        TaskErrorKind::Internal,
                        format!("interrupted while {status} by a restart"),
                    );
                    if let Err(e) = self.ledger.apply(id, |t| t.fail(error)).await {
                        warn!(task_id = %id, error = %e, "Could not fail interrupted task");
                    }
                    interrupted += 1;
                }
            }
        }
        if requeued + interrupted > 0 {
            info!(requeued, interrupted, "Recovered unfinished tasks from the store");
        }
    }

    fn spawn_maintenance(&self) -> JoinHandle<()> {
        let admission = self.admission.clone();
        let hub = self.hub.clone();
        let ledger = self.ledger.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.maintenance_interval());
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.cancelled() => break,
                }
                let buckets = admission.cleanup(config.bucket_idle());
                let topics = hub.sweep();
                let evicted = ledger.evict_terminal(config.ledger_retention());
                if buckets + topics + evicted > 0 {
                    debug!(buckets, topics, evicted, "Maintenance sweep");
                }
            }
        })
    }

    /// Stop accepting work, cancel in-flight attempts and wait for workers.
    /// Tasks still queued stay `queued`.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Orchestrator shutting down");
        self.shutdown.cancel();
        self.scheduler.wake_all();

        let pools = std::mem::take(&mut *self.pools.lock().await);
        for pool in pools {
            pool.join().await;
        }
        if let Some(handle) = self.maintenance.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance loop exited abnormally");
            }
        }
        info!("Orchestrator stopped");
    }

    /// Validate, admit, classify and enqueue a task.
    ///
    /// Fails with [`AgentosError::Validation`] or [`AgentosError::RateLimited`];
    /// in both cases no task is created.
    pub async fn submit(&self, request: SubmitRequest) -> AgentosResult<SubmitReceipt> {
        if self.shutdown.is_cancelled() {
            return Err(AgentosError::Orchestrator(
                "orchestrator is shutting down".into(),
            ));
        }
        let text = self.sanitizer.validate_text(&request.text)?;
        self.sanitizer.validate_metadata(&request.metadata)?;
        if request.submitter.trim().is_empty() {
            return Err(AgentosError::Validation("submitter id must not be empty".into()));
        }

        if self.scheduler.len() >= self.config.queue_soft_cap {
            warn!(queued = self.scheduler.len(), "Queue saturated, refusing submission");
            return Err(AgentosError::RateLimited("queue saturated".into()));
        }
        if !self.admission.admit(&request.submitter) {
            return Err(AgentosError::RateLimited(format!(
                "submitter '{}' exceeded the task rate",
                request.submitter
            )));
        }

        let classification = self
            .classifier
            .classify_detailed(&text, &request.metadata);
        if classification.matched.is_empty() && !classification.hinted {
            debug!("No keyword matched, routing to general");
        }
        let capability = classification.capability;

        let task = Task::new(
            text,
            request.priority,
            request.metadata,
            capability,
            request.submitter,
        );
        let receipt = SubmitReceipt {
            task_id: task.id,
            status: task.status,
            capability,
        };
        let priority = task.priority;
        let cancel = self.shutdown.child_token();
        self.ledger.insert(task, cancel).await;
        self.scheduler.enqueue(receipt.task_id, capability, priority);

        info!(
            task_id = %receipt.task_id,
            capability = %capability,
            priority = %priority,
            matched = ?classification.matched,
            "Task submitted"
        );
        Ok(receipt)
    }

    async fn lookup(&self, id: TaskId) -> AgentosResult<Task> {
        if let Some(task) = self.ledger.get(id) {
            return Ok(task);
        }
        self.ledger
            .store()
            .get(id)
            .await?
            .ok_or(AgentosError::NotFound(id))
    }

    /// Current state of a task: in-memory first, then the store.
    pub async fn get_status(&self, id: TaskId) -> AgentosResult<TaskView> {
        self.lookup(id).await.map(|t| TaskView::from(&t))
    }

    /// Request cancellation.
    ///
    /// A queued task is pulled from the scheduler and failed at once. An
    /// assigned or running task has its token cancelled; its worker fails it
    /// at the next safe point. Returns `false` for terminal tasks.
    pub async fn cancel(&self, id: TaskId) -> AgentosResult<bool> {
        let Some(task) = self.ledger.get(id) else {
            return self.cancel_unloaded(id).await;
        };
        let Some(token) = self.ledger.cancel_token(id) else {
            return Ok(false);
        };

        match task.status {
            TaskStatus::Completed | TaskStatus::Failed => Ok(false),
            TaskStatus::Queued => {
                token.cancel();
                if self.scheduler.remove(id, task.capability).is_some() {
                    match self
                        .ledger
                        .apply(id, |t| t.fail(TaskError::cancelled()))
                        .await
                    {
                        Ok(_) => {
                            self.monitor
                                .record_failed(task.capability, TaskErrorKind::Cancelled)
                                .await;
                            info!(task_id = %id, "Queued task cancelled");
                        }
                        Err(e) => debug!(task_id = %id, error = %e, "Cancel raced a transition"),
                    }
                }
                // Otherwise a worker holds it (or is about to re-enqueue it)
                // and fails it on seeing the token.
                Ok(true)
            }
            TaskStatus::Assigned | TaskStatus::Running => {
                token.cancel();
                info!(task_id = %id, status = %task.status, "Cancellation requested");
                Ok(true)
            }
        }
    }

    /// Cancel a task only the store knows about: evicted (so terminal) or left
    /// behind by a previous process and not yet recovered.
    async fn cancel_unloaded(&self, id: TaskId) -> AgentosResult<bool> {
        let task = self.lookup(id).await?;
        if task.is_terminal() {
            return Ok(false);
        }
        let capability = task.capability;
        self.ledger.restore(task, self.shutdown.child_token());
        match self
            .ledger
            .apply(id, |t| t.fail(TaskError::cancelled()))
            .await
        {
            Ok(_) => {
                self.monitor
                    .record_failed(capability, TaskErrorKind::Cancelled)
                    .await;
                info!(task_id = %id, "Stored task cancelled");
                Ok(true)
            }
            Err(AgentosError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// A submitter's tasks, newest first, paginated.
    ///
    /// In-memory state overrides store records; a failing store degrades to
    /// the in-memory view.
    pub async fn list_tasks(
        &self,
        submitter: &str,
        skip: usize,
        limit: usize,
    ) -> AgentosResult<Vec<TaskView>> {
        let stored = self.ledger.store().list_by_submitter(submitter).await;
        let mut merged: HashMap<TaskId, Task> = match stored {
            Ok(stored) => stored.into_iter().map(|t| (t.id, t)).collect(),
            Err(e) => {
                warn!(
                    submitter = %submitter,
                    error = %e,
                    "Store listing failed, using in-memory tasks only"
                );
                HashMap::new()
            }
        };
        for task in self.ledger.by_submitter(submitter) {
            merged.insert(task.id, task);
        }

        let mut tasks: Vec<Task> = merged.into_values().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks
            .iter()
            .skip(skip)
            .take(limit)
            .map(TaskView::from)
            .collect())
    }

    /// Subscribe to a task's status events. The first deliveries replay its
    /// recent history (or, if the hub no longer holds any, its current state).
    pub async fn subscribe(&self, id: TaskId) -> AgentosResult<Subscription> {
        let task = self.lookup(id).await?;
        Ok(self
            .hub
            .subscribe_seeded(id, Some(TaskEvent::from_task(&task))))
    }

    /// Detach a subscription.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.hub.unsubscribe(subscription);
    }

    /// Confirm receipt of a terminal event; `false` while the task is still live.
    pub fn acknowledge(&self, subscription: &Subscription) -> bool {
        self.hub.acknowledge(subscription)
    }

    /// Queue, pool and processing statistics.
    pub async fn metrics(&self) -> SystemMetrics {
        SystemMetrics {
            processing: self.monitor.processing().await,
            queue_size: self.scheduler.len(),
            active_tasks: self.ledger.active(),
            tracked_submitters: self.admission.tracked(),
            hub_topics: self.hub.topic_count(),
            store_failures: self.ledger.store_failures(),
            capabilities: self.monitor.snapshot().await,
        }
    }

    /// Settings the engine was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The status event hub.
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Per-capability counters.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// The queue of waiting tasks.
    pub fn scheduler(&self) -> &Arc<PriorityScheduler> {
        &self.scheduler
    }

    /// Whether worker pools are up.
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }
}
