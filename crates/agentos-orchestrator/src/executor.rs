use crate::agent::{Agent, AgentError};
use crate::config::OrchestratorConfig;
use crate::ledger::TaskLedger;
use crate::monitor::AgentMonitor;
use crate::scheduler::{PriorityScheduler, QueuedTask};
use agentos_core::{Capability, Task, TaskError, TaskErrorKind, TaskStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a worker of one capability needs.
pub(crate) struct WorkerContext {
    pub(crate) capability: Capability,
    pub(crate) agent: Arc<dyn Agent>,
    pub(crate) scheduler: Arc<PriorityScheduler>,
    pub(crate) ledger: Arc<TaskLedger>,
    pub(crate) monitor: Arc<AgentMonitor>,
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) shutdown: CancellationToken,
}

/// Result of one agent attempt.
enum Attempt {
    Success(serde_json::Value),
    Transient(String),
    Permanent(String),
    TimedOut,
    Cancelled,
}

/// The fixed set of worker tasks serving one capability. The worker count is
/// the capability's concurrency cap: a worker holds its slot from dequeue
/// until the task leaves `running` (backoff sleeps included).
pub(crate) struct AgentPool {
    capability: Capability,
    workers: Vec<JoinHandle<()>>,
}

impl AgentPool {
    pub(crate) fn spawn(ctx: Arc<WorkerContext>, size: usize) -> Self {
        let capability = ctx.capability;
        let workers = (0..size)
            .map(|worker| {
                let ctx = ctx.clone();
                tokio::spawn(async move { ctx.run(worker).await })
            })
            .collect();
        info!(capability = %capability, workers = size, "Agent pool started");
        Self {
            capability,
            workers,
        }
    }

    /// Wait for every worker to exit after shutdown was signalled.
    pub(crate) async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(capability = %self.capability, error = %e, "Worker exited abnormally");
            }
        }
    }
}

impl WorkerContext {
    async fn run(&self, worker: usize) {
        debug!(capability = %self.capability, worker, "Worker ready");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if let Some(queued) = self.scheduler.dequeue_next(self.capability) {
                self.process(queued).await;
                continue;
            }
            tokio::select! {
                _ = self.scheduler.wait_for_work(self.capability) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }
        debug!(capability = %self.capability, worker, "Worker stopped");
    }

    async fn process(&self, queued: QueuedTask) {
        let id = queued.task_id;
        let Some(cancel) = self.ledger.cancel_token(id) else {
            warn!(task_id = %id, "Dequeued task is not in the ledger");
            return;
        };
        if cancel.is_cancelled() {
            self.fail(id, self.cancellation_error()).await;
            return;
        }
        if let Err(e) = self.ledger.transition(id, TaskStatus::Assigned).await {
            // Cancelled and failed between dequeue and here.
            debug!(task_id = %id, error = %e, "Skipping dequeued task");
            return;
        }
        if cancel.is_cancelled() {
            self.fail(id, self.cancellation_error()).await;
            return;
        }
        let task = match self.ledger.transition(id, TaskStatus::Running).await {
            Ok(task) => task,
            Err(e) => {
                debug!(task_id = %id, error = %e, "Task left assigned before it could run");
                return;
            }
        };

        self.monitor.start_task(self.capability).await;
        let started = Instant::now();
        let attempt = self.attempt(&task, &cancel).await;
        let elapsed = started.elapsed();

        match attempt {
            Attempt::Success(payload) => {
                let elapsed_ms = elapsed.as_millis() as u64;
                match self.ledger.apply(id, |t| t.complete_in(payload, elapsed_ms)).await {
                    Ok(_) => {
                        self.monitor
                            .record_completed(self.capability, elapsed.as_secs_f64() * 1000.0)
                            .await;
                        info!(
                            task_id = %id,
                            capability = %self.capability,
                            elapsed_ms,
                            "Task completed"
                        );
                    }
                    Err(e) => warn!(task_id = %id, error = %e, "Could not record result"),
                }
            }
            Attempt::Cancelled => self.fail(id, self.cancellation_error()).await,
            Attempt::Permanent(message) => {
                self.fail(id, TaskError::new(TaskErrorKind::Permanent, message))
                    .await;
            }
            Attempt::TimedOut => {
                let message = format!(
                    "attempt exceeded {}ms",
                    self.config.capabilities.get(self.capability).timeout_ms
                );
                self.retry_or_fail(&task, &cancel, TaskErrorKind::Timeout, message)
                    .await;
            }
            Attempt::Transient(message) => {
                self.retry_or_fail(&task, &cancel, TaskErrorKind::RetriesExhausted, message)
                    .await;
            }
        }
        self.monitor
            .finish_task(self.capability, elapsed.as_millis() as u64)
            .await;
    }

    /// Run one attempt in its own tokio task so a panicking agent cannot take
    /// the worker down, bounded by the capability timeout and the task's token.
    async fn attempt(&self, task: &Task, cancel: &CancellationToken) -> Attempt {
        let agent = self.agent.clone();
        let owned = task.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { agent.run(&owned, &token).await });
        let abort = handle.abort_handle();
        let timeout = self.config.capabilities.get(self.capability).timeout();

        tokio::select! {
            joined = tokio::time::timeout(timeout, handle) => match joined {
                Err(_) => {
                    abort.abort();
                    warn!(task_id = %task.id, capability = %self.capability, retry_count = task.retry_count, "Attempt timed out");
                    Attempt::TimedOut
                }
                Ok(Err(join_error)) => {
                    error!(task_id = %task.id, error = %join_error, "Agent panicked");
                    Attempt::Permanent(format!("agent panicked: {join_error}"))
                }
                Ok(Ok(Ok(payload))) => Attempt::Success(payload),
                Ok(Ok(Err(AgentError::Transient(message)))) => {
                    warn!(task_id = %task.id, error = %message, retry_count = task.retry_count, "Transient agent failure");
                    Attempt::Transient(message)
                }
                Ok(Ok(Err(AgentError::Permanent(message)))) => Attempt::Permanent(message),
            },
            _ = cancel.cancelled() => {
                abort.abort();
                Attempt::Cancelled
            }
        }
    }

    /// Consume one retry or, with the budget spent, fail with `exhausted_kind`.
    async fn retry_or_fail(
        &self,
        task: &Task,
        cancel: &CancellationToken,
        exhausted_kind: TaskErrorKind,
        message: String,
    ) {
        let max_retries = self.config.max_retries;
        if task.retry_count >= max_retries {
            let error = TaskError::new(
                exhausted_kind,
                format!("gave up after {max_retries} retries: {message}"),
            );
            self.fail(task.id, error).await;
            return;
        }

        let timed_out = exhausted_kind == TaskErrorKind::Timeout;
        if !timed_out {
            let delay = self.config.retry.backoff(task.retry_count);
            if !self.backoff(delay, cancel).await {
                self.fail(task.id, self.cancellation_error()).await;
                return;
            }
        }

        match self
            .ledger
            .apply(task.id, |t| t.requeue(max_retries))
            .await
        {
            Ok(requeued) => {
                self.monitor.record_retry(self.capability, timed_out).await;
                self.scheduler
                    .enqueue(requeued.id, requeued.capability, requeued.priority);
                debug!(task_id = %task.id, retry_count = requeued.retry_count, "Task re-enqueued");
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Could not re-enqueue task"),
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn backoff(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }

    async fn fail(&self, id: agentos_core::TaskId, error: TaskError) {
        let kind = error.kind;
        match self.ledger.apply(id, |t| t.fail(error)).await {
            Ok(task) => {
                self.monitor.record_failed(self.capability, kind).await;
                info!(
                    task_id = %id,
                    capability = %self.capability,
                    kind = ?kind,
                    retry_count = task.retry_count,
                    "Task failed"
                );
            }
            Err(e) => debug!(task_id = %id, error = %e, "Task already terminal"),
        }
    }

    /// Task tokens are children of the shutdown token, so a cancelled token
    /// during shutdown is not a client cancellation.
    fn cancellation_error(&self) -> TaskError {
        if self.shutdown.is_cancelled() {
            TaskError::new(TaskErrorKind::Internal, "orchestrator shut down")
        } else {
            TaskError::cancelled()
        }
    }
}
