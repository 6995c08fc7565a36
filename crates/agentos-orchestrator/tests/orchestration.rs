#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end orchestration tests.
//!
//! Runs real worker pools against scripted agents and checks the observable
//! contract: status sequences, concurrency caps, retries, timeouts,
//! cancellation, admission and dispatch order.

use agentos_core::{
    AgentosError, AgentosResult, Capability, Delivery, Metadata, Priority, Task, TaskErrorKind,
    TaskId, TaskStatus, TaskView,
};
use agentos_orchestrator::*;
use agentos_store::{FileTaskStore, InMemoryTaskStore, TaskStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted agents
// ---------------------------------------------------------------------------

enum Script {
    AlwaysTransient,
    AlwaysPermanent,
    TransientThenOk(u32),
    /// Sleeps without looking at the token.
    AlwaysSlow(Duration),
    SlowThenOk(Duration),
    /// Sleeps but stops early on cancellation.
    Interruptible(Duration),
    PanicOn(&'static str),
}

struct ScriptedAgent {
    capability: Capability,
    script: Script,
    calls: AtomicU32,
}

impl ScriptedAgent {
    fn new(capability: Capability, script: Script) -> Arc<Self> {
        Arc::new(Self {
            capability,
            script,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn run(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::AlwaysTransient => Err(AgentError::transient("upstream 503")),
            Script::AlwaysPermanent => Err(AgentError::permanent("request refused")),
            Script::TransientThenOk(n) if call < *n => Err(AgentError::transient("flaky")),
            Script::TransientThenOk(_) => Ok(serde_json::json!({ "calls": call + 1 })),
            Script::AlwaysSlow(d) => {
                tokio::time::sleep(*d).await;
                Ok(serde_json::json!("late"))
            }
            Script::SlowThenOk(d) if call == 0 => {
                tokio::time::sleep(*d).await;
                Ok(serde_json::json!("late"))
            }
            Script::SlowThenOk(_) => Ok(serde_json::json!("fast")),
            Script::Interruptible(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(*d) => Ok(serde_json::json!("done")),
                    _ = cancel.cancelled() => Err(AgentError::transient("interrupted")),
                }
            }
            Script::PanicOn(marker) => {
                if task.input.contains(marker) {
                    panic!("agent blew up on {marker}");
                }
                Ok(serde_json::json!("ok"))
            }
        }
    }
}

/// Records each task's input on entry, then blocks until the test hands out a
/// permit.
struct GatedAgent {
    capability: Capability,
    gate: Arc<Semaphore>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Agent for GatedAgent {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn run(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, AgentError> {
        self.log.lock().push(task.input.clone());
        tokio::select! {
            permit = self.gate.acquire() => {
                permit.map_err(|e| AgentError::permanent(e.to_string()))?.forget();
                Ok(serde_json::json!({ "echo": task.input }))
            }
            _ = cancel.cancelled() => Err(AgentError::permanent("cancelled")),
        }
    }
}

struct Gate {
    permits: Arc<Semaphore>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Gate {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn agent(&self, capability: Capability) -> Arc<GatedAgent> {
        Arc::new(GatedAgent {
            capability,
            gate: self.permits.clone(),
            log: self.log.clone(),
        })
    }

    fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

struct BrokenStore;

#[async_trait]
impl TaskStore for BrokenStore {
    async fn create(&self, _task: &Task) -> AgentosResult<()> {
        Err(AgentosError::StoreUnavailable("connection refused".into()))
    }
    async fn update(&self, _task: &Task) -> AgentosResult<()> {
        Err(AgentosError::StoreUnavailable("connection refused".into()))
    }
    async fn get(&self, _id: TaskId) -> AgentosResult<Option<Task>> {
        Err(AgentosError::StoreUnavailable("connection refused".into()))
    }
    async fn list_by_submitter(&self, _submitter: &str) -> AgentosResult<Vec<Task>> {
        Err(AgentosError::StoreUnavailable("connection refused".into()))
    }
    async fn list_unfinished(&self) -> AgentosResult<Vec<Task>> {
        Err(AgentosError::StoreUnavailable("connection refused".into()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy {
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        },
        capabilities: CapabilitiesConfig::uniform(2, Duration::from_secs(5)),
        ..OrchestratorConfig::default()
    }
}

async fn started(config: OrchestratorConfig, agents: AgentRegistry) -> Orchestrator {
    started_with_store(config, agents, Arc::new(InMemoryTaskStore::new())).await
}

async fn started_with_store(
    config: OrchestratorConfig,
    agents: AgentRegistry,
    store: Arc<dyn TaskStore>,
) -> Orchestrator {
    let orch = Orchestrator::new(config, agents, store).unwrap();
    orch.start().await.unwrap();
    orch
}

async fn submit(orch: &Orchestrator, text: &str, priority: Priority) -> TaskId {
    orch.submit(SubmitRequest::new(text, "alice").with_priority(priority))
        .await
        .unwrap()
        .task_id
}

async fn wait_for(orch: &Orchestrator, id: TaskId, status: TaskStatus) -> TaskView {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let view = orch.get_status(id).await.unwrap();
        if view.status == status {
            return view;
        }
        assert!(
            Instant::now() < deadline,
            "task {id} is {} after 10s, expected {status}",
            view.status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_terminal(orch: &Orchestrator, id: TaskId) -> TaskView {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let view = orch.get_status(id).await.unwrap();
        if view.status.is_terminal() {
            return view;
        }
        assert!(Instant::now() < deadline, "task {id} never finished");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_running(orch: &Orchestrator, capability: Capability, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let state = orch.monitor().get_state(capability).await.unwrap();
        if state.running == n {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "{capability} has {} running, expected {n}",
            state.running
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Monitor counters are updated just after the terminal transition is visible.
async fn settled_metrics(orch: &Orchestrator, processed: u64) -> SystemMetrics {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let metrics = orch.metrics().await;
        if metrics.processing.tasks_processed >= processed {
            return metrics;
        }
        assert!(Instant::now() < deadline, "monitor never settled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn statuses_until_terminal(sub: &Subscription) -> Vec<TaskStatus> {
    let mut seen = Vec::new();
    loop {
        let delivery = tokio::time::timeout(Duration::from_secs(10), sub.recv())
            .await
            .expect("no event within 10s")
            .expect("subscription closed early");
        match delivery {
            Delivery::Event(event) => {
                seen.push(event.status);
                if event.is_terminal() {
                    return seen;
                }
            }
            Delivery::Gap { missed, .. } => panic!("unexpected gap of {missed}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_researcher_task_full_sequence() {
    let orch = started(fast_config(), builtin_agents()).await;
    let receipt = orch
        .submit(
            SubmitRequest::new("Research renewable energy trends in 2024", "alice")
                .with_priority(Priority::High),
        )
        .await
        .unwrap();
    assert_eq!(receipt.capability, Capability::Researcher);
    assert_eq!(receipt.status, TaskStatus::Queued);

    let sub = orch.subscribe(receipt.task_id).await.unwrap();
    assert_eq!(
        statuses_until_terminal(&sub).await,
        vec![
            TaskStatus::Queued,
            TaskStatus::Assigned,
            TaskStatus::Running,
            TaskStatus::Completed
        ]
    );

    let view = orch.get_status(receipt.task_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.priority, Priority::High);
    assert_eq!(view.input, "Research renewable energy trends in 2024");
    assert!(view.processing_time_ms.is_some());
    assert_eq!(view.result.unwrap()["agent"], "researcher");
    assert!(orch.acknowledge(&sub));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_empty_text_creates_no_task() {
    let orch = started(fast_config(), builtin_agents()).await;
    let err = orch
        .submit(SubmitRequest::new("   \n\t", "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentosError::Validation(_)));
    assert!(orch.list_tasks("alice", 0, 100).await.unwrap().is_empty());
    assert_eq!(orch.metrics().await.queue_size, 0);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_oversized_text_rejected() {
    let orch = started(fast_config(), builtin_agents()).await;
    let err = orch
        .submit(SubmitRequest::new("x".repeat(5_001), "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentosError::Validation(_)));
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_subscriber_sees_same_sequence() {
    let orch = started(fast_config(), builtin_agents()).await;
    let id = submit(&orch, "Write a short blog post", Priority::Medium).await;
    let first = orch.subscribe(id).await.unwrap();
    let second = orch.subscribe(id).await.unwrap();
    let a = statuses_until_terminal(&first).await;
    let b = statuses_until_terminal(&second).await;
    assert_eq!(a, b);
    assert_eq!(a.last(), Some(&TaskStatus::Completed));
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subscribe_after_completion_gets_terminal_state() {
    let orch = started(fast_config(), builtin_agents()).await;
    let id = submit(&orch, "Plan the offsite", Priority::Low).await;
    wait_for(&orch, id, TaskStatus::Completed).await;

    let sub = orch.subscribe(id).await.unwrap();
    let seen = statuses_until_terminal(&sub).await;
    assert_eq!(seen.last(), Some(&TaskStatus::Completed));
    assert!(orch.acknowledge(&sub));
    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Concurrency caps
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_analyst_cap_two_with_three_tasks() {
    let gate = Gate::new();
    let mut config = fast_config();
    config.capabilities.analyst.concurrency = 2;
    let orch = started(config, builtin_agents().with(gate.agent(Capability::Analyst))).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(submit(&orch, "analyze data", Priority::Medium).await);
    }
    wait_running(&orch, Capability::Analyst, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut statuses = Vec::new();
    for id in &ids {
        statuses.push(orch.get_status(*id).await.unwrap().status);
    }
    assert_eq!(
        statuses.iter().filter(|s| **s == TaskStatus::Running).count(),
        2
    );
    assert_eq!(
        statuses.iter().filter(|s| **s == TaskStatus::Queued).count(),
        1
    );

    gate.release(3);
    for id in &ids {
        assert_eq!(wait_terminal(&orch, *id).await.status, TaskStatus::Completed);
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let state = orch.monitor().get_state(Capability::Analyst).await.unwrap();
        if state.completed == 3 {
            assert_eq!(state.peak_running, 2);
            break;
        }
        assert!(Instant::now() < deadline, "monitor never counted 3 completions");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Retries and failures
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_failures_exhaust_retries() {
    let mut config = fast_config();
    config.max_retries = 2;
    let agent = ScriptedAgent::new(Capability::Writer, Script::AlwaysTransient);
    let orch = started(config, builtin_agents().with(agent.clone())).await;

    let id = submit(&orch, "Write a haiku", Priority::Medium).await;
    let sub = orch.subscribe(id).await.unwrap();
    let seen = statuses_until_terminal(&sub).await;
    use TaskStatus::*;
    assert_eq!(
        seen,
        vec![Queued, Assigned, Running, Queued, Assigned, Running, Queued, Assigned, Running, Failed]
    );

    let view = orch.get_status(id).await.unwrap();
    assert_eq!(view.retry_count, 2);
    assert_eq!(view.error.unwrap().kind, TaskErrorKind::RetriesExhausted);
    assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        orch.monitor()
            .get_state(Capability::Writer)
            .await
            .unwrap()
            .retries,
        2
    );
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_then_success() {
    let agent = ScriptedAgent::new(Capability::Writer, Script::TransientThenOk(2));
    let orch = started(fast_config(), builtin_agents().with(agent)).await;
    let id = submit(&orch, "Draft an email", Priority::Medium).await;
    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.retry_count, 2);
    assert_eq!(view.result.unwrap()["calls"], 3);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_permanent_failure_is_not_retried() {
    let agent = ScriptedAgent::new(Capability::Planner, Script::AlwaysPermanent);
    let orch = started(fast_config(), builtin_agents().with(agent.clone())).await;
    let id = submit(&orch, "Plan a heist", Priority::Urgent).await;
    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.retry_count, 0);
    let error = view.error.unwrap();
    assert_eq!(error.kind, TaskErrorKind::Permanent);
    assert!(error.message.contains("refused"));
    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_is_retried() {
    let mut config = fast_config();
    config.capabilities.researcher.timeout_ms = 50;
    let agent = ScriptedAgent::new(
        Capability::Researcher,
        Script::SlowThenOk(Duration::from_secs(30)),
    );
    let orch = started(config, builtin_agents().with(agent)).await;
    let id = submit(&orch, "Find sources on tidal power", Priority::Medium).await;
    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.retry_count, 1);
    assert_eq!(view.result.unwrap(), serde_json::json!("fast"));
    let state = orch.monitor().get_state(Capability::Researcher).await.unwrap();
    assert_eq!(state.timeouts, 1);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_timeouts_fail_with_timeout_kind() {
    let mut config = fast_config();
    config.max_retries = 1;
    config.capabilities.researcher.timeout_ms = 30;
    let agent = ScriptedAgent::new(
        Capability::Researcher,
        Script::AlwaysSlow(Duration::from_secs(30)),
    );
    let orch = started(config, builtin_agents().with(agent)).await;
    let id = submit(&orch, "Search the archive", Priority::Medium).await;
    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.retry_count, 1);
    assert_eq!(view.error.unwrap().kind, TaskErrorKind::Timeout);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_agent_is_contained() {
    let mut config = fast_config();
    config.capabilities.general.concurrency = 1;
    let agent = ScriptedAgent::new(Capability::General, Script::PanicOn("boom"));
    let orch = started(config, builtin_agents().with(agent)).await;

    let bad = submit(&orch, "boom", Priority::Medium).await;
    let view = wait_terminal(&orch, bad).await;
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error.unwrap().kind, TaskErrorKind::Permanent);

    // The single worker survived and keeps serving.
    let good = submit(&orch, "hello", Priority::Medium).await;
    assert_eq!(wait_terminal(&orch, good).await.status, TaskStatus::Completed);
    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_queued_never_runs() {
    let gate = Gate::new();
    let mut config = fast_config();
    config.capabilities.general.concurrency = 1;
    let orch = started(config, builtin_agents().with(gate.agent(Capability::General))).await;

    let blocker = submit(&orch, "first", Priority::Medium).await;
    wait_for(&orch, blocker, TaskStatus::Running).await;
    let waiting = submit(&orch, "second", Priority::Medium).await;
    let sub = orch.subscribe(waiting).await.unwrap();

    assert!(orch.cancel(waiting).await.unwrap());
    assert_eq!(
        statuses_until_terminal(&sub).await,
        vec![TaskStatus::Queued, TaskStatus::Failed]
    );
    let view = orch.get_status(waiting).await.unwrap();
    assert_eq!(view.error.unwrap().kind, TaskErrorKind::Cancelled);

    gate.release(1);
    assert_eq!(wait_terminal(&orch, blocker).await.status, TaskStatus::Completed);
    assert_eq!(gate.log(), vec!["first".to_string()]);
    assert!(!orch.cancel(waiting).await.unwrap());
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_running_task() {
    let agent = ScriptedAgent::new(
        Capability::Writer,
        Script::Interruptible(Duration::from_secs(30)),
    );
    let orch = started(fast_config(), builtin_agents().with(agent)).await;
    let id = submit(&orch, "Compose a symphony", Priority::Medium).await;
    wait_for(&orch, id, TaskStatus::Running).await;

    assert!(orch.cancel(id).await.unwrap());
    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error.unwrap().kind, TaskErrorKind::Cancelled);
    assert_eq!(view.retry_count, 0);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_backoff() {
    let mut config = fast_config();
    config.retry = RetryPolicy {
        backoff_base_ms: 10_000,
        backoff_max_ms: 10_000,
    };
    let agent = ScriptedAgent::new(Capability::Writer, Script::AlwaysTransient);
    let orch = started(config, builtin_agents().with(agent.clone())).await;
    let id = submit(&orch, "Write a sonnet", Priority::Medium).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while agent.calls.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "agent never ran");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Still holding the slot while it sleeps before the retry.
    assert_eq!(orch.get_status(id).await.unwrap().status, TaskStatus::Running);

    let cancelled_at = Instant::now();
    assert!(orch.cancel(id).await.unwrap());
    let view = wait_terminal(&orch, id).await;
    assert!(cancelled_at.elapsed() < Duration::from_secs(5));
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error.unwrap().kind, TaskErrorKind::Cancelled);
    assert_eq!(view.retry_count, 0);
    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_fails_in_flight_and_keeps_queued() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut config = fast_config();
    config.capabilities.writer.concurrency = 1;
    let agent = ScriptedAgent::new(
        Capability::Writer,
        Script::Interruptible(Duration::from_secs(30)),
    );
    let orch = started_with_store(config, builtin_agents().with(agent), store.clone()).await;

    let running = submit(&orch, "Write the first chapter", Priority::Medium).await;
    wait_for(&orch, running, TaskStatus::Running).await;
    let waiting = submit(&orch, "Write the second chapter", Priority::Medium).await;

    orch.shutdown().await;

    let view = orch.get_status(running).await.unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error.unwrap().kind, TaskErrorKind::Internal);
    assert_eq!(
        orch.get_status(waiting).await.unwrap().status,
        TaskStatus::Queued
    );
    assert_eq!(
        store.get(waiting).await.unwrap().unwrap().status,
        TaskStatus::Queued
    );
    assert_eq!(orch.metrics().await.queue_size, 1);
}

// ---------------------------------------------------------------------------
// Restart
// ---------------------------------------------------------------------------

async fn file_store(dir: &std::path::Path) -> Arc<dyn TaskStore> {
    Arc::new(FileTaskStore::new(dir.join("tasks")).await.unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_resumes_queued_and_fails_interrupted() {
    let tmp = tempfile::tempdir().unwrap();

    let (queued, interrupted) = {
        let store = file_store(tmp.path()).await;
        let previous =
            Orchestrator::new(fast_config(), builtin_agents(), store.clone()).unwrap();
        let queued = submit(&previous, "Plan my week", Priority::Medium).await;

        let mut stuck = Task::new(
            "Write a eulogy",
            Priority::High,
            Metadata::new(),
            Capability::Writer,
            "alice",
        );
        stuck.transition(TaskStatus::Assigned).unwrap();
        stuck.transition(TaskStatus::Running).unwrap();
        store.create(&stuck).await.unwrap();
        previous.shutdown().await;
        (queued, stuck.id)
    };

    let orch = started_with_store(fast_config(), builtin_agents(), file_store(tmp.path()).await)
        .await;
    let view = wait_terminal(&orch, queued).await;
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result.unwrap()["agent"], "planner");

    let view = orch.get_status(interrupted).await.unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error.unwrap().kind, TaskErrorKind::Internal);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_cancel_task_left_queued_by_previous_run() {
    let tmp = tempfile::tempdir().unwrap();
    let left = {
        let previous =
            Orchestrator::new(fast_config(), builtin_agents(), file_store(tmp.path()).await)
                .unwrap();
        submit(&previous, "Plan my week", Priority::Medium).await
    };

    let store = file_store(tmp.path()).await;
    let orch = Orchestrator::new(fast_config(), builtin_agents(), store.clone()).unwrap();
    assert_eq!(
        orch.get_status(left).await.unwrap().status,
        TaskStatus::Queued
    );
    assert!(orch.cancel(left).await.unwrap());

    let view = orch.get_status(left).await.unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.error.unwrap().kind, TaskErrorKind::Cancelled);
    assert_eq!(
        store.get(left).await.unwrap().unwrap().status,
        TaskStatus::Failed
    );

    // A later start must not pick it up again.
    orch.start().await.unwrap();
    assert_eq!(orch.metrics().await.queue_size, 0);
    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Admission and persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rate_limited_submission_creates_no_task() {
    let mut config = fast_config();
    config.admission.capacity = 2.0;
    config.admission.refill_per_sec = 0.0;
    let orch = started(config, builtin_agents()).await;

    submit(&orch, "one", Priority::Low).await;
    submit(&orch, "two", Priority::Low).await;
    let err = orch
        .submit(SubmitRequest::new("three", "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentosError::RateLimited(_)));
    assert_eq!(orch.list_tasks("alice", 0, 10).await.unwrap().len(), 2);

    // Another submitter has its own bucket.
    assert!(orch.submit(SubmitRequest::new("four", "bob")).await.is_ok());
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_store_outage_does_not_fail_tasks() {
    let orch = started_with_store(fast_config(), builtin_agents(), Arc::new(BrokenStore)).await;
    let id = submit(&orch, "Summarize the minutes", Priority::Medium).await;
    let view = wait_terminal(&orch, id).await;
    assert_eq!(view.status, TaskStatus::Completed);

    // create, assigned and running are written before the agent runs.
    let metrics = orch.metrics().await;
    assert!(metrics.store_failures >= 3);
    assert_eq!(orch.list_tasks("alice", 0, 10).await.unwrap().len(), 1);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_store_receives_final_snapshot() {
    let store = Arc::new(InMemoryTaskStore::new());
    let orch = started_with_store(fast_config(), builtin_agents(), store.clone()).await;
    let id = submit(&orch, "Evaluate the metrics", Priority::Medium).await;
    wait_for(&orch, id, TaskStatus::Completed).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stored = store.get(id).await.unwrap().unwrap();
        if stored.status == TaskStatus::Completed {
            assert!(stored.result.is_some());
            break;
        }
        assert!(Instant::now() < deadline, "store never saw completion");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    orch.shutdown().await;
}

#[tokio::test]
async fn test_list_tasks_newest_first_with_paging() {
    let orch = Orchestrator::new(
        fast_config(),
        builtin_agents(),
        Arc::new(InMemoryTaskStore::new()),
    )
    .unwrap();
    let mut ids = Vec::new();
    for text in ["oldest", "middle", "newest"] {
        ids.push(submit(&orch, text, Priority::Medium).await);
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let all = orch.list_tasks("alice", 0, 10).await.unwrap();
    let listed: Vec<TaskId> = all.iter().map(|t| t.id).collect();
    assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

    let page = orch.list_tasks("alice", 1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, ids[1]);
    assert!(orch.list_tasks("bob", 0, 10).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Dispatch order
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_priority_then_fifo_order() {
    let gate = Gate::new();
    let mut config = fast_config();
    config.capabilities.general.concurrency = 1;
    let orch = started(config, builtin_agents().with(gate.agent(Capability::General))).await;

    let blocker = submit(&orch, "blocker", Priority::Medium).await;
    wait_for(&orch, blocker, TaskStatus::Running).await;
    let mut ids = vec![blocker];
    for (text, priority) in [
        ("l", Priority::Low),
        ("m1", Priority::Medium),
        ("h", Priority::High),
        ("m2", Priority::Medium),
    ] {
        ids.push(submit(&orch, text, priority).await);
    }

    gate.release(ids.len());
    for id in &ids {
        wait_terminal(&orch, *id).await;
    }
    assert_eq!(gate.log(), vec!["blocker", "h", "m1", "m2", "l"]);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_aged_task_overtakes_newer_higher_priority() {
    let gate = Gate::new();
    let mut config = fast_config();
    config.capabilities.general.concurrency = 1;
    config.aging_threshold_ms = 50;
    let orch = started(config, builtin_agents().with(gate.agent(Capability::General))).await;

    let blocker = submit(&orch, "blocker", Priority::Medium).await;
    wait_for(&orch, blocker, TaskStatus::Running).await;
    let old = submit(&orch, "old", Priority::Low).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    let new = submit(&orch, "new", Priority::High).await;

    gate.release(3);
    for id in [blocker, old, new] {
        wait_terminal(&orch, id).await;
    }
    assert_eq!(gate.log(), vec!["blocker", "old", "new"]);
    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Notifications and metrics
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_subscriber_gets_gap() {
    let mut config = fast_config();
    config.hub.outbox_capacity = 2;
    let orch = started(config, builtin_agents()).await;
    let id = submit(&orch, "hello there", Priority::Medium).await;
    let sub = orch.subscribe(id).await.unwrap();
    wait_for(&orch, id, TaskStatus::Completed).await;

    assert_eq!(
        sub.try_recv(),
        Some(Delivery::Gap {
            task_id: id,
            missed: 2
        })
    );
    let rest: Vec<TaskStatus> = std::iter::from_fn(|| sub.try_recv())
        .map(|d| match d {
            Delivery::Event(e) => e.status,
            Delivery::Gap { .. } => panic!("second gap"),
        })
        .collect();
    assert_eq!(rest, vec![TaskStatus::Running, TaskStatus::Completed]);
    orch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_metrics_track_outcomes() {
    let agent = ScriptedAgent::new(Capability::Planner, Script::AlwaysPermanent);
    let orch = started(fast_config(), builtin_agents().with(agent)).await;
    let ok = submit(&orch, "Write a limerick", Priority::Medium).await;
    let bad = submit(&orch, "Plan a picnic", Priority::Medium).await;
    wait_terminal(&orch, ok).await;
    wait_terminal(&orch, bad).await;

    let metrics = settled_metrics(&orch, 2).await;
    assert_eq!(metrics.processing.tasks_processed, 2);
    assert!((metrics.processing.success_rate - 0.5).abs() < 1e-9);
    assert_eq!(metrics.queue_size, 0);
    assert_eq!(metrics.capabilities.len(), 5);

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["tasks_processed"], 2);
    assert!(json["capabilities"].is_array());
    orch.shutdown().await;
}

#[tokio::test]
async fn test_config_from_toml_drives_engine() {
    let config: OrchestratorConfig = toml::from_str(
        r#"
        max_input_length = 10

        [capabilities.general]
        concurrency = 1
        "#,
    )
    .unwrap();
    let orch = started(config, builtin_agents()).await;
    assert!(matches!(
        orch.submit(SubmitRequest::new("far too long for ten", "alice"))
            .await,
        Err(AgentosError::Validation(_))
    ));
    assert_eq!(orch.config().capabilities.general.concurrency, 1);
    orch.shutdown().await;
}
