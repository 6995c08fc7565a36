use crate::hub::NotificationHub;
use agentos_core::{AgentosError, AgentosResult, Task, TaskEvent, TaskId, TaskStatus};
use agentos_store::TaskStore;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct EntryState {
    task: Task,
    version: u64,
}

struct LedgerEntry {
    state: Mutex<EntryState>,
    cancel: CancellationToken,
    /// Highest version written to the store. Held across the store call so
    /// writes for one task are serialized and never regress.
    persisted: tokio::sync::Mutex<u64>,
}

#[derive(Clone, Copy)]
enum StoreOp {
    Create,
    Update,
}

/// In-memory authoritative task table.
///
/// Every transition goes through [`TaskLedger::apply`], which checks it against
/// the state machine, publishes the event while still holding the task's lock
/// (so subscribers see transitions in order) and then writes the snapshot to
/// the store. Store failures are logged and counted, never surfaced to the task.
pub(crate) struct TaskLedger {
    entries: RwLock<HashMap<TaskId, Arc<LedgerEntry>>>,
    store: Arc<dyn TaskStore>,
    hub: Arc<NotificationHub>,
    store_timeout: Duration,
    store_failures: AtomicU64,
}

impl TaskLedger {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        hub: Arc<NotificationHub>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
            hub,
            store_timeout,
            store_failures: AtomicU64::new(0),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    fn entry(&self, id: TaskId) -> Option<Arc<LedgerEntry>> {
        self.entries.read().get(&id).cloned()
    }

    /// Register a freshly queued task, publish its `queued` event and persist it.
    pub(crate) async fn insert(&self, task: Task, cancel: CancellationToken) {
        let id = task.id;
        let entry = Arc::new(LedgerEntry {
            state: Mutex::new(EntryState {
                task: task.clone(),
                version: 0,
            }),
            cancel,
            persisted: tokio::sync::Mutex::new(0),
        });
        // Taken before the entry is visible, so the create lands before any update.
        let _persisted = entry.persisted.lock().await;
        self.hub.publish(TaskEvent::from_task(&task));
        self.entries.write().insert(id, entry.clone());
        self.write_store(StoreOp::Create, &task).await;
    }

    /// Register a task read back from the store. Nothing is written back; its
    /// current state is published so subscribers can replay it. Returns
    /// `false` if the ledger already holds the task.
    pub(crate) fn restore(&self, task: Task, cancel: CancellationToken) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&task.id) {
            return false;
        }
        self.hub.publish(TaskEvent::from_task(&task));
        entries.insert(
            task.id,
            Arc::new(LedgerEntry {
                state: Mutex::new(EntryState { task, version: 0 }),
                cancel,
                persisted: tokio::sync::Mutex::new(0),
            }),
        );
        true
    }

    /// Apply `change` to a copy of the task; on success the copy replaces the
    /// current state, its event is published and its snapshot persisted.
    /// A failing `change` leaves the task untouched.
    pub(crate) async fn apply<F>(&self, id: TaskId, change: F) -> AgentosResult<Task>
    where
        F: FnOnce(&mut Task) -> AgentosResult<()>,
    {
        let entry = self.entry(id).ok_or(AgentosError::NotFound(id))?;
        let (snapshot, version) = {
            let mut state = entry.state.lock();
            let mut next = state.task.clone();
            change(&mut next)?;
            state.task = next.clone();
            state.version += 1;
            self.hub.publish(TaskEvent::from_task(&next));
            (next, state.version)
        };
        debug!(task_id = %id, status = %snapshot.status, "Task transition");

        let mut persisted = entry.persisted.lock().await;
        if *persisted < version {
            self.write_store(StoreOp::Update, &snapshot).await;
            *persisted = version;
        }
        Ok(snapshot)
    }

    /// Shorthand for a plain status change.
    pub(crate) async fn transition(&self, id: TaskId, next: TaskStatus) -> AgentosResult<Task> {
        self.apply(id, |task| task.transition(next)).await
    }

    async fn write_store(&self, op: StoreOp, task: &Task) {
        let write = async {
            match op {
                StoreOp::Create => self.store.create(task).await,
                StoreOp::Update => self.store.update(task).await,
            }
        };
        let error = match tokio::time::timeout(self.store_timeout, write).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(_) => AgentosError::StoreUnavailable(format!(
                "store call timed out after {}ms",
                self.store_timeout.as_millis()
            )),
        };
        self.store_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            task_id = %task.id,
            status = %task.status,
            error = %error,
            "Store write failed, in-memory state stays authoritative"
        );
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<Task> {
        self.entry(id).map(|e| e.state.lock().task.clone())
    }

    pub(crate) fn cancel_token(&self, id: TaskId) -> Option<CancellationToken> {
        self.entry(id).map(|e| e.cancel.clone())
    }

    /// Tasks of one submitter currently held in memory.
    pub(crate) fn by_submitter(&self, submitter: &str) -> Vec<Task> {
        let entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries
            .iter()
            .map(|e| e.state.lock().task.clone())
            .filter(|t| t.submitter == submitter)
            .collect()
    }

    /// Tasks currently `assigned` or `running`.
    pub(crate) fn active(&self) -> usize {
        let entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries
            .iter()
            .filter(|e| {
                matches!(
                    e.state.lock().task.status,
                    TaskStatus::Assigned | TaskStatus::Running
                )
            })
            .count()
    }

    /// Forget terminal tasks whose last transition is older than `retention`.
    /// The store still has them.
    pub(crate) fn evict_terminal(&self, retention: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| Utc::now().checked_sub_signed(r));
        let Some(cutoff) = cutoff else {
            return 0;
        };
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| {
            let state = e.state.lock();
            !(state.task.is_terminal() && state.task.updated_at <= cutoff)
        });
        before - entries.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }
}
