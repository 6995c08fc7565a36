use agentos_core::{AgentosError, AgentosResult, Task, TaskId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Narrow persistence interface consumed by the orchestrator.
///
/// `update` receives the full task snapshot after a transition.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Record a newly queued task.
    async fn create(&self, task: &Task) -> AgentosResult<()>;
    /// Overwrite a task's record with a newer snapshot.
    async fn update(&self, task: &Task) -> AgentosResult<()>;
    /// Look up one task.
    async fn get(&self, id: TaskId) -> AgentosResult<Option<Task>>;
    /// All tasks of one submitter, newest first.
    async fn list_by_submitter(&self, submitter: &str) -> AgentosResult<Vec<Task>>;
    /// Every task not yet `completed` or `failed`, oldest first. Read once at
    /// startup to pick up work a previous process left behind.
    async fn list_unfinished(&self) -> AgentosResult<Vec<Task>>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether no task is stored.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> AgentosResult<()> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> AgentosResult<()> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: TaskId) -> AgentosResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_by_submitter(&self, submitter: &str) -> AgentosResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.submitter == submitter)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn list_unfinished(&self) -> AgentosResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}

/// File-based task store (one JSON file per task). Good enough for a single node.
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn new(dir: PathBuf) -> AgentosResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn task_path(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write(&self, task: &Task) -> AgentosResult<()> {
        let path = self.task_path(task.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(task)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read(&self, path: PathBuf) -> AgentosResult<Task> {
        let data = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&data).map_err(|e| {
            AgentosError::StoreUnavailable(format!(
                "failed to parse task record {}: {e}",
                path.display()
            ))
        })
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn create(&self, task: &Task) -> AgentosResult<()> {
        self.write(task).await
    }

    async fn update(&self, task: &Task) -> AgentosResult<()> {
        self.write(task).await
    }

    async fn get(&self, id: TaskId) -> AgentosResult<Option<Task>> {
        let path = self.task_path(id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        self.read(path).await.map(Some)
    }

    async fn list_by_submitter(&self, submitter: &str) -> AgentosResult<Vec<Task>> {
        let mut tasks = self.scan(|t| t.submitter == submitter).await?;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn list_unfinished(&self) -> AgentosResult<Vec<Task>> {
        let mut tasks = self.scan(|t| !t.is_terminal()).await?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}

impl FileTaskStore {
    /// Every readable record matching `keep`. Unreadable files are skipped.
    async fn scan<F>(&self, keep: F) -> AgentosResult<Vec<Task>>
    where
        F: Fn(&Task) -> bool + Send,
    {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if Uuid::parse_str(stem).is_err() {
                continue;
            }
            match self.read(entry.path()).await {
                Ok(task) if keep(&task) => tasks.push(task),
                Ok(_) => {}
                Err(e) => tracing::warn!(file = %name, error = %e, "Skipping unreadable task record"),
            }
        }
        Ok(tasks)
    }
}
