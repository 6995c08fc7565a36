use agentos_core::{AgentosError, AgentosResult, Capability, Task};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Failure reported by an agent attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// Worth retrying (upstream overloaded, connection reset, ...).
    #[error("transient agent error: {0}")]
    Transient(String),
    /// Retrying cannot help (bad input, refused request, ...).
    #[error("permanent agent error: {0}")]
    Permanent(String),
}

impl AgentError {
    /// A failure worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// A failure retrying cannot fix.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }
}

/// The processing logic behind one capability.
///
/// Implementations should watch `cancel` at their own await points; an attempt
/// that ignores it is still abandoned by the executor when it next yields.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Capability this agent serves.
    fn capability(&self) -> Capability;

    /// Process one attempt of `task`.
    async fn run(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, AgentError>;
}

/// One agent per capability.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<Capability, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent` under its capability, replacing any previous one.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> &mut Self {
        self.agents.insert(agent.capability(), agent);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    /// The agent registered for `capability`.
    pub fn get(&self, capability: Capability) -> Option<Arc<dyn Agent>> {
        self.agents.get(&capability).cloned()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Every capability must have an agent before workers can start.
    pub fn ensure_complete(&self) -> AgentosResult<()> {
        let missing: Vec<&str> = Capability::ALL
            .iter()
            .filter(|c| !self.agents.contains_key(*c))
            .map(|c| c.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgentosError::Config(format!(
                "no agent registered for: {}",
                missing.join(", ")
            )))
        }
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut capabilities: Vec<_> = self.agents.keys().collect();
        capabilities.sort();
        f.debug_struct("AgentRegistry")
            .field("capabilities", &capabilities)
            .finish()
    }
}
