use agentos_orchestrator::OrchestratorConfig;
use agentos_store::{FileTaskStore, InMemoryTaskStore, TaskStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Contents of `agentos.toml`. Every section is optional.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentosConfig {
    /// Where the file store keeps task records.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for AgentosConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            store: StoreConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// Listen address of the gateway.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// API keys accepted by the gateway; empty disables the gate.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
}

/// Task store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Lost on exit.
    Memory,
    /// One JSON file per task under `data_dir`.
    #[default]
    File,
}

/// Store selection.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}

impl AgentosConfig {
    /// Read and validate a config file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::parse(&raw).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            }
        };
        config.orchestrator.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// The task store this config asks for.
    pub async fn open_store(&self) -> anyhow::Result<Arc<dyn TaskStore>> {
        Ok(match self.store.kind {
            StoreKind::Memory => Arc::new(InMemoryTaskStore::new()),
            StoreKind::File => Arc::new(FileTaskStore::new(self.data_dir.join("tasks")).await?),
        })
    }
}
