use crate::hub::HubConfig;
use agentos_core::{AgentosError, AgentosResult, Capability};
use agentos_security::AdmissionConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Tuning for the whole engine. Every field has a default so a partial TOML
/// table is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum task text length, in characters, after trimming.
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
    /// Retryable failures allowed per task before it fails for good.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff between retries of transient failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Wait time after which a queued task is bumped one priority tier.
    /// Zero disables aging.
    #[serde(default = "default_aging_threshold_ms")]
    pub aging_threshold_ms: u64,
    /// Total queued tasks above which new submissions are refused.
    #[serde(default = "default_queue_soft_cap")]
    pub queue_soft_cap: usize,
    /// Deadline for a single task store call.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// How long terminal tasks stay in memory before only the store has them.
    #[serde(default = "default_ledger_retention_secs")]
    pub ledger_retention_secs: u64,
    /// Period of the housekeeping loop (hub sweep, bucket cleanup, eviction).
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    /// Rate buckets idle for longer than this are dropped.
    #[serde(default = "default_bucket_idle_secs")]
    pub bucket_idle_secs: u64,
    /// Per-submitter token buckets.
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Status event fan-out buffers.
    #[serde(default)]
    pub hub: HubConfig,
    /// Worker pools, one per capability.
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

fn default_max_input_length() -> usize {
    5_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_aging_threshold_ms() -> u64 {
    30_000
}
fn default_queue_soft_cap() -> usize {
    10_000
}
fn default_store_timeout_ms() -> u64 {
    5_000
}
fn default_ledger_retention_secs() -> u64 {
    3_600
}
fn default_maintenance_interval_secs() -> u64 {
    60
}
fn default_bucket_idle_secs() -> u64 {
    600
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_input_length: default_max_input_length(),
            max_retries: default_max_retries(),
            retry: RetryPolicy::default(),
            aging_threshold_ms: default_aging_threshold_ms(),
            queue_soft_cap: default_queue_soft_cap(),
            store_timeout_ms: default_store_timeout_ms(),
            ledger_retention_secs: default_ledger_retention_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            bucket_idle_secs: default_bucket_idle_secs(),
            admission: AdmissionConfig::default(),
            hub: HubConfig::default(),
            capabilities: CapabilitiesConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> AgentosResult<()> {
        if self.max_input_length == 0 {
            return Err(AgentosError::Config(
                "max_input_length must be at least 1".into(),
            ));
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(AgentosError::Config(format!(
                "retry.backoff_base_ms ({}) exceeds retry.backoff_max_ms ({})",
                self.retry.backoff_base_ms, self.retry.backoff_max_ms
            )));
        }
        if self.admission.capacity < 1.0 || self.admission.refill_per_sec < 0.0 {
            return Err(AgentosError::Config(
                "admission.capacity must be >= 1 and admission.refill_per_sec >= 0".into(),
            ));
        }
        if self.hub.replay_capacity == 0 || self.hub.outbox_capacity == 0 {
            return Err(AgentosError::Config(
                "hub.replay_capacity and hub.outbox_capacity must be at least 1".into(),
            ));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(AgentosError::Config(
                "maintenance_interval_secs must be at least 1".into(),
            ));
        }
        for capability in Capability::ALL {
            let cap = self.capabilities.get(capability);
            if cap.concurrency == 0 {
                return Err(AgentosError::Config(format!(
                    "capabilities.{capability}.concurrency must be at least 1"
                )));
            }
            if cap.timeout_ms == 0 {
                return Err(AgentosError::Config(format!(
                    "capabilities.{capability}.timeout_ms must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// `aging_threshold_ms` as a duration.
    pub fn aging_threshold(&self) -> Duration {
        Duration::from_millis(self.aging_threshold_ms)
    }

    /// `store_timeout_ms` as a duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// `ledger_retention_secs` as a duration.
    pub fn ledger_retention(&self) -> Duration {
        Duration::from_secs(self.ledger_retention_secs)
    }

    /// `maintenance_interval_secs` as a duration.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// `bucket_idle_secs` as a duration.
    pub fn bucket_idle(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_secs)
    }
}

/// Exponential backoff applied to transient agent failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt`
    /// (zero-based), doubling per attempt and capped at `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Worker count and deadline for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Maximum tasks of this capability running at once.
    pub concurrency: usize,
    /// Deadline for a single agent attempt.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    120_000
}

impl CapabilityConfig {
    /// Settings for `concurrency` workers with a per-attempt `timeout`.
    pub fn new(concurrency: usize, timeout: Duration) -> Self {
        Self {
            concurrency,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// `timeout_ms` as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-capability settings, one TOML table each. A table only needs the
/// keys it changes; the rest keep that capability's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Decomposition and scheduling requests.
    #[serde(default = "default_planner", deserialize_with = "planner_table")]
    pub planner: CapabilityConfig,
    /// Information gathering.
    #[serde(default = "default_researcher", deserialize_with = "researcher_table")]
    pub researcher: CapabilityConfig,
    /// Data analysis.
    #[serde(default = "default_analyst", deserialize_with = "analyst_table")]
    pub analyst: CapabilityConfig,
    /// Content generation.
    #[serde(default = "default_writer", deserialize_with = "writer_table")]
    pub writer: CapabilityConfig,
    /// Anything the classifier could not place.
    #[serde(default = "default_general", deserialize_with = "general_table")]
    pub general: CapabilityConfig,
}

/// A capability table as written, before defaults are filled in.
#[derive(Deserialize)]
struct CapabilityTable {
    concurrency: Option<usize>,
    timeout_ms: Option<u64>,
}

fn overlay<'de, D>(deserializer: D, base: CapabilityConfig) -> Result<CapabilityConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let table = CapabilityTable::deserialize(deserializer)?;
    Ok(CapabilityConfig {
        concurrency: table.concurrency.unwrap_or(base.concurrency),
        timeout_ms: table.timeout_ms.unwrap_or(base.timeout_ms),
    })
}

fn planner_table<'de, D: Deserializer<'de>>(d: D) -> Result<CapabilityConfig, D::Error> {
    overlay(d, default_planner())
}
fn researcher_table<'de, D: Deserializer<'de>>(d: D) -> Result<CapabilityConfig, D::Error> {
    overlay(d, default_researcher())
}
fn analyst_table<'de, D: Deserializer<'de>>(d: D) -> Result<CapabilityConfig, D::Error> {
    overlay(d, default_analyst())
}
fn writer_table<'de, D: Deserializer<'de>>(d: D) -> Result<CapabilityConfig, D::Error> {
    overlay(d, default_writer())
}
fn general_table<'de, D: Deserializer<'de>>(d: D) -> Result<CapabilityConfig, D::Error> {
    overlay(d, default_general())
}

fn default_planner() -> CapabilityConfig {
    CapabilityConfig::new(2, Duration::from_secs(120))
}
fn default_researcher() -> CapabilityConfig {
    CapabilityConfig::new(4, Duration::from_secs(300))
}
fn default_analyst() -> CapabilityConfig {
    CapabilityConfig::new(2, Duration::from_secs(180))
}
fn default_writer() -> CapabilityConfig {
    CapabilityConfig::new(4, Duration::from_secs(120))
}
fn default_general() -> CapabilityConfig {
    CapabilityConfig::new(8, Duration::from_secs(60))
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            planner: default_planner(),
            researcher: default_researcher(),
            analyst: default_analyst(),
            writer: default_writer(),
            general: default_general(),
        }
    }
}

impl CapabilitiesConfig {
    /// Settings for one capability.
    pub fn get(&self, capability: Capability) -> &CapabilityConfig {
        match capability {
            Capability::Planner => &self.planner,
            Capability::Researcher => &self.researcher,
            Capability::Analyst => &self.analyst,
            Capability::Writer => &self.writer,
            Capability::General => &self.general,
        }
    }

    /// Mutable settings for one capability.
    pub fn get_mut(&mut self, capability: Capability) -> &mut CapabilityConfig {
        match capability {
            Capability::Planner => &mut self.planner,
            Capability::Researcher => &mut self.researcher,
            Capability::Analyst => &mut self.analyst,
            Capability::Writer => &mut self.writer,
            Capability::General => &mut self.general,
        }
    }

    /// Set the same worker count and deadline on every capability.
    pub fn uniform(concurrency: usize, timeout: Duration) -> Self {
        let cap = CapabilityConfig::new(concurrency, timeout);
        Self {
            planner: cap,
            researcher: cap,
            analyst: cap,
            writer: cap,
            general: cap,
        }
    }
}
