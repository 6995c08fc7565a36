use crate::config::CapabilitiesConfig;
use agentos_core::{Capability, TaskErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Counters for one capability's worker pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityState {
    /// Pool the counters belong to.
    pub capability: Option<Capability>,
    /// Configured worker count.
    pub concurrency: usize,
    /// Tasks currently in `running`.
    pub running: usize,
    /// Highest `running` value observed.
    pub peak_running: usize,
    /// Tasks that completed.
    pub completed: u64,
    /// Tasks that failed for good, cancellations excluded.
    pub failed: u64,
    /// Tasks cancelled by their submitter.
    pub cancelled: u64,
    /// Attempts requeued after a transient failure.
    pub retries: u64,
    /// Attempts that overran the deadline.
    pub timeouts: u64,
    /// Total agent time spent on finished attempts.
    pub duration_ms: u64,
}

/// Engine-wide processing statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Tasks that reached a terminal status after running.
    pub tasks_processed: u64,
    /// Exponential moving average of successful processing time.
    pub avg_processing_time_ms: f64,
    /// Share of processed tasks that completed.
    pub success_rate: f64,
}

/// Point-in-time view returned by the metrics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Engine-wide averages, flattened into the top level.
    #[serde(flatten)]
    pub processing: ProcessingStats,
    /// Tasks waiting in the scheduler.
    pub queue_size: usize,
    /// Tasks assigned or running.
    pub active_tasks: usize,
    /// Submitters with a live rate bucket.
    pub tracked_submitters: usize,
    /// Tasks with notification history held by the hub.
    pub hub_topics: usize,
    /// Store writes that failed or timed out.
    pub store_failures: u64,
    /// One entry per capability pool.
    pub capabilities: Vec<CapabilityState>,
}

/// Tracks per-capability counters and overall processing statistics.
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<Capability, CapabilityState>>>,
    stats: Arc<RwLock<ProcessingStats>>,
}

impl AgentMonitor {
    /// Zeroed counters for every configured pool.
    pub fn new(capabilities: &CapabilitiesConfig) -> Self {
        let states = Capability::ALL
            .into_iter()
            .map(|capability| {
                (
                    capability,
                    CapabilityState {
                        capability: Some(capability),
                        concurrency: capabilities.get(capability).concurrency,
                        ..CapabilityState::default()
                    },
                )
            })
            .collect();
        Self {
            states: Arc::new(RwLock::new(states)),
            stats: Arc::new(RwLock::new(ProcessingStats::default())),
        }
    }

    /// A task of `capability` entered `running`.
    pub async fn start_task(&self, capability: Capability) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&capability) {
            state.running += 1;
            state.peak_running = state.peak_running.max(state.running);
        }
    }

    /// A task of `capability` left `running` (for any reason).
    pub async fn finish_task(&self, capability: Capability, duration_ms: u64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&capability) {
            state.running = state.running.saturating_sub(1);
            state.duration_ms += duration_ms;
        }
    }

    /// Record a retry; `timed_out` marks the attempt as a timeout.
    pub async fn record_retry(&self, capability: Capability, timed_out: bool) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&capability) {
            state.retries += 1;
            if timed_out {
                state.timeouts += 1;
            }
        }
    }

    /// Record a successful task and fold its time into the moving average.
    pub async fn record_completed(&self, capability: Capability, processing_ms: f64) {
        if let Some(state) = self.states.write().await.get_mut(&capability) {
            state.completed += 1;
        }
        self.update_stats(true, processing_ms).await;
    }

    /// Record a terminal failure.
    pub async fn record_failed(&self, capability: Capability, kind: TaskErrorKind) {
        if let Some(state) = self.states.write().await.get_mut(&capability) {
            match kind {
                TaskErrorKind::Cancelled => state.cancelled += 1,
                TaskErrorKind::Timeout => {
                    state.timeouts += 1;
                    state.failed += 1;
                }
                _ => state.failed += 1,
            }
        }
        self.update_stats(false, 0.0).await;
    }

    async fn update_stats(&self, success: bool, processing_ms: f64) {
        let mut stats = self.stats.write().await;
        stats.tasks_processed += 1;
        let n = stats.tasks_processed as f64;
        let hit = if success { 1.0 } else { 0.0 };
        stats.success_rate = (stats.success_rate * (n - 1.0) + hit) / n;
        if success {
            stats.avg_processing_time_ms = if stats.avg_processing_time_ms == 0.0 {
                processing_ms
            } else {
                stats.avg_processing_time_ms * 0.9 + processing_ms * 0.1
            };
        }
    }

    /// Get the state of a specific capability.
    pub async fn get_state(&self, capability: Capability) -> Option<CapabilityState> {
        self.states.read().await.get(&capability).cloned()
    }

    /// Snapshot of every capability, in [`Capability::ALL`] order.
    pub async fn snapshot(&self) -> Vec<CapabilityState> {
        let states = self.states.read().await;
        Capability::ALL
            .iter()
            .filter_map(|c| states.get(c).cloned())
            .collect()
    }

    /// Snapshot of the engine-wide statistics.
    pub async fn processing(&self) -> ProcessingStats {
        self.stats.read().await.clone()
    }

    /// Total tasks currently running across capabilities.
    pub async fn running(&self) -> usize {
        self.states.read().await.values().map(|s| s.running).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> AgentMonitor {
        AgentMonitor::new(&CapabilitiesConfig::default())
    }

    #[tokio::test]
    async fn test_initial_state() {
        let monitor = monitor();
        let states = monitor.snapshot().await;
        assert_eq!(states.len(), 5);
        assert_eq!(states[0].capability, Some(Capability::Planner));
        assert!(states.iter().all(|s| s.running == 0 && s.completed == 0));
        assert_eq!(monitor.processing().await, ProcessingStats::default());
    }

    #[tokio::test]
    async fn test_running_and_peak() {
        let monitor = monitor();
        monitor.start_task(Capability::Analyst).await;
        monitor.start_task(Capability::Analyst).await;
        monitor.finish_task(Capability::Analyst, 40).await;
        monitor.start_task(Capability::Analyst).await;

        let state = monitor.get_state(Capability::Analyst).await.unwrap();
        assert_eq!(state.running, 2);
        assert_eq!(state.peak_running, 2);
        assert_eq!(state.duration_ms, 40);
        assert_eq!(monitor.running().await, 2);
    }

    #[tokio::test]
    async fn test_success_rate_and_average() {
        let monitor = monitor();
        monitor.record_completed(Capability::Writer, 100.0).await;
        monitor.record_completed(Capability::Writer, 200.0).await;
        monitor
            .record_failed(Capability::Writer, TaskErrorKind::Permanent)
            .await;
        monitor
            .record_failed(Capability::Writer, TaskErrorKind::Cancelled)
            .await;

        let stats = monitor.processing().await;
        assert_eq!(stats.tasks_processed, 4);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert!((stats.avg_processing_time_ms - 110.0).abs() < 1e-9);

        let state = monitor.get_state(Capability::Writer).await.unwrap();
        assert_eq!(state.completed, 2);
        assert_eq!(state.failed, 1);
        assert_eq!(state.cancelled, 1);
    }

    #[tokio::test]
    async fn test_retries_count_timeouts() {
        let monitor = monitor();
        monitor.record_retry(Capability::Planner, true).await;
        monitor.record_retry(Capability::Planner, false).await;
        let state = monitor.get_state(Capability::Planner).await.unwrap();
        assert_eq!(state.retries, 2);
        assert_eq!(state.timeouts, 1);
    }
}
