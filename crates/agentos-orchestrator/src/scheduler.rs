use agentos_core::{Capability, Priority, TaskId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// A task waiting in the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    /// Queued task.
    pub task_id: TaskId,
    /// Pool that will run it.
    pub capability: Capability,
    /// Priority assigned at submission (aging never rewrites it).
    pub priority: Priority,
    /// Global enqueue order, used for FIFO within a tier.
    pub seq: u64,
    /// When it entered the queue; aging counts from here.
    pub enqueued_at: Instant,
}

impl QueuedTask {
    /// Priority after aging: one tier per full `threshold` waited, capped at urgent.
    pub fn effective_priority(&self, now: Instant, threshold: Duration) -> Priority {
        if threshold.is_zero() {
            return self.priority;
        }
        let waited = now.saturating_duration_since(self.enqueued_at);
        let steps = waited.as_nanos() / threshold.as_nanos();
        self.priority.bumped(usize::try_from(steps).unwrap_or(usize::MAX))
    }
}

/// One queue per base tier; the index maps a task to its tier and sequence.
#[derive(Default)]
struct CapabilityQueue {
    tiers: [BTreeMap<u64, QueuedTask>; 4],
    index: HashMap<TaskId, (usize, u64)>,
}

impl CapabilityQueue {
    fn push(&mut self, entry: QueuedTask) {
        let tier = entry.priority.tier();
        self.index.insert(entry.task_id, (tier, entry.seq));
        self.tiers[tier].insert(entry.seq, entry);
    }

    /// Tasks within one base tier are already FIFO and share a tier offset,
    /// so only the head of each tier can be the winner.
    fn pop_best(&mut self, now: Instant, threshold: Duration) -> Option<QueuedTask> {
        let mut best: Option<(Priority, u64, usize)> = None;
        for (tier, queue) in self.tiers.iter().enumerate() {
            let Some(head) = queue.values().next() else {
                continue;
            };
            let effective = head.effective_priority(now, threshold);
            let better = match best {
                None => true,
                Some((p, seq, _)) => effective > p || (effective == p && head.seq < seq),
            };
            if better {
                best = Some((effective, head.seq, tier));
            }
        }
        let (_, seq, tier) = best?;
        let entry = self.tiers[tier].remove(&seq)?;
        self.index.remove(&entry.task_id);
        Some(entry)
    }

    fn remove(&mut self, task_id: TaskId) -> Option<QueuedTask> {
        let (tier, seq) = self.index.remove(&task_id)?;
        self.tiers[tier].remove(&seq)
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

struct Lane {
    queue: Mutex<CapabilityQueue>,
    notify: Notify,
}

/// Per-capability priority queues with FIFO tie-breaking and wait-time aging.
///
/// Every capability has its own lane (queue plus wake-up signal), so workers
/// of one capability never contend with another's.
pub struct PriorityScheduler {
    lanes: [Lane; 5],
    aging_threshold: Duration,
    next_seq: AtomicU64,
}

impl PriorityScheduler {
    /// An empty scheduler. A zero `aging_threshold` disables aging.
    pub fn new(aging_threshold: Duration) -> Self {
        Self {
            lanes: std::array::from_fn(|_| Lane {
                queue: Mutex::new(CapabilityQueue::default()),
                notify: Notify::new(),
            }),
            aging_threshold,
            next_seq: AtomicU64::new(0),
        }
    }

    fn lane(&self, capability: Capability) -> &Lane {
        &self.lanes[capability as usize]
    }

    /// Add a task and wake one idle worker of its capability.
    pub fn enqueue(&self, task_id: TaskId, capability: Capability, priority: Priority) -> u64 {
        self.enqueue_at(task_id, capability, priority, Instant::now())
    }

    pub(crate) fn enqueue_at(
        &self,
        task_id: TaskId,
        capability: Capability,
        priority: Priority,
        now: Instant,
    ) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let lane = self.lane(capability);
        lane.queue.lock().push(QueuedTask {
            task_id,
            capability,
            priority,
            seq,
            enqueued_at: now,
        });
        lane.notify.notify_one();
        seq
    }

    /// Take the highest effective-priority task of the capability; the older
    /// enqueue wins ties.
    pub fn dequeue_next(&self, capability: Capability) -> Option<QueuedTask> {
        self.dequeue_next_at(capability, Instant::now())
    }

    pub(crate) fn dequeue_next_at(&self, capability: Capability, now: Instant) -> Option<QueuedTask> {
        self.lane(capability)
            .queue
            .lock()
            .pop_best(now, self.aging_threshold)
    }

    /// Remove a waiting task. Returns `None` if a worker already took it.
    pub fn remove(&self, task_id: TaskId, capability: Capability) -> Option<QueuedTask> {
        self.lane(capability).queue.lock().remove(task_id)
    }

    /// Resolves when work may be available for `capability`.
    ///
    /// A permit is stored if nobody is waiting, so an enqueue racing a worker
    /// that just found the queue empty is not lost.
    pub fn wait_for_work(&self, capability: Capability) -> Notified<'_> {
        self.lane(capability).notify.notified()
    }

    /// Wake every worker of every capability (used on shutdown).
    pub fn wake_all(&self) {
        for lane in &self.lanes {
            lane.notify.notify_waiters();
        }
    }

    /// Tasks currently waiting, across all capabilities.
    pub fn len(&self) -> usize {
        self.lanes.iter().map(|l| l.queue.lock().len()).sum()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks waiting for one capability.
    pub fn len_for(&self, capability: Capability) -> usize {
        self.lane(capability).queue.lock().len()
    }
}
