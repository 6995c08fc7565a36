use agentos_core::{Delivery, TaskEvent, TaskId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

/// Unique id of one subscription.
pub type SubscriptionId = u64;

/// Buffer sizes and retention for the notification hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Recent events kept per task and replayed to late subscribers.
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    /// Undelivered events buffered per subscriber before the oldest is dropped.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// Terminal topics without subscribers are swept after this long.
    #[serde(default = "default_terminal_retention_secs")]
    pub terminal_retention_secs: u64,
}

fn default_replay_capacity() -> usize {
    32
}
fn default_outbox_capacity() -> usize {
    64
}
fn default_terminal_retention_secs() -> u64 {
    300
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            replay_capacity: default_replay_capacity(),
            outbox_capacity: default_outbox_capacity(),
            terminal_retention_secs: default_terminal_retention_secs(),
        }
    }
}

impl HubConfig {
    /// `terminal_retention_secs` as a duration.
    pub fn terminal_retention(&self) -> Duration {
        Duration::from_secs(self.terminal_retention_secs)
    }
}

struct OutboxState {
    queue: VecDeque<TaskEvent>,
    missed: u64,
    closed: bool,
}

/// Bounded per-subscriber buffer. A slow reader loses its oldest events and
/// is told how many with a [`Delivery::Gap`]; the publisher never blocks.
struct Outbox {
    task_id: TaskId,
    capacity: usize,
    state: Mutex<OutboxState>,
    notify: Notify,
}

impl Outbox {
    fn new(task_id: TaskId, capacity: usize) -> Self {
        Self {
            task_id,
            capacity: capacity.max(1),
            state: Mutex::new(OutboxState {
                queue: VecDeque::new(),
                missed: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Returns `false` once the subscriber is gone.
    fn push(&self, event: TaskEvent) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if state.queue.len() >= self.capacity {
                state.queue.pop_front();
                state.missed += 1;
            }
            state.queue.push_back(event);
        }
        self.notify.notify_one();
        true
    }

    fn try_take(&self) -> Option<Delivery> {
        let mut state = self.state.lock();
        if state.missed > 0 {
            let missed = std::mem::take(&mut state.missed);
            return Some(Delivery::Gap {
                task_id: self.task_id,
                missed,
            });
        }
        state.queue.pop_front().map(Delivery::Event)
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }
}

/// A live feed of one task's status events.
///
/// Dropping the subscription detaches it from the hub.
pub struct Subscription {
    id: SubscriptionId,
    task_id: TaskId,
    outbox: Arc<Outbox>,
}

impl Subscription {
    /// Hub-assigned id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Task being followed.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Next delivery without waiting.
    pub fn try_recv(&self) -> Option<Delivery> {
        self.outbox.try_take()
    }

    /// Wait for the next delivery. Returns `None` once the subscription has
    /// been closed and everything buffered has been read.
    pub async fn recv(&self) -> Option<Delivery> {
        loop {
            let notified = self.outbox.notify.notified();
            if let Some(delivery) = self.outbox.try_take() {
                return Some(delivery);
            }
            if self.outbox.is_closed() {
                return None;
            }
            notified.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.outbox.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("task_id", &self.task_id)
            .finish()
    }
}

#[derive(Default)]
struct Topic {
    replay: VecDeque<TaskEvent>,
    subscribers: Vec<(SubscriptionId, Arc<Outbox>)>,
    terminal_at: Option<Instant>,
}

impl Topic {
    fn record(&mut self, event: &TaskEvent, replay_capacity: usize) {
        if self.replay.len() >= replay_capacity {
            self.replay.pop_front();
        }
        self.replay.push_back(event.clone());
        if event.is_terminal() {
            self.terminal_at = Some(Instant::now());
        }
    }

    fn live_subscribers(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|(_, outbox)| !outbox.is_closed())
            .count()
    }
}

/// Per-task publish/subscribe fan-out of status events.
///
/// Each task has its own topic lock, so publishing for one task never waits
/// on another. Subscribing seeds the new outbox from the replay buffer under
/// the same lock publishers take, so a subscriber sees every event from the
/// replay onward exactly once and in order.
pub struct NotificationHub {
    config: HubConfig,
    topics: RwLock<HashMap<TaskId, Arc<Mutex<Topic>>>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    /// An empty hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn topic(&self, task_id: TaskId) -> Arc<Mutex<Topic>> {
        if let Some(topic) = self.topics.read().get(&task_id) {
            return topic.clone();
        }
        self.topics.write().entry(task_id).or_default().clone()
    }

    /// Deliver an event to every current subscriber of its task and record it
    /// for replay. Returns the number of subscribers reached.
    pub fn publish(&self, event: TaskEvent) -> usize {
        let topic = self.topic(event.task_id);
        let mut topic = topic.lock();
        topic.record(&event, self.config.replay_capacity);
        topic
            .subscribers
            .retain(|(_, outbox)| outbox.push(event.clone()));
        topic.subscribers.len()
    }

    /// Subscribe to a task's events, starting with its replay buffer.
    pub fn subscribe(&self, task_id: TaskId) -> Subscription {
        self.subscribe_seeded(task_id, None)
    }

    /// Like [`subscribe`](Self::subscribe), but if the hub holds no history for
    /// the task (its topic was swept or acknowledged away) `seed` becomes the
    /// replay buffer.
    pub fn subscribe_seeded(&self, task_id: TaskId, seed: Option<TaskEvent>) -> Subscription {
        let topic = self.topic(task_id);
        let mut topic = topic.lock();
        if topic.replay.is_empty() {
            if let Some(seed) = seed {
                topic.record(&seed, self.config.replay_capacity);
            }
        }

        let outbox = Arc::new(Outbox::new(task_id, self.config.outbox_capacity));
        for event in &topic.replay {
            outbox.push(event.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        topic.subscribers.push((id, outbox.clone()));
        debug!(task_id = %task_id, subscription = id, replayed = topic.replay.len(), "Subscribed");

        Subscription {
            id,
            task_id,
            outbox,
        }
    }

    /// Detach a subscription. Its pending events stay readable.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.outbox.close();
        self.detach(subscription.task_id, subscription.id);
    }

    /// Confirm receipt of the terminal event. Only valid once the task is
    /// terminal; closes the subscription and releases the topic if nobody
    /// else is listening.
    pub fn acknowledge(&self, subscription: &Subscription) -> bool {
        let Some(topic) = self.topics.read().get(&subscription.task_id).cloned() else {
            return false;
        };
        if topic.lock().terminal_at.is_none() {
            return false;
        }
        subscription.outbox.close();
        self.detach(subscription.task_id, subscription.id);
        true
    }

    fn detach(&self, task_id: TaskId, id: SubscriptionId) {
        let Some(topic) = self.topics.read().get(&task_id).cloned() else {
            return;
        };
        let release = {
            let mut topic = topic.lock();
            topic
                .subscribers
                .retain(|(sid, outbox)| *sid != id && !outbox.is_closed());
            topic.terminal_at.is_some() && topic.subscribers.is_empty()
        };
        if release {
            let mut topics = self.topics.write();
            if topics
                .get(&task_id)
                .is_some_and(|current| Arc::ptr_eq(current, &topic))
            {
                topics.remove(&task_id);
                debug!(task_id = %task_id, "Released terminal topic");
            }
        }
    }

    /// Drop terminal topics nobody is listening to once they are older than
    /// the configured retention. Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.sweep_older_than(self.config.terminal_retention())
    }

    pub(crate) fn sweep_older_than(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let mut topics = self.topics.write();
        let before = topics.len();
        topics.retain(|_, topic| {
            let mut topic = topic.lock();
            topic.subscribers.retain(|(_, outbox)| !outbox.is_closed());
            match topic.terminal_at {
                Some(at) => {
                    !topic.subscribers.is_empty() || now.saturating_duration_since(at) < retention
                }
                None => true,
            }
        });
        before - topics.len()
    }

    /// Number of tasks the hub currently holds history for.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Live subscribers of one task.
    pub fn subscriber_count(&self, task_id: TaskId) -> usize {
        self.topics
            .read()
            .get(&task_id)
            .map(|t| t.lock().live_subscribers())
            .unwrap_or(0)
    }
}
