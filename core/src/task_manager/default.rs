use crate::clock::SchedulerClock;
use crate::errors::ChronarchErrors;
use crate::job::Job;
use crate::persistence::StateStore;
use crate::task::ScheduledTask;
use crate::task_manager::TaskManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::Mutex;

struct QueuedTask {
    task: ScheduledTask,
    due: DateTime<Utc>,
    high_priority: bool,
    seq: u64,
}

impl Eq for QueuedTask {}

impl PartialEq<Self> for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd<Self> for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.high_priority.cmp(&other.high_priority).reverse())
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// [`DefaultTaskManager`] is an implementation of [`TaskManager`] backed by an in-memory
/// delay queue (a min-heap over due instants) with a concurrent id-index, writing pending
/// tasks through to a [`StateStore`] so a failover replica can restore them.
///
/// # Implementation Detail(s)
/// Cancellation is lazy: cancelled ids are dropped from the index immediately and the
/// stale heap entries are skipped when they surface in [`TaskManager::take_due`]. Tasks
/// due at the same instant launch high-priority first, then in enqueue order
///
/// # Constructor(s)
/// When constructing a new [`DefaultTaskManager`], one supplies the shared clock and
/// state store through [`DefaultTaskManager::new`]
///
/// # See Also
/// - [`TaskManager`]
/// - [`StateStore`]
pub struct DefaultTaskManager {
    queue: Mutex<BinaryHeap<Reverse<QueuedTask>>>,
    index: DashMap<String, ScheduledTask>,
    seq: AtomicU64,
    clock: Arc<dyn SchedulerClock>,
    store: Arc<dyn StateStore>,
}

impl DefaultTaskManager {
    /// Creates / Constructs a new [`DefaultTaskManager`] over the supplied clock
    /// and state store
    ///
    /// # Returns
    /// The newly constructed [`DefaultTaskManager`] wrapped in an ``Arc``
    pub fn new(clock: Arc<dyn SchedulerClock>, store: Arc<dyn StateStore>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(BinaryHeap::new()),
            index: DashMap::new(),
            seq: AtomicU64::new(0),
            clock,
            store,
        })
    }

    async fn push(&self, task: ScheduledTask, due: DateTime<Utc>, high_priority: bool) {
        self.index.insert(task.id.clone(), task.clone());
        let entry = QueuedTask {
            task,
            due,
            high_priority,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
        };
        self.queue.lock().await.push(Reverse(entry));
    }
}

#[async_trait]
impl TaskManager for DefaultTaskManager {
    async fn enqueue(&self, task: ScheduledTask, high_priority: bool) {
        let due = task.due;
        self.push(task, due, high_priority).await;
    }

    async fn schedule_delayed(&self, task: ScheduledTask, delay: Duration) {
        let due = self.clock.now().await + delay;
        self.push(task, due, false).await;
    }

    async fn persist_task(&self, task: &ScheduledTask) -> Result<(), ChronarchErrors> {
        self.store.persist_task(task).await
    }

    async fn remove_task(&self, task_id: &str) {
        self.index.remove(task_id);
        if let Err(error) = self.store.remove_task(task_id).await {
            tracing::warn!(task_id, %error, "failed to remove persisted task");
        }
    }

    async fn cancel_tasks(&self, job: &Job) {
        let cancelled: Vec<String> = self
            .index
            .iter()
            .filter(|entry| entry.value().job_name == job.name())
            .map(|entry| entry.key().clone())
            .collect();
        for task_id in cancelled {
            self.remove_task(&task_id).await;
        }
    }

    async fn flush(&self) {
        self.queue.lock().await.clear();
        self.index.clear();
    }

    async fn time_until_execution(&self, task_id: &str) -> Option<Duration> {
        let task = self.index.get(task_id).map(|entry| entry.value().clone())?;
        let now = self.clock.now().await;
        Some((task.due - now).to_std().unwrap_or(Duration::ZERO))
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let mut queue = self.queue.lock().await;
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = queue.peek() {
            if entry.due > now {
                break;
            }
            let Some(Reverse(entry)) = queue.pop() else {
                break;
            };
            if self.index.remove(&entry.task.id).is_some() {
                due.push(entry.task);
            }
        }
        due
    }

    async fn pending_count(&self) -> usize {
        self.index.len()
    }

    async fn contains(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    async fn pending_tasks(&self) -> Vec<ScheduledTask> {
        self.index.iter().map(|entry| entry.value().clone()).collect()
    }
}
