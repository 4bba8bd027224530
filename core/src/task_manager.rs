pub mod default; // skipcq: RS-D1001

pub use default::DefaultTaskManager;

use crate::errors::ChronarchErrors;
use crate::job::Job;
use crate::task::ScheduledTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

#[allow(unused_imports)]
use crate::driver::ExecutionDriver;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// [`TaskManager`] is the external-facing sink the [`Scheduler`] hands minted tasks to.
/// It owns the pending queue the resource-manager driver drains, the engine treats it as
/// an opaque sink: tasks go in with a due instant or a delay, status callbacks come back
/// through the driver.
///
/// # Required Method(s)
/// When implementing the [`TaskManager`], one has to supply implementations for the
/// enqueue, delayed-schedule, cancel, flush, persist and lookup methods, plus
/// [`TaskManager::take_due`] which is the outlet the [`ExecutionDriver`] drains
///
/// # See Also
/// - [`DefaultTaskManager`]
/// - [`Scheduler`]
/// - [`ExecutionDriver`]
#[async_trait]
pub trait TaskManager: Send + Sync {
    /// Enqueues a task at its embedded due instant, ``high_priority`` tasks sort
    /// ahead of normal ones due at the same instant
    async fn enqueue(&self, task: ScheduledTask, high_priority: bool);

    /// Enqueues a task ``delay`` from now, used for one-shot retries
    async fn schedule_delayed(&self, task: ScheduledTask, delay: Duration);

    /// Writes the pending task through to the durable store, failures are
    /// logged by callers and retried on next use
    async fn persist_task(&self, task: &ScheduledTask) -> Result<(), ChronarchErrors>;

    /// Drops one pending task by id, from the queue and the durable store,
    /// performed when the task reaches a terminal state
    async fn remove_task(&self, task_id: &str);

    /// Drops every pending task of the supplied job, performed on deregistration
    async fn cancel_tasks(&self, job: &Job);

    /// Drops every pending task from the in-memory queue
    async fn flush(&self);

    /// Gets the remaining time until the pending task launches
    ///
    /// # Returns
    /// The non-negative remaining delay, or nothing when no pending task is
    /// registered under the id
    async fn time_until_execution(&self, task_id: &str) -> Option<Duration>;

    /// Drains every pending task due at or before ``now`` in launch order
    async fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledTask>;

    /// Gets the number of pending tasks
    async fn pending_count(&self) -> usize;

    /// Checks whether a pending task is registered under the supplied id
    async fn contains(&self, task_id: &str) -> bool;

    /// Gets a snapshot of every pending task
    async fn pending_tasks(&self) -> Vec<ScheduledTask>;
}

#[async_trait]
impl<TM: TaskManager + ?Sized> TaskManager for Arc<TM> {
    async fn enqueue(&self, task: ScheduledTask, high_priority: bool) {
        self.as_ref().enqueue(task, high_priority).await
    }

    async fn schedule_delayed(&self, task: ScheduledTask, delay: Duration) {
        self.as_ref().schedule_delayed(task, delay).await
    }

    async fn persist_task(&self, task: &ScheduledTask) -> Result<(), ChronarchErrors> {
        self.as_ref().persist_task(task).await
    }

    async fn remove_task(&self, task_id: &str) {
        self.as_ref().remove_task(task_id).await
    }

    async fn cancel_tasks(&self, job: &Job) {
        self.as_ref().cancel_tasks(job).await
    }

    async fn flush(&self) {
        self.as_ref().flush().await
    }

    async fn time_until_execution(&self, task_id: &str) -> Option<Duration> {
        self.as_ref().time_until_execution(task_id).await
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        self.as_ref().take_due(now).await
    }

    async fn pending_count(&self) -> usize {
        self.as_ref().pending_count().await
    }

    async fn contains(&self, task_id: &str) -> bool {
        self.as_ref().contains(task_id).await
    }

    async fn pending_tasks(&self) -> Vec<ScheduledTask> {
        self.as_ref().pending_tasks().await
    }
}
