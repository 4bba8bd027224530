pub mod memory; // skipcq: RS-D1001

pub use memory::InMemoryStateStore;

use crate::clock::SchedulerClock;
use crate::errors::ChronarchErrors;
use crate::job::Job;
use crate::scheduler::Scheduler;
use crate::task::ScheduledTask;
use crate::task_manager::TaskManager;
use async_trait::async_trait;
use std::sync::Arc;

/// [`StateStore`] is the abstract durable store for jobs and pending tasks. The engine
/// reads it once per election during hydration and writes through on every job mutation
/// and task enqueue, so a failover replica can resume from the exact persisted state.
///
/// # Required Method(s)
/// When implementing the [`StateStore`], one has to supply implementations for the job
/// and task write/remove methods plus the two bulk loaders used during hydration
///
/// # Usage Note(s)
/// Write failures are transient by contract: callers log them and retry on next use,
/// only hydration treats store failures as fatal
///
/// # See Also
/// - [`InMemoryStateStore`]
/// - [`load_tasks`]
/// - [`load_jobs`]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Writes or overwrites the supplied job
    async fn persist_job(&self, job: &Job) -> Result<(), ChronarchErrors>;

    /// Deletes the supplied job
    async fn remove_job(&self, job: &Job) -> Result<(), ChronarchErrors>;

    /// Writes or overwrites the supplied pending task
    async fn persist_task(&self, task: &ScheduledTask) -> Result<(), ChronarchErrors>;

    /// Deletes the pending task registered under the supplied id
    async fn remove_task(&self, task_id: &str) -> Result<(), ChronarchErrors>;

    /// Loads every persisted job
    async fn load_jobs(&self) -> Result<Vec<Job>, ChronarchErrors>;

    /// Loads every persisted pending task
    async fn load_tasks(&self) -> Result<Vec<ScheduledTask>, ChronarchErrors>;
}

#[async_trait]
impl<S: StateStore + ?Sized> StateStore for Arc<S> {
    async fn persist_job(&self, job: &Job) -> Result<(), ChronarchErrors> {
        self.as_ref().persist_job(job).await
    }

    async fn remove_job(&self, job: &Job) -> Result<(), ChronarchErrors> {
        self.as_ref().remove_job(job).await
    }

    async fn persist_task(&self, task: &ScheduledTask) -> Result<(), ChronarchErrors> {
        self.as_ref().persist_task(task).await
    }

    async fn remove_task(&self, task_id: &str) -> Result<(), ChronarchErrors> {
        self.as_ref().remove_task(task_id).await
    }

    async fn load_jobs(&self) -> Result<Vec<Job>, ChronarchErrors> {
        self.as_ref().load_jobs().await
    }

    async fn load_tasks(&self) -> Result<Vec<ScheduledTask>, ChronarchErrors> {
        self.as_ref().load_tasks().await
    }
}

/// Restores every persisted pending task into the supplied [`TaskManager`].
///
/// Hydration order is a hard requirement: this loader must run before [`load_jobs`],
/// loading jobs first can schedule a due task before its pending-task state is restored,
/// producing a duplicate.
///
/// # Returns
/// The number of tasks restored, or [`ChronarchErrors::HydrationFailed`] when the
/// store cannot be read
pub async fn load_tasks(
    task_manager: &Arc<dyn TaskManager>,
    store: &Arc<dyn StateStore>,
) -> Result<usize, ChronarchErrors> {
    let tasks = store
        .load_tasks()
        .await
        .map_err(|error| ChronarchErrors::HydrationFailed(error.to_string()))?;

    let restored = tasks.len();
    for task in tasks {
        tracing::debug!(task_id = %task.id, "restoring pending task");
        task_manager.enqueue(task, false).await;
    }
    Ok(restored)
}

/// Restores every persisted job into the supplied [`Scheduler`], registering
/// without writing back to the store.
///
/// # Returns
/// The number of jobs restored, or [`ChronarchErrors::HydrationFailed`] when the store
/// cannot be read or a persisted job no longer admits registration
pub async fn load_jobs(
    scheduler: &Scheduler,
    store: &Arc<dyn StateStore>,
) -> Result<usize, ChronarchErrors> {
    let jobs = store
        .load_jobs()
        .await
        .map_err(|error| ChronarchErrors::HydrationFailed(error.to_string()))?;

    let restored = jobs.len();
    let now = scheduler.clock().now().await;
    scheduler
        .register_jobs(jobs, false, now)
        .await
        .map_err(|error| ChronarchErrors::HydrationFailed(error.to_string()))?;
    Ok(restored)
}
