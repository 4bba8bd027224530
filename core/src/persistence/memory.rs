use crate::errors::ChronarchErrors;
use crate::job::Job;
use crate::persistence::StateStore;
use crate::task::ScheduledTask;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// [`InMemoryStateStore`] is an implementation of [`StateStore`] that keeps the
/// serialized job and task payloads in process memory
///
/// # Usage Note(s)
/// While being fast, it makes the scheduler brittle to crashes and shutdowns, a
/// replicated backend should be preferred for real deployments. It is mostly meant
/// to be used for demos, tests and failover drills (where one doesn't care to
/// persist information outside the process)
///
/// # See Also
/// - [`StateStore`]
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    jobs: DashMap<String, Value>,
    tasks: DashMap<String, Value>,
}

impl InMemoryStateStore {
    /// Creates / Constructs a new, empty [`InMemoryStateStore`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of persisted jobs
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Gets the number of persisted pending tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Checks whether a pending task is persisted under the supplied id
    pub fn contains_task(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn persist_job(&self, job: &Job) -> Result<(), ChronarchErrors> {
        let payload = serde_json::to_value(job)
            .map_err(|error| ChronarchErrors::StoreFailed(error.to_string()))?;
        self.jobs.insert(job.name().to_owned(), payload);
        Ok(())
    }

    async fn remove_job(&self, job: &Job) -> Result<(), ChronarchErrors> {
        self.jobs.remove(job.name());
        Ok(())
    }

    async fn persist_task(&self, task: &ScheduledTask) -> Result<(), ChronarchErrors> {
        let payload = serde_json::to_value(task)
            .map_err(|error| ChronarchErrors::StoreFailed(error.to_string()))?;
        self.tasks.insert(task.id.clone(), payload);
        Ok(())
    }

    async fn remove_task(&self, task_id: &str) -> Result<(), ChronarchErrors> {
        self.tasks.remove(task_id);
        Ok(())
    }

    async fn load_jobs(&self) -> Result<Vec<Job>, ChronarchErrors> {
        self.jobs
            .iter()
            .map(|entry| {
                serde_json::from_value(entry.value().clone())
                    .map_err(|error| ChronarchErrors::StoreFailed(error.to_string()))
            })
            .collect()
    }

    async fn load_tasks(&self) -> Result<Vec<ScheduledTask>, ChronarchErrors> {
        self.tasks
            .iter()
            .map(|entry| {
                serde_json::from_value(entry.value().clone())
                    .map_err(|error| ChronarchErrors::StoreFailed(error.to_string()))
            })
            .collect()
    }
}
