use crate::errors::ChronarchErrors;
use crate::events::{JobEvent, JobObserver, ObserverError};
use crate::job::Job;
use crate::task::{TaskState, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[allow(unused_imports)]
use crate::events::ObserverRegistry;

/// [`RunState`] is the coarse per-job execution state the history sink tracks,
/// transitions never downgrade a running job back to queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No task of the job is queued or running
    Idle,
    /// A task of the job is waiting in the launch queue
    Queued,
    /// A task of the job is running on a worker node
    Running,
}

/// [`TaskHistoryRow`] is one appended record of task history, keyed by
/// ``(id, ts)`` in the backing columnar store
///
/// # See Also
/// - [`HistoryStore`]
/// - [`JobStats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistoryRow {
    /// The versioned task id
    pub id: String,

    /// The instant the row was appended
    pub ts: DateTime<Utc>,

    /// The name of the job the task executes
    pub job_name: String,

    /// The owner of the job at append time
    pub job_owner: String,

    /// The schedule expression, for schedule-based jobs
    pub job_schedule: Option<String>,

    /// The parent set, for dependency-based jobs
    pub job_parents: Option<BTreeSet<String>>,

    /// The reported task state
    pub task_state: TaskState,

    /// The worker node the task ran on
    pub slave_id: String,

    /// The free-form message accompanying the transition
    pub message: String,

    /// The execution attempt
    pub attempt: u32,

    /// Whether the transition counts as a failure
    pub is_failure: bool,
}

impl TaskHistoryRow {
    fn from_status(job: &Job, status: &TaskStatus, attempt: u32, ts: DateTime<Utc>) -> Self {
        Self {
            id: status.task_id.clone(),
            ts,
            job_name: job.name().to_owned(),
            job_owner: job.common().owner.clone(),
            job_schedule: job.as_schedule_based().map(|sched| sched.schedule.clone()),
            job_parents: job.as_dependency_based().map(|dep| dep.parents.clone()),
            task_state: status.state,
            slave_id: status.slave_id.clone(),
            message: status.message.clone(),
            attempt,
            is_failure: status.state.is_failure(),
        }
    }
}

/// [`HistoryStore`] is the seam to the external append-mostly columnar store task
/// history lands in, alongside a counter surface accumulating per-task element counts
/// for data-processing jobs.
///
/// # Usage Note(s)
/// Every operation is best-effort by contract: on failure the caller resets the
/// session, logs and proceeds, history unavailability never fails the engine
///
/// # See Also
/// - [`JobStats`]
/// - [`InMemoryHistoryStore`]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends one history row, keyed by ``(id, ts)``
    async fn append(&self, row: &TaskHistoryRow) -> Result<(), ChronarchErrors>;

    /// Checks whether any row of the supplied task id is present in the main table
    async fn contains_task(&self, task_id: &str) -> Result<bool, ChronarchErrors>;

    /// Accumulates ``delta`` into the element counter keyed by ``(job_name, task_id)``,
    /// idempotent on row presence, non-idempotent on the value
    async fn increment_elements(
        &self,
        job_name: &str,
        task_id: &str,
        delta: i64,
    ) -> Result<(), ChronarchErrors>;

    /// Tears down and re-establishes the store session after a connection loss
    async fn reset_session(&self);
}

/// [`InMemoryHistoryStore`] is an implementation of [`HistoryStore`] over process
/// memory, mostly meant to be used for demos and tests
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    rows: DashMap<String, Vec<TaskHistoryRow>>,
    counters: DashMap<(String, String), i64>,
}

impl InMemoryHistoryStore {
    /// Creates / Constructs a new, empty [`InMemoryHistoryStore`]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Gets every appended row of the supplied task id, in append order
    pub fn rows_for(&self, task_id: &str) -> Vec<TaskHistoryRow> {
        self.rows
            .get(task_id)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Gets the accumulated element count of ``(job_name, task_id)``
    pub fn elements_processed(&self, job_name: &str, task_id: &str) -> i64 {
        self.counters
            .get(&(job_name.to_owned(), task_id.to_owned()))
            .map(|count| *count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, row: &TaskHistoryRow) -> Result<(), ChronarchErrors> {
        self.rows.entry(row.id.clone()).or_default().push(row.clone());
        Ok(())
    }

    async fn contains_task(&self, task_id: &str) -> Result<bool, ChronarchErrors> {
        Ok(self.rows.contains_key(task_id))
    }

    async fn increment_elements(
        &self,
        job_name: &str,
        task_id: &str,
        delta: i64,
    ) -> Result<(), ChronarchErrors> {
        *self
            .counters
            .entry((job_name.to_owned(), task_id.to_owned()))
            .or_insert(0) += delta;
        Ok(())
    }

    async fn reset_session(&self) {}
}

/// [`JobStats`] is the history sink: a [`JobObserver`] maintaining the in-memory
/// per-job [`RunState`] map and appending one [`TaskHistoryRow`] per task transition
/// to the external [`HistoryStore`].
///
/// # Implementation Detail(s)
/// The state map is concurrent, status callbacks land on driver threads while the
/// engine broadcasts lifecycle events. The only guarded transition is the downgrade
/// ``Running -> Queued``, which is refused. Store failures reset the session and are
/// logged, the sink never propagates them
///
/// # Constructor(s)
/// When constructing a [`JobStats`], one supplies the backing history store through
/// [`JobStats::new`], then attaches the sink to an [`ObserverRegistry`]
///
/// # See Also
/// - [`HistoryStore`]
/// - [`JobObserver`]
pub struct JobStats {
    states: DashMap<String, RunState>,
    history: Arc<dyn HistoryStore>,
}

impl JobStats {
    /// Creates / Constructs a new [`JobStats`] sink over the supplied history store
    pub fn new(history: Arc<dyn HistoryStore>) -> Arc<Self> {
        Arc::new(Self {
            states: DashMap::new(),
            history,
        })
    }

    /// Gets the tracked [`RunState`] of the supplied job, [`RunState::Idle`]
    /// when untracked
    pub fn run_state(&self, job_name: &str) -> RunState {
        self.states
            .get(job_name)
            .map(|state| *state)
            .unwrap_or(RunState::Idle)
    }

    /// Marks a task of the job as waiting in the launch queue, refused while the
    /// job is already running
    pub fn mark_queued(&self, job_name: &str) {
        self.transition(job_name, RunState::Queued);
    }

    fn transition(&self, job_name: &str, next: RunState) {
        let mut entry = self.states.entry(job_name.to_owned()).or_insert(RunState::Idle);
        if *entry == RunState::Running && next == RunState::Queued {
            return;
        }
        *entry = next;
    }

    /// Accumulates processed-element counts for a data-processing task, conditionally:
    /// the increment only lands once a history row of the task exists in the main table
    pub async fn update_elements_processed(&self, job_name: &str, task_id: &str, elements: i64) {
        match self.history.contains_task(task_id).await {
            Ok(true) => {
                if let Err(error) = self
                    .history
                    .increment_elements(job_name, task_id, elements)
                    .await
                {
                    tracing::warn!(task_id, %error, "element counter update failed, resetting session");
                    self.history.reset_session().await;
                }
            }
            Ok(false) => {
                tracing::debug!(task_id, "no history row yet, dropping element count");
            }
            Err(error) => {
                tracing::warn!(task_id, %error, "history lookup failed, resetting session");
                self.history.reset_session().await;
            }
        }
    }

    async fn append_row(&self, row: TaskHistoryRow) {
        if let Err(error) = self.history.append(&row).await {
            tracing::warn!(task_id = %row.id, %error, "history append failed, resetting session");
            self.history.reset_session().await;
        }
    }
}

#[async_trait]
impl JobObserver for JobStats {
    async fn notify(&self, event: &JobEvent) -> Result<(), ObserverError> {
        let ts = Utc::now();
        match event {
            JobEvent::Registered { job } => {
                self.states
                    .entry(job.name().to_owned())
                    .or_insert(RunState::Idle);
            }
            JobEvent::Started {
                job,
                status,
                attempt,
            } => {
                self.transition(job.name(), RunState::Running);
                self.append_row(TaskHistoryRow::from_status(job, status, *attempt, ts))
                    .await;
            }
            JobEvent::Finished {
                job,
                status,
                attempt,
                ..
            } => {
                self.transition(job.name(), RunState::Idle);
                self.append_row(TaskHistoryRow::from_status(job, status, *attempt, ts))
                    .await;
            }
            JobEvent::Failed {
                job,
                job_name,
                status,
                attempt,
            } => {
                self.transition(job_name, RunState::Idle);
                if let Some(job) = job {
                    self.append_row(TaskHistoryRow::from_status(job, status, *attempt, ts))
                        .await;
                }
            }
            JobEvent::Removed { job } => {
                self.states.remove(job.name());
            }
            JobEvent::RetriesExhausted { .. }
            | JobEvent::Disabled { .. }
            | JobEvent::Skipped { .. } => {}
        }
        Ok(())
    }
}
