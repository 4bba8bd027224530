use crate::errors::ChronarchErrors;
use crate::job::Job;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

#[allow(unused_imports)]
use crate::task_manager::TaskManager;

/// The version tag every task id of the current layout starts with, the parser
/// rejects identifiers carrying any other tag
pub const TASK_ID_VERSION: &str = "ct1";

/// Formats the versioned task id of one execution attempt, the layout is
/// ``version:job-name:due-instant-millis:attempt`` and the id is the sole key a task
/// is tracked by throughout its lifecycle
pub fn format_task_id(job_name: &str, due: DateTime<Utc>, attempt: u32) -> String {
    format!(
        "{}:{}:{}:{}",
        TASK_ID_VERSION,
        job_name,
        due.timestamp_millis(),
        attempt
    )
}

/// [`ParsedTaskId`] is the decoded form of a versioned task id, carrying the job name,
/// the due instant the id was minted for and the execution attempt number
///
/// # See Also
/// - [`parse_task_id`]
/// - [`ScheduledTask`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTaskId {
    /// The name of the job the task executes
    pub job_name: String,

    /// The instant the task was due, recovered from the id's millisecond field
    pub due: DateTime<Utc>,

    /// The execution attempt, ``0`` for the first launch
    pub attempt: u32,
}

/// Parses and validates a versioned task id
///
/// # Returns
/// The decoded [`ParsedTaskId`], or [`ChronarchErrors::TaskIdInvalid`] when the layout
/// does not match or the version tag is not the current one (callers drop such
/// identifiers silently rather than fail)
pub fn parse_task_id(id: &str) -> Result<ParsedTaskId, ChronarchErrors> {
    let invalid = || ChronarchErrors::TaskIdInvalid(id.to_owned());

    let parts: Vec<&str> = id.split(':').collect();
    let [version, job_name, millis, attempt] = parts.as_slice() else {
        return Err(invalid());
    };
    if *version != TASK_ID_VERSION || job_name.is_empty() {
        return Err(invalid());
    }

    let millis = millis.parse::<i64>().map_err(|_| invalid())?;
    let due = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(invalid)?;
    let attempt = attempt.parse::<u32>().map_err(|_| invalid())?;

    Ok(ParsedTaskId {
        job_name: (*job_name).to_owned(),
        due,
        attempt,
    })
}

/// [`ScheduledTask`] is one concrete execution attempt of a job, minted by the
/// [`Scheduler`], handed to the [`TaskManager`] and disposed once the attempt reaches a
/// terminal state. The id embeds everything the lifecycle needs to recover the task
///
/// # See Also
/// - [`format_task_id`]
/// - [`TaskManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// The versioned task id, the sole lifecycle key
    pub id: String,

    /// The instant the task is due to launch
    pub due: DateTime<Utc>,

    /// The name of the job the task executes
    pub job_name: String,

    /// The execution attempt, ``0`` for the first launch
    pub attempt: u32,
}

impl ScheduledTask {
    /// Creates / Constructs the [`ScheduledTask`] of one attempt of ``job``
    /// due at ``due``
    pub fn new(job: &Job, due: DateTime<Utc>, attempt: u32) -> Self {
        Self {
            id: format_task_id(job.name(), due, attempt),
            due,
            job_name: job.name().to_owned(),
            attempt,
        }
    }
}

/// [`TaskState`] is the execution state the resource-manager driver reports
/// for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// The task is running on a worker node
    Running,
    /// The task completed successfully
    Finished,
    /// The task terminated with a failure
    Failed,
    /// The task was killed on request
    Killed,
    /// The resource manager lost track of the task
    Lost,
}

impl TaskState {
    /// Checks whether the state counts as a failure in task history
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Killed | TaskState::Lost)
    }
}

/// [`TaskStatus`] is the inbound callback payload the resource-manager driver delivers
/// for each task state transition, fed into the [`Scheduler`] lifecycle handlers
///
/// # Constructor(s)
/// [`TaskStatus`] is constructed through [`TaskStatus::builder`], only ``task_id`` and
/// ``state`` are mandatory
///
/// # See Also
/// - [`TaskState`]
/// - [`Scheduler`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct TaskStatus {
    /// The versioned id of the task the status refers to
    #[builder(setter(into))]
    pub task_id: String,

    /// The reported execution state
    pub state: TaskState,

    /// The worker node the task ran on, empty when not reported
    #[builder(default, setter(into))]
    pub slave_id: String,

    /// A free-form message accompanying the transition
    #[builder(default, setter(into))]
    pub message: String,
}
