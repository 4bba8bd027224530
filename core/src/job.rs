use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use typed_builder::TypedBuilder;

#[allow(unused_imports)]
use crate::graph::JobGraph;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// The default per-job tolerance for how late a firing may still be dispatched,
/// used when a job does not configure its own epsilon
pub const DEFAULT_EPSILON: Duration = Duration::from_secs(60);

/// [`JobCommon`] is the record of attributes shared by every job variant, regardless of
/// whether the job fires on a time schedule or on the completion of its parents.
///
/// # Constructor(s)
/// [`JobCommon`] is constructed through [`JobCommon::builder`], only ``name`` and
/// ``command`` are mandatory, every other attribute carries a default
///
/// # Usage Note(s)
/// The ``name`` acts as the unique identifier of a job across the whole cluster and is
/// baked into every task id derived from the job, renaming a job in place is unsupported
/// (deregister and register afresh instead)
///
/// # See Also
/// - [`Job`]
/// - [`ScheduleBasedJob`]
/// - [`DependencyBasedJob`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct JobCommon {
    /// The unique identifier of the job
    #[builder(setter(into))]
    pub name: String,

    /// The command handed to the resource manager when a task of this job launches
    #[builder(setter(into))]
    pub command: String,

    /// The owner of the job, typically an e-mail address notified by side channels
    #[builder(default, setter(into))]
    pub owner: String,

    /// Tolerance for how late a firing may be and still be dispatched, firings older
    /// than ``now - epsilon`` are skipped instead of dispatched
    #[builder(default = DEFAULT_EPSILON)]
    pub epsilon: Duration,

    /// How many times a failed task may be retried before the failure is terminal
    #[builder(default)]
    pub retries: u32,

    /// A disabled job keeps its vertex and history but never fires
    #[builder(default)]
    pub disabled: bool,

    /// When set, a failed task still triggers dependent children as if it succeeded
    #[builder(default)]
    pub soft_error: bool,

    /// When set, tasks of this job sort ahead of normal ones due at the same instant
    #[builder(default)]
    pub high_priority: bool,

    /// When set, the executor reports completion asynchronously rather than on exit
    #[builder(default)]
    pub is_async: bool,

    /// Marks jobs whose tasks report per-element progress counters
    #[builder(default)]
    pub data_processing_job_type: bool,

    /// Number of task completions recorded for this job
    #[builder(default)]
    pub success_count: u64,

    /// Number of terminal task failures recorded for this job
    #[builder(default)]
    pub error_count: u64,

    /// Number of terminal task failures since the last recorded success
    #[builder(default)]
    pub errors_since_last_success: u64,

    /// Wall-clock instant of the last recorded success, empty when unset
    #[builder(default)]
    pub last_success: Option<DateTime<Utc>>,

    /// Wall-clock instant of the last recorded terminal failure, empty when unset
    #[builder(default)]
    pub last_error: Option<DateTime<Utc>>,
}

/// [`ScheduleBasedJob`] is the job variant that fires on a time recurrence, expressed as an
/// ISO-8601 repeating interval ``Rn/start-instant/period`` together with an optional named
/// time zone resolving naive start instants
///
/// # See Also
/// - [`Job`]
/// - [`JobCommon`]
/// - [`crate::schedule::ScheduleStream`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct ScheduleBasedJob {
    /// The shared job record
    pub common: JobCommon,

    /// The ISO-8601 repeating interval expression, rewritten in place as
    /// recurrences are consumed
    #[builder(setter(into))]
    pub schedule: String,

    /// An optional IANA time-zone name the schedule's naive start instants
    /// are resolved in
    #[builder(default, setter(strip_option, into))]
    pub schedule_time_zone: Option<String>,
}

/// [`DependencyBasedJob`] is the job variant that fires when every job in ``parents``
/// has completed in the current round
///
/// # See Also
/// - [`Job`]
/// - [`JobCommon`]
/// - [`JobGraph::get_executable_children`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct DependencyBasedJob {
    /// The shared job record
    pub common: JobCommon,

    /// The unordered set of parent job names, all of which must complete
    /// before this job fires
    pub parents: BTreeSet<String>,
}

/// [`Job`] is the tagged variant over the two kinds of user-defined work the scheduler
/// accepts, either fired by a time recurrence ([`ScheduleBasedJob`]) or by the completion
/// of all parents ([`DependencyBasedJob`]). A job is exactly one of the two, never both.
///
/// # Implementation Detail(s)
/// The engine dispatches on the variant rather than on an open hierarchy, both variants
/// share the [`JobCommon`] record, as such most call sites go through the
/// [`Job::common`] / [`Job::common_mut`] accessors
///
/// # See Also
/// - [`JobCommon`]
/// - [`Scheduler`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// A job fired by an ISO-8601 repeating interval
    ScheduleBased(ScheduleBasedJob),
    /// A job fired by the completion of all its parents
    DependencyBased(DependencyBasedJob),
}

impl From<ScheduleBasedJob> for Job {
    fn from(job: ScheduleBasedJob) -> Self {
        Job::ScheduleBased(job)
    }
}

impl From<DependencyBasedJob> for Job {
    fn from(job: DependencyBasedJob) -> Self {
        Job::DependencyBased(job)
    }
}

impl Job {
    /// Gets the shared [`JobCommon`] record of either variant
    pub fn common(&self) -> &JobCommon {
        match self {
            Job::ScheduleBased(job) => &job.common,
            Job::DependencyBased(job) => &job.common,
        }
    }

    /// Gets the shared [`JobCommon`] record of either variant, mutably
    pub fn common_mut(&mut self) -> &mut JobCommon {
        match self {
            Job::ScheduleBased(job) => &mut job.common,
            Job::DependencyBased(job) => &mut job.common,
        }
    }

    /// Gets the unique name of the job
    pub fn name(&self) -> &str {
        &self.common().name
    }

    /// Checks whether the job is currently disabled
    pub fn is_disabled(&self) -> bool {
        self.common().disabled
    }

    /// Checks whether the job is the schedule-based variant
    pub fn is_schedule_based(&self) -> bool {
        matches!(self, Job::ScheduleBased(_))
    }

    /// Checks whether the job is the dependency-based variant
    pub fn is_dependency_based(&self) -> bool {
        matches!(self, Job::DependencyBased(_))
    }

    /// Gets the schedule-based payload, if the job is that variant
    pub fn as_schedule_based(&self) -> Option<&ScheduleBasedJob> {
        match self {
            Job::ScheduleBased(job) => Some(job),
            Job::DependencyBased(_) => None,
        }
    }

    /// Gets the dependency-based payload, if the job is that variant
    pub fn as_dependency_based(&self) -> Option<&DependencyBasedJob> {
        match self {
            Job::DependencyBased(job) => Some(job),
            Job::ScheduleBased(_) => None,
        }
    }

    /// Produces a copy of the job with its success counters advanced, a success
    /// clears the consecutive-failure streak
    pub fn with_success(&self, now: DateTime<Utc>) -> Job {
        let mut job = self.clone();
        let common = job.common_mut();
        common.success_count += 1;
        common.errors_since_last_success = 0;
        common.last_success = Some(now);
        job
    }

    /// Produces a copy of the job with its failure counters advanced and the
    /// disabled flag set when the failure streak crossed the configured threshold
    pub fn with_failure(&self, now: DateTime<Utc>, disable: bool) -> Job {
        let mut job = self.clone();
        let common = job.common_mut();
        common.error_count += 1;
        common.errors_since_last_success += 1;
        common.last_error = Some(now);
        common.disabled = common.disabled || disable;
        job
    }

    /// Produces a copy of the job with a rewritten schedule expression, a no-op
    /// copy for the dependency-based variant
    pub fn with_schedule(&self, schedule: impl Into<String>) -> Job {
        let mut job = self.clone();
        if let Job::ScheduleBased(sched) = &mut job {
            sched.schedule = schedule.into();
        }
        job
    }

    /// Produces a copy of the job with the disabled flag set
    pub fn with_disabled(&self, disabled: bool) -> Job {
        let mut job = self.clone();
        job.common_mut().disabled = disabled;
        job
    }
}
