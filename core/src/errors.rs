use std::fmt::Debug;
use thiserror::Error;

#[allow(unused_imports)]
use crate::graph::JobGraph;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// [`ChronarchErrors`] is the main enum that contains all the errors which can be thrown by
/// Chronarch, it uses under the hood [`thiserror`] to make it as smooth sailing to add more
/// errors in the future as possible
#[derive(Error, Debug)]
pub enum ChronarchErrors {
    /// This error is meant to happen when an update supplies a replacement job whose
    /// name differs from the job it replaces, renaming jobs in place is unsupported
    #[error("Job `{0}` cannot be renamed to `{1}`, renaming jobs is unsupported")]
    JobRenameUnsupported(String, String),

    /// This error is meant to happen when a dependency-based job names a parent
    /// that does not resolve to any vertex in the [`JobGraph`]
    #[error("Job `{0}` references parent `{1}` which is not a registered job")]
    UnresolvedParent(String, String),

    /// This error is meant to happen when adding an ``is-parent-of`` edge would
    /// close a cycle, the [`JobGraph`] is acyclic by construction
    #[error("Dependency `{0}` -> `{1}` would introduce a cycle in the job graph")]
    CyclicDependency(String, String),

    /// This error is meant to happen when an operation addresses a vertex
    /// that is not present in the [`JobGraph`]
    #[error("Job `{0}` is not a vertex of the job graph")]
    VertexMissing(String),

    /// This error is meant to happen when a task identifier does not follow the
    /// versioned ``version:job-name:due-millis:attempt`` layout, or carries an
    /// unsupported version tag
    #[error("Task id `{0}` is not a valid task identifier of the current version")]
    TaskIdInvalid(String),

    /// This error is meant to happen when a schedule expression cannot be parsed
    /// as an ISO-8601 repeating interval of the ``Rn/start/period`` form
    #[error("Schedule expression `{0}` is not a parsable ISO-8601 repeating interval")]
    ScheduleInvalid(String),

    /// This error is meant to happen when a mutating operation is invoked on a
    /// replica that has not been elected leader, only the leader drives scheduling
    #[error("Operation `{0}` refused, this replica is not the current leader")]
    NotLeader(&'static str),

    /// This error is meant to happen when hydrating persisted jobs or pending tasks
    /// fails during an election, the process cannot continue from partial state
    #[error("Hydration from the state store failed: {0}")]
    HydrationFailed(String),

    /// This error is meant to happen when the coordination service cannot answer
    /// a leadership query, the situation is treated as fatal by [`Scheduler`] hosts
    #[error("Coordination service failure: {0}")]
    CoordinationFailed(String),

    /// This error is meant to happen when the state store rejects a read or write,
    /// callers log it and retry on next use
    #[error("State store failure: {0}")]
    StoreFailed(String),

    /// This error is meant to happen when the external resource-manager driver
    /// cannot be started or closed
    #[error("Execution driver failure: {0}")]
    DriverFailed(String),

    /// This error is meant to happen when the task-stat history store rejects an
    /// append or a counter update, the session is reset and the caller proceeds
    #[error("History store failure: {0}")]
    HistoryFailed(String),
}
