use crate::job::Job;
use crate::task::TaskStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

#[allow(unused_imports)]
use crate::stats::JobStats;

/// The error type observers may surface, the registry logs it and proceeds,
/// observer failures never propagate into the engine
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// [`JobEvent`] is a domain event the [`Scheduler`] emits through the observer fan-out,
/// covering the whole job lifecycle from registration to removal. Events carry enough of
/// the job record for sinks such as [`JobStats`] to append history rows without reading
/// engine state
///
/// # See Also
/// - [`JobObserver`]
/// - [`ObserverRegistry`]
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A job was registered or re-registered with the engine
    Registered { job: Job },

    /// A task of the job started running on a worker node
    Started {
        job: Job,
        status: TaskStatus,
        attempt: u32,
    },

    /// A task of the job completed successfully, ``latency`` measures the span from
    /// the task's due instant to the completion callback
    Finished {
        job: Job,
        status: TaskStatus,
        attempt: u32,
        latency: Duration,
    },

    /// A task of the job failed or was killed, ``job`` is absent when the vertex is
    /// no longer registered and only the name could be recovered from the task id
    Failed {
        job: Option<Job>,
        job_name: String,
        status: TaskStatus,
        attempt: u32,
    },

    /// A failed task had attempts left by policy but the retry window was closed,
    /// no further attempt is scheduled
    RetriesExhausted {
        job: Job,
        task_id: String,
        attempt: u32,
    },

    /// The job was flipped to disabled, either by recurrence exhaustion or by
    /// crossing the consecutive-failure threshold
    Disabled { job: Job, message: String },

    /// A planned firing fell outside the dispatch window and was skipped
    Skipped { job: Job, missed: DateTime<Utc> },

    /// The job was deregistered and its vertex removed
    Removed { job: Job },
}

impl JobEvent {
    /// Gets the name of the job the event concerns
    pub fn job_name(&self) -> &str {
        match self {
            JobEvent::Registered { job }
            | JobEvent::Started { job, .. }
            | JobEvent::Finished { job, .. }
            | JobEvent::RetriesExhausted { job, .. }
            | JobEvent::Disabled { job, .. }
            | JobEvent::Skipped { job, .. }
            | JobEvent::Removed { job } => job.name(),
            JobEvent::Failed { job_name, .. } => job_name,
        }
    }
}

/// [`JobObserver`] is the capability sinks implement to receive [`JobEvent`]s. Functions
/// and closures automatically implement this trait, tho stateful sinks (such as
/// [`JobStats`]) implement it on their own struct
///
/// # Required Method(s)
/// When implementing the [`JobObserver`] trait, one has to supply an implementation for
/// the method [`JobObserver::notify`] which receives each event in emission order. The
/// method may fail, the registry logs the failure and proceeds with the remaining
/// observers
///
/// # See Also
/// - [`ObserverRegistry`]
/// - [`JobEvent`]
#[async_trait]
pub trait JobObserver: Send + Sync {
    async fn notify(&self, event: &JobEvent) -> Result<(), ObserverError>;
}

#[async_trait]
impl<F, Fut> JobObserver for F
where
    F: Fn(JobEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ObserverError>> + Send,
{
    async fn notify(&self, event: &JobEvent) -> Result<(), ObserverError> {
        self(event.clone()).await
    }
}

#[async_trait]
impl<O: JobObserver + ?Sized> JobObserver for Arc<O> {
    async fn notify(&self, event: &JobEvent) -> Result<(), ObserverError> {
        self.as_ref().notify(event).await
    }
}

/// [`ObserverRegistry`] is the fan-out container the [`Scheduler`] broadcasts
/// [`JobEvent`]s through. Observers attach and detach at any time, each attachment is
/// keyed by a generated [`Uuid`] handle
///
/// # Implementation Detail(s)
/// Broadcasting never fails: an observer returning an error is logged and skipped,
/// the engine does not depend on any sink being healthy
///
/// # See Also
/// - [`JobObserver`]
/// - [`JobEvent`]
#[derive(Default)]
pub struct ObserverRegistry {
    observers: DashMap<Uuid, Arc<dyn JobObserver>>,
}

impl ObserverRegistry {
    /// Creates / Constructs a new, empty [`ObserverRegistry`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an observer to the fan-out
    ///
    /// # Returns
    /// The [`Uuid`] handle under which the observer is registered, used
    /// for later detachment
    pub fn attach(&self, observer: Arc<dyn JobObserver>) -> Uuid {
        let handle = Uuid::new_v4();
        self.observers.insert(handle, observer);
        handle
    }

    /// Detaches the observer registered under the supplied handle
    pub fn detach(&self, handle: &Uuid) {
        self.observers.remove(handle);
    }

    /// Broadcasts one event to every attached observer, failures are logged
    /// and skipped
    pub async fn broadcast(&self, event: &JobEvent) {
        let observers: Vec<Arc<dyn JobObserver>> = self
            .observers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for observer in observers {
            if let Err(error) = observer.notify(event).await {
                tracing::warn!(job = event.job_name(), %error, "observer failed, skipping");
            }
        }
    }

    /// Broadcasts a batch of events in order, a convenience over
    /// [`ObserverRegistry::broadcast`]
    pub async fn broadcast_all(&self, events: &[JobEvent]) {
        for event in events {
            self.broadcast(event).await;
        }
    }
}
