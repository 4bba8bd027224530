#[allow(missing_docs)]
pub mod horizon; // skipcq: RS-D1001

#[allow(missing_docs)]
pub mod status; // skipcq: RS-D1001

use crate::clock::{SchedulerClock, SystemClock};
use crate::errors::ChronarchErrors;
use crate::events::{JobEvent, ObserverRegistry};
use crate::graph::JobGraph;
use crate::job::Job;
use crate::persistence::{InMemoryStateStore, StateStore};
use crate::schedule::ScheduleStream;
use crate::task_manager::{DefaultTaskManager, TaskManager};
use chrono::{DateTime, Utc};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use typed_builder::TypedBuilder;

#[allow(unused_imports)]
use crate::leader::LeaderLifecycle;

pub(crate) struct SchedulerState {
    pub(crate) streams: Vec<ScheduleStream>,
    pub(crate) graph: JobGraph,
}

/// This is the builder configs to use for building a [`Scheduler`] instance.
/// By itself it should not be used, and it resides in [`Scheduler::builder`]
#[derive(TypedBuilder)]
#[builder(build_method(into = Scheduler))]
pub struct SchedulerConfig {
    /// The look-ahead window during which planned firings are materialized as
    /// enqueued tasks, also the exact sleep between run-loop iterations
    ///
    /// # Default Value
    /// Every scheduler uses one minute as the default horizon
    #[builder(default = Duration::from_secs(60))]
    schedule_horizon: Duration,

    /// The delay before a failed task with attempts left is retried
    ///
    /// # Default Value
    /// Every scheduler uses one minute as the default retry delay
    #[builder(default = Duration::from_secs(60))]
    failure_retry_delay: Duration,

    /// How many consecutive terminal failures flip a job to disabled,
    /// ``0`` turns the policy off
    ///
    /// # Default Value
    /// The policy is off by default
    #[builder(default = 0)]
    disable_after_failures: u64,

    /// The [`SchedulerClock`] for handling the idling between iterations and
    /// getting the present time
    ///
    /// # Default Value
    /// Every scheduler uses as default value the system clock, for unit testing
    /// and failover drills the advanceable virtual clock should be preferred
    #[builder(
        default = Arc::new(SystemClock),
        setter(transform = |clock: impl SchedulerClock + 'static| Arc::new(clock) as Arc<dyn SchedulerClock>),
    )]
    clock: Arc<dyn SchedulerClock>,

    /// The [`StateStore`] jobs and pending tasks are written through to on
    /// every mutation, read back once per election
    ///
    /// # Default Value
    /// Every scheduler uses the in-memory store by default, for real deployments
    /// a replicated backend should be preferred
    #[builder(
        default = Arc::new(InMemoryStateStore::new()),
        setter(transform = |store: impl StateStore + 'static| Arc::new(store) as Arc<dyn StateStore>),
    )]
    store: Arc<dyn StateStore>,

    /// The [`TaskManager`] minted tasks are handed to
    ///
    /// # Default Value
    /// When not supplied, a [`DefaultTaskManager`] is constructed over the
    /// configured clock and state store
    #[builder(default, setter(strip_option))]
    task_manager: Option<Arc<dyn TaskManager>>,

    /// The [`ObserverRegistry`] domain events fan out through
    ///
    /// # Default Value
    /// A fresh, empty registry
    #[builder(default = Arc::new(ObserverRegistry::new()))]
    observers: Arc<ObserverRegistry>,
}

impl From<SchedulerConfig> for Scheduler {
    fn from(config: SchedulerConfig) -> Self {
        let task_manager = config.task_manager.unwrap_or_else(|| {
            DefaultTaskManager::new(config.clock.clone(), config.store.clone())
                as Arc<dyn TaskManager>
        });

        Self {
            state: Mutex::new(SchedulerState {
                streams: Vec::new(),
                graph: JobGraph::new(),
            }),
            running: AtomicBool::new(false),
            leader: AtomicBool::new(false),
            clock: config.clock,
            task_manager,
            store: config.store,
            observers: config.observers,
            schedule_horizon: config.schedule_horizon,
            failure_retry_delay: config.failure_retry_delay,
            disable_after_failures: config.disable_after_failures,
            run_loop: Mutex::new(None),
        }
    }
}

/// [`Scheduler`] is the engine that owns the live set of schedule streams and the job
/// graph, drives the periodic horizon iteration, applies task-status callbacks and
/// enforces the retry/disable policy, arbitrating every mutation of the graph and the
/// durable store behind one coarse monitor.
///
/// In a nutshell the run loop consists of:
/// 1. Taking the current instant from the [`SchedulerClock`].
/// 2. Advancing every stream against that single instant, enqueueing each firing that
///    falls inside the ``(now - epsilon, now + horizon)`` window and rewriting the
///    owning job's schedule to the consumed stream's tail.
/// 3. Idling for exactly one schedule horizon.
/// 4. Repeating while the engine is running.
///
/// # Constructor(s)
/// If one wishes to construct their own [`Scheduler`], they may do so via
/// [`Scheduler::builder`], every composite carries a default suited for demos and tests
///
/// # Usage Note(s)
/// Mutating operations are leader-gated: replicas that have not been elected refuse
/// [`Scheduler::register_jobs`] and [`Scheduler::deregister_job`] with
/// [`ChronarchErrors::NotLeader`]. The [`LeaderLifecycle`] flips the gates on
/// election and defeat
///
/// # See Also
/// - [`LeaderLifecycle`]
/// - [`TaskManager`]
/// - [`StateStore`]
/// - [`SchedulerClock`]
pub struct Scheduler {
    pub(crate) state: Mutex<SchedulerState>,
    pub(crate) running: AtomicBool,
    pub(crate) leader: AtomicBool,
    pub(crate) clock: Arc<dyn SchedulerClock>,
    pub(crate) task_manager: Arc<dyn TaskManager>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) observers: Arc<ObserverRegistry>,
    pub(crate) schedule_horizon: Duration,
    pub(crate) failure_retry_delay: Duration,
    pub(crate) disable_after_failures: u64,
    run_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for Scheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.running)
            .field("leader", &self.leader)
            .field("schedule_horizon", &self.schedule_horizon)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Scheduler {
    /// Constructs a scheduler builder, which is used for supplying the various
    /// composites to then construct a [`Scheduler`]
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfig::builder()
    }

    /// Gets the [`SchedulerClock`] the engine reads time from
    pub fn clock(&self) -> Arc<dyn SchedulerClock> {
        self.clock.clone()
    }

    /// Gets the [`TaskManager`] minted tasks are handed to
    pub fn task_manager(&self) -> Arc<dyn TaskManager> {
        self.task_manager.clone()
    }

    /// Gets the [`ObserverRegistry`] domain events fan out through
    pub fn observers(&self) -> Arc<ObserverRegistry> {
        self.observers.clone()
    }

    /// Gets the [`StateStore`] the engine writes through to
    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    /// Checks whether the run loop is driving iterations
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Checks whether this replica currently holds leadership
    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// Flips the running gate, driven by the [`LeaderLifecycle`]
    pub fn mark_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Flips the leadership gate, driven by the [`LeaderLifecycle`]
    pub fn mark_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    /// Looks up the registered job of the supplied name
    pub async fn lookup_job(&self, name: &str) -> Option<Job> {
        self.state.lock().await.graph.lookup_vertex(name).cloned()
    }

    /// Gets the number of registered job vertices
    pub async fn job_count(&self) -> usize {
        self.state.lock().await.graph.vertex_count()
    }

    /// Gets a snapshot of the live schedule streams
    pub async fn streams_snapshot(&self) -> Vec<ScheduleStream> {
        self.state.lock().await.streams.clone()
    }

    /// Registers a batch of jobs with the engine, requires leadership.
    ///
    /// Dependency-based jobs may name parents registered earlier or within the same
    /// batch. When ``persist`` is set every job is written through to the state store,
    /// hydration registers with ``persist`` unset. Non-disabled schedule-based jobs get
    /// a fresh stream built from their current schedule
    pub async fn register_jobs(
        &self,
        jobs: Vec<Job>,
        persist: bool,
        _now: DateTime<Utc>,
    ) -> Result<(), ChronarchErrors> {
        self.require_leader("register_jobs")?;

        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;

            for job in &jobs {
                if let Job::DependencyBased(dep) = job {
                    for parent in &dep.parents {
                        let in_batch = jobs.iter().any(|other| other.name() == parent.as_str());
                        if !in_batch && state.graph.lookup_vertex(parent).is_none() {
                            return Err(ChronarchErrors::UnresolvedParent(
                                job.name().to_owned(),
                                parent.clone(),
                            ));
                        }
                    }
                }
            }

            for job in &jobs {
                state.graph.add_vertex(job.clone());
            }
            for job in &jobs {
                if let Job::DependencyBased(dep) = job {
                    for parent in &dep.parents {
                        state.graph.add_dependency(parent, job.name())?;
                    }
                }
            }

            for job in jobs {
                if persist {
                    self.persist_job_logged(&job).await;
                }
                if let Job::ScheduleBased(sched) = &job
                    && !sched.common.disabled
                {
                    Self::add_schedule(&mut state, ScheduleStream::for_job(sched));
                }
                tracing::info!(job = job.name(), "job registered");
                events.push(JobEvent::Registered { job });
            }
        }
        self.observers.broadcast_all(&events).await;
        Ok(())
    }

    /// Replaces a registered job with an updated rendition of the same name.
    ///
    /// For a schedule-based replacement any existing stream of the name is dropped, a
    /// fresh one is rebuilt unless the replacement is disabled and an iteration runs so
    /// imminent firings materialize immediately. The replacement is written through
    pub async fn update_job(&self, old: &Job, new: Job) -> Result<(), ChronarchErrors> {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            self.update_job_locked(&mut state, old, new, &mut events)
                .await?;
        }
        self.observers.broadcast_all(&events).await;
        Ok(())
    }

    pub(crate) async fn update_job_locked(
        &self,
        state: &mut SchedulerState,
        old: &Job,
        new: Job,
        events: &mut Vec<JobEvent>,
    ) -> Result<(), ChronarchErrors> {
        if old.name() != new.name() {
            return Err(ChronarchErrors::JobRenameUnsupported(
                old.name().to_owned(),
                new.name().to_owned(),
            ));
        }

        state.graph.replace_vertex(old, new.clone())?;

        if let Job::ScheduleBased(sched) = &new {
            state.streams.retain(|stream| stream.job_name() != new.name());
            if !sched.common.disabled {
                Self::add_schedule(state, ScheduleStream::for_job(sched));
                let now = self.clock.now().await;
                self.iteration(state, now, events).await;
            }
        }

        self.persist_job_logged(&new).await;
        Ok(())
    }

    /// Deregisters a job, requires leadership.
    ///
    /// Dependency-based children with more than one parent are rewritten with this job
    /// removed from their parents, the vertex and its stream are dropped, in-flight
    /// tasks are cancelled through the task manager and ``JobRemoved`` is observed.
    /// When ``persist`` is set the job is deleted from the state store
    pub async fn deregister_job(&self, job: &Job, persist: bool) -> Result<(), ChronarchErrors> {
        self.require_leader("deregister_job")?;

        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;

            for child_name in state.graph.get_children(job.name()) {
                let Some(child) = state.graph.lookup_vertex(&child_name).cloned() else {
                    continue;
                };
                if let Job::DependencyBased(dep) = &child
                    && dep.parents.len() > 1
                {
                    let mut rewritten = dep.clone();
                    rewritten.parents.remove(job.name());
                    self.update_job_locked(
                        &mut state,
                        &child,
                        Job::DependencyBased(rewritten),
                        &mut events,
                    )
                    .await?;
                }
            }

            state.graph.remove_vertex(job.name());
            state
                .streams
                .retain(|stream| stream.job_name() != job.name());
            self.task_manager.cancel_tasks(job).await;

            tracing::info!(job = job.name(), "job deregistered");
            events.push(JobEvent::Removed { job: job.clone() });

            if persist && let Err(error) = self.store.remove_job(job).await {
                tracing::warn!(job = job.name(), %error, "failed to delete job from store");
            }
        }
        self.observers.broadcast_all(&events).await;
        Ok(())
    }

    /// Replaces the graph vertex of a job and writes the replacement through,
    /// without touching streams
    pub async fn replace_job(&self, old: &Job, new: Job) -> Result<(), ChronarchErrors> {
        let mut state = self.state.lock().await;
        state.graph.replace_vertex(old, new.clone())?;
        self.persist_job_logged(&new).await;
        Ok(())
    }

    /// Clears the streams and the graph, optionally flushing the task manager's
    /// pending queue as well
    pub async fn reset(&self, purge_queue: bool) {
        let mut state = self.state.lock().await;
        state.streams.clear();
        state.graph.reset();
        if purge_queue {
            self.task_manager.flush().await;
        }
    }

    /// Starts the run loop on a background worker, if the loop has already started
    /// this method does nothing. Iteration and horizon-long idling alternate while
    /// the running gate stays up
    pub async fn start(self: &Arc<Self>) {
        if self.run_loop.lock().await.is_some() {
            return;
        }
        let scheduler = self.clone();
        *self.run_loop.lock().await = Some(tokio::spawn(async move {
            while scheduler.is_running() {
                scheduler.run_iteration().await;
                scheduler.clock.idle_for(scheduler.schedule_horizon).await;
            }
        }));
    }

    /// Cancels the run-loop worker, if the loop hasn't started this method
    /// does nothing
    pub async fn stop(&self) {
        let process = self.run_loop.lock().await.take();
        if let Some(process) = process {
            process.abort();
        }
    }

    /// Checks whether the run-loop worker is alive
    pub async fn has_started(&self) -> bool {
        self.run_loop.lock().await.is_some()
    }

    pub(crate) fn require_leader(&self, operation: &'static str) -> Result<(), ChronarchErrors> {
        if self.is_leader() {
            Ok(())
        } else {
            Err(ChronarchErrors::NotLeader(operation))
        }
    }

    pub(crate) fn add_schedule(state: &mut SchedulerState, stream: ScheduleStream) {
        state
            .streams
            .retain(|existing| existing.job_name() != stream.job_name());
        state.streams.push(stream);
    }

    pub(crate) async fn persist_job_logged(&self, job: &Job) {
        if let Err(error) = self.store.persist_job(job).await {
            tracing::warn!(job = job.name(), %error, "failed to persist job, retrying on next use");
        }
    }
}
