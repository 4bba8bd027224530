use crate::driver::ExecutionDriver;
use crate::errors::ChronarchErrors;
use crate::persistence::{self, StateStore};
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Process exit code for an unrecoverable hydration failure on election
pub const EXIT_HYDRATION_FAILURE: i32 = 2;

/// Process exit code for a coordination-service I/O failure
pub const EXIT_COORDINATION_FAILURE: i32 = 3;

/// [`LeadershipListener`] receives leadership transitions from a [`LeaderLatch`],
/// delivered one at a time on the latch's single callback worker
#[async_trait]
pub trait LeadershipListener: Send + Sync {
    /// This replica won the election
    async fn is_leader(&self);

    /// This replica lost leadership
    async fn not_leader(&self);
}

/// [`LeaderLatch`] is the seam to the coordination-service primitive granting
/// single-writer status across replicas. Exactly one subscribed replica observes
/// ``is_leader`` at a time, the rest stay passive until a failover
///
/// # Required Method(s)
/// When implementing the [`LeaderLatch`], one has to supply implementations for the
/// start/close pair, subscription, and the current-leader query. Latch I/O failures
/// surface as errors, the lifecycle treats the leadership query failing as fatal
///
/// # See Also
/// - [`LeaderLifecycle`]
/// - [`InProcessLeaderLatch`]
#[async_trait]
pub trait LeaderLatch: Send + Sync {
    /// Joins the election
    async fn start(&self) -> Result<(), ChronarchErrors>;

    /// Leaves the election, notifying the current leader when this replica holds it
    async fn close(&self) -> Result<(), ChronarchErrors>;

    /// Subscribes a listener to leadership transitions
    async fn subscribe(&self, listener: Arc<dyn LeadershipListener>);

    /// Reads the id of the current leader from the coordination service
    async fn leader_id(&self) -> Result<Option<String>, ChronarchErrors>;
}

/// [`LeaderLifecycle`] wires a [`Scheduler`] to a [`LeaderLatch`]: on election it
/// hydrates durable state and starts the engine, on defeat it halts scheduling and
/// discards in-memory state so a later election rebuilds it from the store.
///
/// # Implementation Detail(s)
/// Hydration restores pending tasks strictly before jobs: restoring jobs first can
/// schedule a due task before its pending-task state is back, producing a duplicate.
/// A hydration failure is unrecoverable, the listener wrapper exits the process with
/// [`EXIT_HYDRATION_FAILURE`]
///
/// # See Also
/// - [`Scheduler`]
/// - [`LeaderLatch`]
/// - [`ExecutionDriver`]
pub struct LeaderLifecycle {
    scheduler: Arc<Scheduler>,
    driver: Arc<dyn ExecutionDriver>,
    latch: Arc<dyn LeaderLatch>,
    store: Arc<dyn StateStore>,
}

impl LeaderLifecycle {
    /// Creates / Constructs a new [`LeaderLifecycle`] over the engine, the
    /// resource-manager driver, the latch and the durable store
    pub fn new(
        scheduler: Arc<Scheduler>,
        driver: Arc<dyn ExecutionDriver>,
        latch: Arc<dyn LeaderLatch>,
        store: Arc<dyn StateStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            driver,
            latch,
            store,
        })
    }

    /// Subscribes to the latch and joins the election
    pub async fn start_up(self: &Arc<Self>) -> Result<(), ChronarchErrors> {
        self.latch
            .subscribe(self.clone() as Arc<dyn LeadershipListener>)
            .await;
        self.latch.start().await
    }

    /// Halts scheduling and leaves the election, notifying the current leader
    pub async fn shut_down(&self) -> Result<(), ChronarchErrors> {
        self.scheduler.mark_running(false);
        self.scheduler.stop().await;
        self.latch.close().await
    }

    /// Brings this replica up as leader: flips the gates, hydrates pending tasks then
    /// jobs from the store, starts the run loop and the resource-manager driver
    ///
    /// # Returns
    /// [`ChronarchErrors::HydrationFailed`] when persisted state cannot be restored,
    /// the caller must treat this as unrecoverable
    pub async fn on_elected(&self) -> Result<(), ChronarchErrors> {
        tracing::info!("elected leader, hydrating persisted state");
        self.scheduler.mark_leader(true);
        self.scheduler.mark_running(true);

        let task_manager = self.scheduler.task_manager();
        let tasks = persistence::load_tasks(&task_manager, &self.store).await?;
        let jobs = persistence::load_jobs(&self.scheduler, &self.store).await?;
        tracing::info!(tasks, jobs, "hydration complete");

        self.scheduler.start().await;
        self.driver.start().await?;
        Ok(())
    }

    /// Brings this replica down after a lost election: closes the driver, halts the
    /// run loop and discards the in-memory graph and streams
    pub async fn on_defeated(&self) {
        tracing::info!("leadership lost, halting scheduling");
        if let Err(error) = self.driver.close().await {
            tracing::warn!(%error, "failed to close execution driver");
        }
        self.scheduler.mark_running(false);
        self.scheduler.mark_leader(false);
        self.scheduler.reset(false).await;
        self.scheduler.stop().await;
    }

    /// Reads the id of the current leader from the coordination service
    ///
    /// # Returns
    /// [`ChronarchErrors::CoordinationFailed`] when the latch cannot answer, the
    /// caller must treat this as unrecoverable
    pub async fn leader_id(&self) -> Result<Option<String>, ChronarchErrors> {
        self.latch
            .leader_id()
            .await
            .map_err(|error| ChronarchErrors::CoordinationFailed(error.to_string()))
    }
}

#[async_trait]
impl LeadershipListener for LeaderLifecycle {
    async fn is_leader(&self) {
        if let Err(error) = self.on_elected().await {
            tracing::error!(%error, "unrecoverable hydration failure, aborting");
            std::process::exit(EXIT_HYDRATION_FAILURE);
        }
    }

    async fn not_leader(&self) {
        self.on_defeated().await;
    }
}

/// [`InProcessLeaderLatch`] is an implementation of [`LeaderLatch`] holding the election
/// entirely in process, mostly meant to be used for demos, tests and failover drills,
/// real deployments subscribe a coordination-service latch instead
///
/// # See Also
/// - [`LeaderLatch`]
/// - [`LeaderLifecycle`]
pub struct InProcessLeaderLatch {
    replica_id: String,
    listeners: Mutex<Vec<Arc<dyn LeadershipListener>>>,
    leader: Mutex<Option<String>>,
    started: AtomicBool,
}

impl InProcessLeaderLatch {
    /// Creates / Constructs a new [`InProcessLeaderLatch`] announcing itself
    /// under ``replica_id``
    pub fn new(replica_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            replica_id: replica_id.into(),
            listeners: Mutex::new(Vec::new()),
            leader: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Grants leadership to this replica and delivers ``is_leader`` to every
    /// subscribed listener in order
    pub async fn elect(&self) {
        *self.leader.lock().await = Some(self.replica_id.clone());
        let listeners = self.listeners.lock().await.clone();
        for listener in listeners {
            listener.is_leader().await;
        }
    }

    /// Revokes leadership from this replica and delivers ``not_leader`` to every
    /// subscribed listener in order
    pub async fn defeat(&self) {
        *self.leader.lock().await = None;
        let listeners = self.listeners.lock().await.clone();
        for listener in listeners {
            listener.not_leader().await;
        }
    }
}

#[async_trait]
impl LeaderLatch for InProcessLeaderLatch {
    async fn start(&self) -> Result<(), ChronarchErrors> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), ChronarchErrors> {
        if self.leader.lock().await.is_some() {
            self.defeat().await;
        }
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, listener: Arc<dyn LeadershipListener>) {
        self.listeners.lock().await.push(listener);
    }

    async fn leader_id(&self) -> Result<Option<String>, ChronarchErrors> {
        Ok(self.leader.lock().await.clone())
    }
}
