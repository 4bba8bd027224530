use crate::errors::ChronarchErrors;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use typed_builder::TypedBuilder;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

#[allow(unused_imports)]
use crate::task::TaskStatus;

/// The default failover timeout handed to the resource manager, long enough that tasks
/// enqueued but unacked across a crash are still owned by this framework when a replica
/// comes back
pub const DEFAULT_FAILOVER_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 3_600);

/// [`DriverConfig`] is the builder for the settings an [`ExecutionDriver`]
/// registers with the resource manager
///
/// # See Also
/// - [`ExecutionDriver`]
#[derive(Debug, Clone, TypedBuilder)]
pub struct DriverConfig {
    /// The framework name announced to the resource manager
    #[builder(default = String::from("chronarch"), setter(into))]
    pub framework_name: String,

    /// How long the resource manager keeps this framework's tasks across
    /// a disconnect before reaping them
    #[builder(default = DEFAULT_FAILOVER_TIMEOUT)]
    pub failover_timeout: Duration,
}

/// [`ExecutionDriver`] is the seam to the external cluster resource manager that actually
/// launches tasks on worker nodes. The scheduler core only starts and closes it, everything
/// else flows the other way: the driver drains ready tasks from the task manager and feeds
/// [`TaskStatus`] callbacks into the [`Scheduler`] lifecycle handlers on its own threads
///
/// # Required Method(s)
/// When implementing the [`ExecutionDriver`], one has to supply implementations for
/// [`ExecutionDriver::start`] and [`ExecutionDriver::close`], both invoked by the leader
/// lifecycle on election and defeat
///
/// # See Also
/// - [`Scheduler`]
/// - [`NoopExecutionDriver`]
#[async_trait]
pub trait ExecutionDriver: Send + Sync {
    /// Connects the driver and begins draining ready tasks
    async fn start(&self) -> Result<(), ChronarchErrors>;

    /// Disconnects the driver, pending tasks stay owned by the framework for
    /// the configured failover timeout
    async fn close(&self) -> Result<(), ChronarchErrors>;
}

#[async_trait]
impl<D: ExecutionDriver + ?Sized> ExecutionDriver for Arc<D> {
    async fn start(&self) -> Result<(), ChronarchErrors> {
        self.as_ref().start().await
    }

    async fn close(&self) -> Result<(), ChronarchErrors> {
        self.as_ref().close().await
    }
}

/// [`NoopExecutionDriver`] is an implementation of [`ExecutionDriver`] that only tracks
/// whether it has been started, mostly meant to be used for demos, tests and failover
/// drills where no resource manager is attached
///
/// # See Also
/// - [`ExecutionDriver`]
#[derive(Debug, Default)]
pub struct NoopExecutionDriver {
    started: AtomicBool,
}

impl NoopExecutionDriver {
    /// Creates / Constructs a new, stopped [`NoopExecutionDriver`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether the driver is currently started
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionDriver for NoopExecutionDriver {
    async fn start(&self) -> Result<(), ChronarchErrors> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), ChronarchErrors> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}
