use crate::clock::{AdvanceableSchedulerClock, SchedulerClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

#[allow(unused_imports)]
use crate::clock::SystemClock;

/// [`VirtualClock`] is an implementation of the [`SchedulerClock`] trait, it acts as a mock
/// object, allowing to simulate time without the waiting around. This can especially be useful
/// for unit tests, failover drills, schedule-horizon simulations and so on
///
/// Unlike [`SystemClock`], this clock doesn't move forward, rather it needs explicit
/// calls to advance methods ([`VirtualClock`] implements the [`AdvanceableSchedulerClock`]
/// extension trait), which makes it predictable at any point throughout the program
///
/// # Constructor(s)
/// When constructing a [`VirtualClock`], one can use a variety of constructor methods,
/// those being:
/// - [`VirtualClock::new`] For creating one based on an initial [`DateTime<Utc>`] instant
/// - [`VirtualClock::from_value`] For creating one based on the supplied ``u64`` number
///   (as milliseconds since the UNIX Epoch)
/// - [`VirtualClock::from_current_time`] For creating one based on the current time
/// - [`VirtualClock::from_epoch`] For creating one based on the UNIX Epoch
///
/// # See Also
/// - [`SystemClock`]
/// - [`AdvanceableSchedulerClock`]
/// - [`SchedulerClock`]
pub struct VirtualClock {
    current_time: AtomicU64,
    notify: Notify,
}

impl Debug for VirtualClock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualClock")
            .field(
                "current_time",
                &DateTime::<Utc>::from_timestamp_millis(
                    self.current_time.load(Ordering::Relaxed) as i64
                ),
            )
            .finish()
    }
}

impl VirtualClock {
    /// Creates / Constructs a new [`VirtualClock`] instance with the
    /// time set to ``initial_time``
    pub fn new(initial_time: DateTime<Utc>) -> Self {
        VirtualClock::from_value(initial_time.timestamp_millis().max(0) as u64)
    }

    /// Creates / Constructs a new [`VirtualClock`] instance with the time set to
    /// ``initial_value``, represented in **total milliseconds** since the UNIX Epoch
    pub fn from_value(initial_value: u64) -> Self {
        VirtualClock {
            current_time: AtomicU64::new(initial_value),
            notify: Notify::new(),
        }
    }

    /// Creates / Constructs a new [`VirtualClock`] instance from the current time
    pub fn from_current_time() -> Self {
        Self::new(Utc::now())
    }

    /// Creates / Constructs a new [`VirtualClock`] instance from the UNIX Epoch
    pub fn from_epoch() -> Self {
        Self::from_value(0)
    }
}

#[async_trait]
impl SchedulerClock for VirtualClock {
    async fn now(&self) -> DateTime<Utc> {
        let now = self.current_time.load(Ordering::Relaxed);
        DateTime::<Utc>::from_timestamp_millis(now as i64).unwrap()
    }

    async fn idle_to(&self, to: DateTime<Utc>) {
        while self.now().await < to {
            self.notify.notified().await;
        }
    }
}

#[async_trait]
impl AdvanceableSchedulerClock for VirtualClock {
    async fn advance_to(&self, to: DateTime<Utc>) {
        let to_millis = to.timestamp_millis().max(0) as u64;
        self.current_time.store(to_millis, Ordering::Relaxed);
        self.notify.notify_waiters();
    }
}
