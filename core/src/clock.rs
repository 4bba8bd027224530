pub mod system_clock; // skipcq: RS-D1001
pub mod virtual_clock; // skipcq: RS-D1001

pub use system_clock::SystemClock;
pub use virtual_clock::VirtualClock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::ops::Deref;
use std::time::Duration;

/// [`SchedulerClock`] is a trait for implementing a custom scheduler clock, typical operations
/// include getting the current time and idling until a specific instant is reached.
///
/// # Required Methods
/// When implementing the [`SchedulerClock`], one must provide implementations for two methods,
/// those being [`SchedulerClock::now`] and [`SchedulerClock::idle_to`], the former is used to
/// get the current time while the latter is used to idle to a specific instant of interest,
/// both methods are used by the scheduler run loop under the hood
///
/// # Trait Implementation(s)
/// Specifically, there are 2 noteworthy implementations to list, those being:
///
/// - [`VirtualClock`] used to simulate time (for unit-tests, failover drills, horizon
///   simulations... etc.), it doesn't go forward without explicit advancing and implements
///   the [`AdvanceableSchedulerClock`] trait as well
///
/// - [`SystemClock`] the default go-to clock, it automatically goes forward and doesn't wait
///   around, it doesn't implement the [`AdvanceableSchedulerClock`] trait due to its nature
///
/// # See Also
/// - [`VirtualClock`]
/// - [`SystemClock`]
/// - [`AdvanceableSchedulerClock`]
#[async_trait]
pub trait SchedulerClock: Debug + Send + Sync {
    /// Gets the current time of the clock as an absolute UTC instant
    async fn now(&self) -> DateTime<Utc>;

    /// Idle until this specified instant is reached (if it is in the past
    /// or present, it doesn't idle)
    async fn idle_to(&self, to: DateTime<Utc>);

    /// Idle for the supplied duration from the clock's current time, a
    /// convenience over [`SchedulerClock::idle_to`]
    async fn idle_for(&self, duration: Duration) {
        let now = self.now().await;
        self.idle_to(now + duration).await;
    }
}

#[async_trait]
impl<T> SchedulerClock for T
where
    T: Deref + Send + Sync + Debug,
    T::Target: SchedulerClock,
{
    async fn now(&self) -> DateTime<Utc> {
        self.deref().now().await
    }

    async fn idle_to(&self, to: DateTime<Utc>) {
        self.deref().idle_to(to).await
    }
}

/// [`AdvanceableSchedulerClock`] is an optional extension to [`SchedulerClock`] which, as the
/// name suggests, allows for arbitrary advancement of time, specific clocks might not support
/// arbitrary advancement (such as [`SystemClock`]), as such why it is an optional trait
///
/// # Required Methods
/// When implementing the [`AdvanceableSchedulerClock`], one has to fully implement one method
/// being [`AdvanceableSchedulerClock::advance_to`] which is used for advancing the time to
/// a specific instant of interest
///
/// # See Also
/// - [`SchedulerClock`]
/// - [`VirtualClock`]
#[async_trait]
pub trait AdvanceableSchedulerClock: SchedulerClock {
    /// Advance the time by a specified duration forward
    async fn advance(&self, duration: Duration) {
        let now = self.now().await;
        self.advance_to(now + duration).await
    }

    /// Advance the time to a specified desired future instant
    async fn advance_to(&self, to: DateTime<Utc>);
}
