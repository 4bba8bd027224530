use crate::clock::SchedulerClock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

#[allow(unused_imports)]
use crate::clock::VirtualClock;

/// [`SystemClock`] is an implementation of the [`SchedulerClock`] trait, it is the default
/// option for scheduling, unlike [`VirtualClock`], it moves forward no matter what and cannot
/// be advanced at any arbitrary point (due to its design)
///
/// # See Also
/// - [`VirtualClock`]
/// - [`SchedulerClock`]
pub struct SystemClock;

impl Debug for SystemClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SystemClock").field(&Utc::now()).finish()
    }
}

#[async_trait]
impl SchedulerClock for SystemClock {
    async fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn idle_to(&self, to: DateTime<Utc>) {
        let now = Utc::now();
        let Ok(duration) = (to - now).to_std() else {
            return;
        };

        tokio::time::sleep(duration).await;
    }
}
