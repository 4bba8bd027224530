use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronarch::clock::{SchedulerClock, VirtualClock};
use chronarch::driver::NoopExecutionDriver;
use chronarch::errors::ChronarchErrors;
use chronarch::job::{Job, JobCommon, ScheduleBasedJob};
use chronarch::leader::{InProcessLeaderLatch, LeaderLatch, LeaderLifecycle};
use chronarch::persistence::{InMemoryStateStore, StateStore};
use chronarch::scheduler::Scheduler;
use chronarch::task::{ScheduledTask, format_task_id};
use std::sync::Arc;
use std::time::Duration;

fn instant(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

fn tick_job() -> Job {
    ScheduleBasedJob::builder()
        .common(
            JobCommon::builder()
                .name("tick")
                .command("true")
                .epsilon(Duration::from_secs(60))
                .build(),
        )
        .schedule("R1/2024-01-01T00:00:30Z/PT1M")
        .build()
        .into()
}

#[tokio::test]
async fn mutations_require_leadership() {
    let scheduler = Arc::new(Scheduler::builder().build());
    let now = Utc::now();

    let result = scheduler.register_jobs(vec![tick_job()], true, now).await;
    assert!(matches!(result, Err(ChronarchErrors::NotLeader(_))));

    let result = scheduler.deregister_job(&tick_job(), true).await;
    assert!(matches!(result, Err(ChronarchErrors::NotLeader(_))));
}

#[tokio::test]
async fn failover_restores_tasks_before_jobs_without_duplicates() {
    let shared = Arc::new(InMemoryStateStore::new());
    let clock = Arc::new(VirtualClock::new(instant("2024-01-01T00:00:00Z")));

    // replica one wins the first election
    let scheduler1 = Arc::new(
        Scheduler::builder()
            .clock(clock.clone())
            .store(shared.clone())
            .schedule_horizon(Duration::from_secs(60))
            .build(),
    );
    let driver1 = Arc::new(NoopExecutionDriver::new());
    let latch1 = InProcessLeaderLatch::new("replica-1");
    let lifecycle1 = LeaderLifecycle::new(
        scheduler1.clone(),
        driver1.clone(),
        latch1.clone(),
        shared.clone(),
    );
    lifecycle1.start_up().await.unwrap();
    latch1.elect().await;

    assert!(scheduler1.is_leader());
    assert!(scheduler1.is_running());
    assert!(driver1.is_started());
    assert_eq!(latch1.leader_id().await.unwrap().as_deref(), Some("replica-1"));

    // a firing 30 seconds ahead materializes and is written through
    let now = clock.now().await;
    scheduler1
        .register_jobs(vec![tick_job()], true, now)
        .await
        .unwrap();
    scheduler1.run_iteration().await;

    let task_id = format_task_id("tick", instant("2024-01-01T00:00:30Z"), 0);
    assert!(scheduler1.task_manager().contains(&task_id).await);
    assert_eq!(shared.task_count(), 1);
    assert_eq!(shared.job_count(), 1);

    // leadership lost ten seconds in, in-memory state is discarded
    latch1.defeat().await;
    assert!(!scheduler1.is_leader());
    assert!(!scheduler1.is_running());
    assert!(!driver1.is_started());
    assert_eq!(scheduler1.job_count().await, 0);

    // replica two resumes from the shared store
    let scheduler2 = Arc::new(
        Scheduler::builder()
            .clock(clock.clone())
            .store(shared.clone())
            .schedule_horizon(Duration::from_secs(60))
            .build(),
    );
    let driver2 = Arc::new(NoopExecutionDriver::new());
    let latch2 = InProcessLeaderLatch::new("replica-2");
    let lifecycle2 = LeaderLifecycle::new(
        scheduler2.clone(),
        driver2.clone(),
        latch2.clone(),
        shared.clone(),
    );
    lifecycle2.start_up().await.unwrap();
    latch2.elect().await;

    let task_manager = scheduler2.task_manager();
    assert_eq!(task_manager.pending_count().await, 1);
    assert!(task_manager.contains(&task_id).await);

    let restored = scheduler2.lookup_job("tick").await.unwrap();
    assert_eq!(
        restored.as_schedule_based().unwrap().schedule,
        "R0/2024-01-01T00:01:30Z/PT1M"
    );

    // the consumed recurrence does not materialize again
    scheduler2.run_iteration().await;
    assert_eq!(task_manager.pending_count().await, 1);
    assert!(task_manager.contains(&task_id).await);

    lifecycle2.shut_down().await.unwrap();
    assert!(!scheduler2.is_running());
}

struct FailingStore;

#[async_trait]
impl StateStore for FailingStore {
    async fn persist_job(&self, _job: &Job) -> Result<(), ChronarchErrors> {
        Err(ChronarchErrors::StoreFailed("write refused".into()))
    }

    async fn remove_job(&self, _job: &Job) -> Result<(), ChronarchErrors> {
        Err(ChronarchErrors::StoreFailed("write refused".into()))
    }

    async fn persist_task(&self, _task: &ScheduledTask) -> Result<(), ChronarchErrors> {
        Err(ChronarchErrors::StoreFailed("write refused".into()))
    }

    async fn remove_task(&self, _task_id: &str) -> Result<(), ChronarchErrors> {
        Err(ChronarchErrors::StoreFailed("write refused".into()))
    }

    async fn load_jobs(&self) -> Result<Vec<Job>, ChronarchErrors> {
        Err(ChronarchErrors::StoreFailed("connection lost".into()))
    }

    async fn load_tasks(&self) -> Result<Vec<ScheduledTask>, ChronarchErrors> {
        Err(ChronarchErrors::StoreFailed("connection lost".into()))
    }
}

#[tokio::test]
async fn hydration_failure_on_election_is_fatal() {
    let store: Arc<dyn StateStore> = Arc::new(FailingStore);
    let scheduler = Arc::new(Scheduler::builder().build());
    let latch = InProcessLeaderLatch::new("replica-1");
    let lifecycle = LeaderLifecycle::new(
        scheduler,
        Arc::new(NoopExecutionDriver::new()),
        latch,
        store,
    );

    let result = lifecycle.on_elected().await;
    assert!(matches!(result, Err(ChronarchErrors::HydrationFailed(_))));
}

#[tokio::test]
async fn closing_the_latch_notifies_the_sitting_leader() {
    let shared = Arc::new(InMemoryStateStore::new());
    let scheduler = Arc::new(Scheduler::builder().store(shared.clone()).build());
    let driver = Arc::new(NoopExecutionDriver::new());
    let latch = InProcessLeaderLatch::new("replica-1");
    let lifecycle = LeaderLifecycle::new(
        scheduler.clone(),
        driver.clone(),
        latch.clone(),
        shared.clone(),
    );

    lifecycle.start_up().await.unwrap();
    latch.elect().await;
    assert!(scheduler.is_leader());

    latch.close().await.unwrap();
    assert!(!scheduler.is_leader());
    assert_eq!(latch.leader_id().await.unwrap(), None);
}
