use chrono::{DateTime, Utc};
use chronarch::clock::{SchedulerClock, VirtualClock};
use chronarch::errors::ChronarchErrors;
use chronarch::job::{Job, JobCommon, ScheduleBasedJob};
use chronarch::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;

fn instant(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

fn schedule_job(name: &str, schedule: &str) -> Job {
    ScheduleBasedJob::builder()
        .common(JobCommon::builder().name(name).command("true").build())
        .schedule(schedule)
        .build()
        .into()
}

async fn leader_scheduler(start: &str) -> (Arc<Scheduler>, Arc<VirtualClock>) {
    let clock = Arc::new(VirtualClock::new(instant(start)));
    let scheduler = Arc::new(
        Scheduler::builder()
            .clock(clock.clone())
            .schedule_horizon(Duration::from_secs(60))
            .build(),
    );
    scheduler.mark_leader(true);
    (scheduler, clock)
}

#[tokio::test]
async fn streams_and_schedules_stay_coherent() {
    let (scheduler, clock) = leader_scheduler("2024-01-01T00:00:00Z").await;
    let now = clock.now().await;

    scheduler
        .register_jobs(
            vec![schedule_job("report", "R/2030-01-01T00:00:00Z/PT1H")],
            true,
            now,
        )
        .await
        .unwrap();

    // re-registering never leaves two streams behind
    scheduler
        .register_jobs(
            vec![schedule_job("report", "R/2031-01-01T00:00:00Z/PT2H")],
            true,
            now,
        )
        .await
        .unwrap();

    scheduler.run_iteration().await;

    let streams = scheduler.streams_snapshot().await;
    assert_eq!(streams.len(), 1);
    let job = scheduler.lookup_job("report").await.unwrap();
    assert_eq!(
        streams[0].expression(),
        job.as_schedule_based().unwrap().schedule
    );
}

#[tokio::test]
async fn update_job_rebuilds_the_stream_and_runs_an_iteration() {
    let (scheduler, clock) = leader_scheduler("2024-01-01T00:00:00Z").await;
    let now = clock.now().await;

    let old = schedule_job("report", "R/2030-01-01T00:00:00Z/PT1H");
    scheduler
        .register_jobs(vec![old.clone()], true, now)
        .await
        .unwrap();

    // the replacement fires immediately, the embedded iteration materializes it
    let new = schedule_job("report", "R1/2024-01-01T00:00:10Z/PT1M");
    scheduler.update_job(&old, new).await.unwrap();

    assert_eq!(scheduler.task_manager().pending_count().await, 1);
    let job = scheduler.lookup_job("report").await.unwrap();
    assert_eq!(
        job.as_schedule_based().unwrap().schedule,
        "R0/2024-01-01T00:01:10Z/PT1M"
    );
}

#[tokio::test]
async fn updating_to_disabled_drops_the_stream() {
    let (scheduler, clock) = leader_scheduler("2024-01-01T00:00:00Z").await;
    let now = clock.now().await;

    let old = schedule_job("report", "R/2030-01-01T00:00:00Z/PT1H");
    scheduler
        .register_jobs(vec![old.clone()], true, now)
        .await
        .unwrap();
    assert_eq!(scheduler.streams_snapshot().await.len(), 1);

    scheduler
        .update_job(&old, old.with_disabled(true))
        .await
        .unwrap();
    assert!(scheduler.streams_snapshot().await.is_empty());
}

#[tokio::test]
async fn update_job_refuses_renames() {
    let (scheduler, clock) = leader_scheduler("2024-01-01T00:00:00Z").await;
    let now = clock.now().await;

    let old = schedule_job("report", "R/2030-01-01T00:00:00Z/PT1H");
    scheduler
        .register_jobs(vec![old.clone()], true, now)
        .await
        .unwrap();

    let renamed = schedule_job("report-v2", "R/2030-01-01T00:00:00Z/PT1H");
    assert!(matches!(
        scheduler.update_job(&old, renamed).await,
        Err(ChronarchErrors::JobRenameUnsupported(_, _))
    ));
}

#[tokio::test]
async fn deregistering_cancels_pending_tasks_and_drops_the_stream() {
    let (scheduler, clock) = leader_scheduler("2024-01-01T00:00:00Z").await;
    let now = clock.now().await;

    let job = schedule_job("report", "R1/2024-01-01T00:00:10Z/PT1M");
    scheduler
        .register_jobs(vec![job.clone()], true, now)
        .await
        .unwrap();
    scheduler.run_iteration().await;
    assert_eq!(scheduler.task_manager().pending_count().await, 1);

    let registered = scheduler.lookup_job("report").await.unwrap();
    scheduler.deregister_job(&registered, true).await.unwrap();

    assert!(scheduler.lookup_job("report").await.is_none());
    assert!(scheduler.streams_snapshot().await.is_empty());
    assert_eq!(scheduler.task_manager().pending_count().await, 0);
}

#[tokio::test]
async fn reset_clears_streams_and_optionally_the_queue() {
    let (scheduler, clock) = leader_scheduler("2024-01-01T00:00:00Z").await;
    let now = clock.now().await;

    scheduler
        .register_jobs(
            vec![schedule_job("report", "R1/2024-01-01T00:00:10Z/PT1M")],
            true,
            now,
        )
        .await
        .unwrap();
    scheduler.run_iteration().await;
    assert_eq!(scheduler.task_manager().pending_count().await, 1);

    scheduler.reset(false).await;
    assert_eq!(scheduler.job_count().await, 0);
    assert!(scheduler.streams_snapshot().await.is_empty());
    assert_eq!(scheduler.task_manager().pending_count().await, 1);

    scheduler.reset(true).await;
    assert_eq!(scheduler.task_manager().pending_count().await, 0);
}
