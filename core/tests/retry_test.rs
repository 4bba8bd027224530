use chrono::{DateTime, Utc};
use chronarch::clock::{AdvanceableSchedulerClock, SchedulerClock, VirtualClock};
use chronarch::events::{JobEvent, ObserverError};
use chronarch::job::{Job, JobCommon, ScheduleBasedJob};
use chronarch::scheduler::Scheduler;
use chronarch::task::{TaskState, TaskStatus, format_task_id};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn instant(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

fn capture(scheduler: &Scheduler) -> Arc<Mutex<Vec<JobEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    scheduler.observers().attach(Arc::new(move |event: JobEvent| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(event);
            Ok::<(), ObserverError>(())
        }
    }));
    events
}

fn job_with_retries(name: &str, retries: u32) -> Job {
    ScheduleBasedJob::builder()
        .common(
            JobCommon::builder()
                .name(name)
                .command("false")
                .retries(retries)
                .build(),
        )
        .schedule("R/2030-01-01T00:00:00Z/PT1H")
        .build()
        .into()
}

fn failed(job_name: &str, due: DateTime<Utc>, attempt: u32) -> TaskStatus {
    TaskStatus::builder()
        .task_id(format_task_id(job_name, due, attempt))
        .state(TaskState::Failed)
        .build()
}

async fn fresh_scheduler(
    start: &str,
    disable_after_failures: u64,
) -> (Arc<Scheduler>, Arc<VirtualClock>) {
    let clock = Arc::new(VirtualClock::new(instant(start)));
    let scheduler = Arc::new(
        Scheduler::builder()
            .clock(clock.clone())
            .failure_retry_delay(Duration::from_secs(60))
            .disable_after_failures(disable_after_failures)
            .build(),
    );
    scheduler.mark_leader(true);
    (scheduler, clock)
}

#[tokio::test]
async fn fresh_job_retries_then_succeeds() {
    let (scheduler, clock) = fresh_scheduler("2024-02-01T00:00:00Z", 0).await;
    let now = clock.now().await;
    scheduler
        .register_jobs(vec![job_with_retries("flaky", 2)], true, now)
        .await
        .unwrap();

    scheduler.handle_failed_task(&failed("flaky", now, 0)).await;

    let retry_due = now + Duration::from_secs(60);
    let retry_id = format_task_id("flaky", retry_due, 1);
    let task_manager = scheduler.task_manager();
    assert!(task_manager.contains(&retry_id).await);
    assert_eq!(
        task_manager.time_until_execution(&retry_id).await.unwrap(),
        Duration::from_secs(60)
    );

    // the retry path rewrites nothing on the job itself
    let job = scheduler.lookup_job("flaky").await.unwrap();
    assert_eq!(job.common().error_count, 0);
    assert!(job.common().last_error.is_none());

    clock.advance(Duration::from_secs(60)).await;
    let finish = TaskStatus::builder()
        .task_id(retry_id)
        .state(TaskState::Finished)
        .build();
    scheduler.handle_finished_task(&finish, None).await;

    let job = scheduler.lookup_job("flaky").await.unwrap();
    assert_eq!(job.common().success_count, 1);
    assert_eq!(job.common().errors_since_last_success, 0);
    assert_eq!(job.common().last_success, Some(clock.now().await));
}

#[tokio::test]
async fn attempts_increase_until_retries_are_exhausted() {
    let (scheduler, clock) = fresh_scheduler("2024-02-01T00:00:00Z", 0).await;
    let now = clock.now().await;
    scheduler
        .register_jobs(vec![job_with_retries("flaky", 2)], true, now)
        .await
        .unwrap();
    let events = capture(&scheduler);
    let task_manager = scheduler.task_manager();

    scheduler.handle_failed_task(&failed("flaky", now, 0)).await;
    let first_retry = format_task_id("flaky", now + Duration::from_secs(60), 1);
    assert!(task_manager.contains(&first_retry).await);

    clock.advance(Duration::from_secs(60)).await;
    let now = clock.now().await;
    scheduler.handle_failed_task(&failed("flaky", now, 1)).await;
    let second_retry = format_task_id("flaky", now + Duration::from_secs(60), 2);
    assert!(task_manager.contains(&second_retry).await);

    clock.advance(Duration::from_secs(60)).await;
    let now = clock.now().await;
    scheduler.handle_failed_task(&failed("flaky", now, 2)).await;
    assert!(
        !task_manager
            .contains(&format_task_id("flaky", now + Duration::from_secs(60), 3))
            .await
    );

    let events = events.lock().unwrap();
    let exhausted = events
        .iter()
        .filter(|event| matches!(event, JobEvent::RetriesExhausted { .. }))
        .count();
    let disabled = events
        .iter()
        .filter(|event| matches!(event, JobEvent::Disabled { .. }))
        .count();
    assert_eq!(exhausted, 1);
    assert_eq!(disabled, 0);

    let job = scheduler.lookup_job("flaky").await.unwrap();
    assert_eq!(job.common().error_count, 1);
    assert_eq!(job.common().last_error, Some(now));
}

#[tokio::test]
async fn job_with_unredeemed_failure_does_not_reenter_the_retry_path() {
    let (scheduler, clock) = fresh_scheduler("2024-02-01T00:00:00Z", 0).await;
    let now = clock.now().await;

    // attempts are left, but the job has a recorded failure and no success since
    let mut job = job_with_retries("burned", 2);
    job.common_mut().last_error = Some(instant("2024-01-31T00:00:00Z"));
    scheduler.register_jobs(vec![job], true, now).await.unwrap();
    let events = capture(&scheduler);

    scheduler.handle_failed_task(&failed("burned", now, 0)).await;

    assert_eq!(scheduler.task_manager().pending_count().await, 0);
    let exhausted = events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, JobEvent::RetriesExhausted { .. }))
        .count();
    assert_eq!(exhausted, 1);
}

#[tokio::test]
async fn recent_success_reopens_the_retry_window() {
    let (scheduler, clock) = fresh_scheduler("2024-02-01T00:00:00Z", 0).await;
    let now = clock.now().await;

    let mut job = job_with_retries("redeemed", 2);
    job.common_mut().last_error = Some(instant("2024-01-30T00:00:00Z"));
    job.common_mut().last_success = Some(instant("2024-01-31T00:00:00Z"));
    scheduler.register_jobs(vec![job], true, now).await.unwrap();

    scheduler
        .handle_failed_task(&failed("redeemed", now, 0))
        .await;

    let retry_id = format_task_id("redeemed", now + Duration::from_secs(60), 1);
    assert!(scheduler.task_manager().contains(&retry_id).await);
}

#[tokio::test]
async fn three_consecutive_failures_disable_the_job() {
    let (scheduler, clock) = fresh_scheduler("2024-02-01T00:00:00Z", 3).await;
    let now = clock.now().await;
    scheduler
        .register_jobs(vec![job_with_retries("doomed", 0)], true, now)
        .await
        .unwrap();
    let events = capture(&scheduler);

    for round in 0..3u64 {
        let due = now + Duration::from_secs(round * 10);
        scheduler.handle_failed_task(&failed("doomed", due, 0)).await;
    }

    let job = scheduler.lookup_job("doomed").await.unwrap();
    assert!(job.is_disabled());
    assert_eq!(job.common().errors_since_last_success, 3);

    let events = events.lock().unwrap();
    let exhausted = events
        .iter()
        .filter(|event| matches!(event, JobEvent::RetriesExhausted { .. }))
        .count();
    let disabled = events
        .iter()
        .filter(|event| matches!(event, JobEvent::Disabled { .. }))
        .count();
    assert_eq!(exhausted, 2);
    assert_eq!(disabled, 1);
}
