use chronarch::events::{JobEvent, JobObserver};
use chronarch::job::{DependencyBasedJob, Job, JobCommon, ScheduleBasedJob};
use chronarch::stats::{InMemoryHistoryStore, JobStats, RunState};
use chronarch::task::{TaskState, TaskStatus};

fn schedule_job(name: &str) -> Job {
    ScheduleBasedJob::builder()
        .common(
            JobCommon::builder()
                .name(name)
                .command("true")
                .owner("ops@example.com")
                .build(),
        )
        .schedule("R/2030-01-01T00:00:00Z/PT1H")
        .build()
        .into()
}

fn dependency_job(name: &str, parents: &[&str]) -> Job {
    DependencyBasedJob::builder()
        .common(JobCommon::builder().name(name).command("true").build())
        .parents(parents.iter().map(|parent| (*parent).to_owned()).collect())
        .build()
        .into()
}

fn status(task_id: &str, state: TaskState, slave: &str) -> TaskStatus {
    TaskStatus::builder()
        .task_id(task_id)
        .state(state)
        .slave_id(slave)
        .message("reported")
        .build()
}

#[tokio::test]
async fn running_is_never_downgraded_to_queued() {
    let stats = JobStats::new(InMemoryHistoryStore::new());

    stats.mark_queued("etl");
    assert_eq!(stats.run_state("etl"), RunState::Queued);

    let job = schedule_job("etl");
    let started = JobEvent::Started {
        job: job.clone(),
        status: status("ct1:etl:1704067200000:0", TaskState::Running, "node-1"),
        attempt: 0,
    };
    stats.notify(&started).await.unwrap();
    assert_eq!(stats.run_state("etl"), RunState::Running);

    stats.mark_queued("etl");
    assert_eq!(stats.run_state("etl"), RunState::Running);

    let finished = JobEvent::Finished {
        job,
        status: status("ct1:etl:1704067200000:0", TaskState::Finished, "node-1"),
        attempt: 0,
        latency: std::time::Duration::from_secs(3),
    };
    stats.notify(&finished).await.unwrap();
    assert_eq!(stats.run_state("etl"), RunState::Idle);
}

#[tokio::test]
async fn history_rows_carry_the_job_shape() {
    let history = InMemoryHistoryStore::new();
    let stats = JobStats::new(history.clone());

    let sched = schedule_job("etl");
    stats
        .notify(&JobEvent::Started {
            job: sched.clone(),
            status: status("ct1:etl:1704067200000:0", TaskState::Running, "node-1"),
            attempt: 0,
        })
        .await
        .unwrap();

    let dep = dependency_job("report", &["etl"]);
    stats
        .notify(&JobEvent::Failed {
            job: Some(dep.clone()),
            job_name: "report".to_owned(),
            status: status("ct1:report:1704067260000:2", TaskState::Lost, "node-2"),
            attempt: 2,
        })
        .await
        .unwrap();

    let sched_rows = history.rows_for("ct1:etl:1704067200000:0");
    assert_eq!(sched_rows.len(), 1);
    assert_eq!(sched_rows[0].job_owner, "ops@example.com");
    assert_eq!(
        sched_rows[0].job_schedule.as_deref(),
        Some("R/2030-01-01T00:00:00Z/PT1H")
    );
    assert!(sched_rows[0].job_parents.is_none());
    assert!(!sched_rows[0].is_failure);

    let dep_rows = history.rows_for("ct1:report:1704067260000:2");
    assert_eq!(dep_rows.len(), 1);
    assert_eq!(dep_rows[0].attempt, 2);
    assert!(dep_rows[0].is_failure);
    assert_eq!(
        dep_rows[0].job_parents.as_ref().map(|parents| parents.len()),
        Some(1)
    );
    assert_eq!(dep_rows[0].slave_id, "node-2");
}

#[tokio::test]
async fn element_counts_only_land_once_a_row_exists() {
    let history = InMemoryHistoryStore::new();
    let stats = JobStats::new(history.clone());

    stats
        .update_elements_processed("etl", "ct1:etl:1704067200000:0", 500)
        .await;
    assert_eq!(history.elements_processed("etl", "ct1:etl:1704067200000:0"), 0);

    stats
        .notify(&JobEvent::Started {
            job: schedule_job("etl"),
            status: status("ct1:etl:1704067200000:0", TaskState::Running, "node-1"),
            attempt: 0,
        })
        .await
        .unwrap();

    stats
        .update_elements_processed("etl", "ct1:etl:1704067200000:0", 500)
        .await;
    stats
        .update_elements_processed("etl", "ct1:etl:1704067200000:0", 250)
        .await;
    assert_eq!(
        history.elements_processed("etl", "ct1:etl:1704067200000:0"),
        750
    );
}

#[tokio::test]
async fn removal_forgets_the_tracked_state() {
    let stats = JobStats::new(InMemoryHistoryStore::new());
    let job = schedule_job("etl");

    stats
        .notify(&JobEvent::Registered { job: job.clone() })
        .await
        .unwrap();
    stats.mark_queued("etl");
    stats
        .notify(&JobEvent::Removed { job })
        .await
        .unwrap();
    assert_eq!(stats.run_state("etl"), RunState::Idle);
}
