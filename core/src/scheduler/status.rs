use crate::events::JobEvent;
use crate::job::Job;
use crate::schedule;
use crate::scheduler::{Scheduler, SchedulerState};
use crate::task::{ScheduledTask, TaskState, TaskStatus, parse_task_id};
use chrono::{DateTime, Utc};
use std::time::Duration;

impl Scheduler {
    /// Routes one inbound status callback to its lifecycle handler, the single entry
    /// point a resource-manager driver feeds. ``LOST`` tasks are treated as failures
    pub async fn handle_task_status(&self, status: &TaskStatus) {
        match status.state {
            TaskState::Running => self.handle_started_task(status).await,
            TaskState::Finished => self.handle_finished_task(status, None).await,
            TaskState::Failed | TaskState::Lost => self.handle_failed_task(status).await,
            TaskState::Killed => self.handle_killed_task(status).await,
        }
    }

    /// Applies a ``RUNNING`` status callback from the resource-manager driver.
    ///
    /// Identifiers of a foreign version or layout, and identifiers naming a job that is
    /// no longer registered, are dropped silently. Starting a dependency-based job clears
    /// its dependency invocation set, the next round of parent completions counts afresh
    pub async fn handle_started_task(&self, status: &TaskStatus) {
        let Ok(parsed) = parse_task_id(&status.task_id) else {
            tracing::debug!(task_id = %status.task_id, "dropping unparsable task id");
            return;
        };

        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let Some(job) = state.graph.lookup_vertex(&parsed.job_name).cloned() else {
                return;
            };

            tracing::info!(job = job.name(), task_id = %status.task_id, "task started");
            events.push(JobEvent::Started {
                job: job.clone(),
                status: status.clone(),
                attempt: parsed.attempt,
            });

            if job.is_dependency_based() {
                state.graph.reset_dependency_invocations(job.name());
            }
        }
        self.observers.broadcast_all(&events).await;
    }

    /// Applies a ``FINISHED`` status callback from the resource-manager driver.
    ///
    /// The job's success counters advance and are written through, dependent children
    /// whose parents have now all completed are enqueued at ``task_date`` (defaulting to
    /// the current instant), and a schedule-based job whose recurrences are exhausted is
    /// flipped to disabled exactly once
    pub async fn handle_finished_task(&self, status: &TaskStatus, task_date: Option<DateTime<Utc>>) {
        let Ok(parsed) = parse_task_id(&status.task_id) else {
            tracing::debug!(task_id = %status.task_id, "dropping unparsable task id");
            return;
        };

        let now = self.clock.now().await;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let Some(job) = state.graph.lookup_vertex(&parsed.job_name).cloned() else {
                return;
            };

            let latency = (now - parsed.due).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(
                job = job.name(),
                task_id = %status.task_id,
                latency_ms = latency.as_millis() as u64,
                "task finished"
            );
            events.push(JobEvent::Finished {
                job: job.clone(),
                status: status.clone(),
                attempt: parsed.attempt,
                latency,
            });

            let updated = job.with_success(now);
            let _ = state.graph.replace_vertex(&job, updated.clone());
            self.persist_job_logged(&updated).await;
            self.task_manager.remove_task(&status.task_id).await;

            self.process_dependencies(&mut state, &parsed.job_name, task_date.unwrap_or(now))
                .await;

            if let Job::ScheduleBased(sched) = &updated
                && let Some(head) =
                    schedule::parse(&sched.schedule, sched.schedule_time_zone.as_deref())
                && head.recurrences == 0
                && !updated.is_disabled()
            {
                let disabled = updated.with_disabled(true);
                let message = format!(
                    "Job `{}` has exhausted its recurrences and was disabled",
                    disabled.name()
                );
                events.push(JobEvent::Disabled {
                    job: disabled.clone(),
                    message,
                });
                let _ = state.graph.replace_vertex(&updated, disabled.clone());
                self.persist_job_logged(&disabled).await;
            }
        }
        self.observers.broadcast_all(&events).await;
    }

    /// Applies a ``FAILED`` or ``LOST`` status callback from the resource-manager driver.
    ///
    /// A retry is scheduled one [`failure retry delay`](Scheduler) ahead, with the attempt
    /// advanced, only while attempts are left and the job either has no recorded failure
    /// yet or has succeeded since its last one. A job that failed once and never succeeded
    /// since cannot re-enter the retry path until a success lands, mirroring the historical
    /// retry window. Otherwise the failure is terminal: counters advance, the job may flip
    /// to disabled when the consecutive-failure threshold is crossed, and a soft-error job
    /// still triggers its dependents as if it had succeeded
    pub async fn handle_failed_task(&self, status: &TaskStatus) {
        let Ok(parsed) = parse_task_id(&status.task_id) else {
            tracing::debug!(task_id = %status.task_id, "dropping unparsable task id");
            return;
        };

        let now = self.clock.now().await;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let Some(job) = state.graph.lookup_vertex(&parsed.job_name).cloned() else {
                tracing::warn!(job = %parsed.job_name, "task failure for unregistered job");
                return;
            };

            tracing::info!(job = job.name(), task_id = %status.task_id, attempt = parsed.attempt, "task failed");
            events.push(JobEvent::Failed {
                job: Some(job.clone()),
                job_name: parsed.job_name.clone(),
                status: status.clone(),
                attempt: parsed.attempt,
            });
            self.task_manager.remove_task(&status.task_id).await;

            let common = job.common();
            let has_attempts_left = parsed.attempt < common.retries;
            let had_recent_success = match (common.last_error, common.last_success) {
                (Some(error), Some(success)) => success >= error,
                _ => false,
            };

            if has_attempts_left && (common.last_error.is_none() || had_recent_success) {
                let due = now + self.failure_retry_delay;
                let retry = ScheduledTask::new(&job, due, parsed.attempt + 1);
                tracing::info!(
                    job = job.name(),
                    task_id = %retry.id,
                    "scheduling retry"
                );
                if let Err(error) = self.task_manager.persist_task(&retry).await {
                    tracing::warn!(task_id = %retry.id, %error, "failed to persist retry task");
                }
                self.task_manager
                    .schedule_delayed(retry, self.failure_retry_delay)
                    .await;
            } else {
                let disable = self.disable_after_failures > 0
                    && common.errors_since_last_success + 1 >= self.disable_after_failures;
                let updated = job.with_failure(now, disable);
                if let Err(error) = self
                    .update_job_locked(&mut state, &job, updated.clone(), &mut events)
                    .await
                {
                    tracing::warn!(job = job.name(), %error, "failed to rewrite job after failure");
                }

                if updated.common().soft_error {
                    self.process_dependencies(&mut state, &parsed.job_name, now)
                        .await;
                }

                if disable {
                    let message = format!(
                        "Job `{}` was disabled after {} consecutive failures",
                        updated.name(),
                        updated.common().errors_since_last_success
                    );
                    events.push(JobEvent::Disabled {
                        job: updated,
                        message,
                    });
                } else {
                    events.push(JobEvent::RetriesExhausted {
                        job: updated,
                        task_id: status.task_id.clone(),
                        attempt: parsed.attempt,
                    });
                }
            }
        }
        self.observers.broadcast_all(&events).await;
    }

    /// Applies a ``KILLED`` status callback from the resource-manager driver, observed
    /// as a failure with no job-state change
    pub async fn handle_killed_task(&self, status: &TaskStatus) {
        let Ok(parsed) = parse_task_id(&status.task_id) else {
            tracing::debug!(task_id = %status.task_id, "dropping unparsable task id");
            return;
        };

        let mut events = Vec::new();
        {
            let state = self.state.lock().await;
            let job = state.graph.lookup_vertex(&parsed.job_name).cloned();
            tracing::info!(job = %parsed.job_name, task_id = %status.task_id, "task killed");
            events.push(JobEvent::Failed {
                job,
                job_name: parsed.job_name.clone(),
                status: status.clone(),
                attempt: parsed.attempt,
            });
        }
        self.observers.broadcast_all(&events).await;
    }

    /// Enqueues a fresh task for every executable, non-disabled child of the completed
    /// job, due at ``task_date`` and carrying the child's priority flag
    pub(crate) async fn process_dependencies(
        &self,
        state: &mut SchedulerState,
        completed: &str,
        task_date: DateTime<Utc>,
    ) {
        for child_name in state.graph.get_executable_children(completed) {
            let Some(child) = state.graph.lookup_vertex(&child_name).cloned() else {
                continue;
            };
            if child.is_disabled() {
                continue;
            }

            let task = ScheduledTask::new(&child, task_date, 0);
            tracing::info!(
                job = child.name(),
                task_id = %task.id,
                "dependencies satisfied, enqueueing child"
            );
            if let Err(error) = self.task_manager.persist_task(&task).await {
                tracing::warn!(task_id = %task.id, %error, "failed to persist task");
            }
            self.task_manager
                .enqueue(task, child.common().high_priority)
                .await;
        }
    }
}
