use crate::events::JobEvent;
use crate::graph::JobGraph;
use crate::job::Job;
use crate::schedule::ScheduleStream;
use crate::scheduler::{Scheduler, SchedulerState};
use crate::task::ScheduledTask;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// The decision the kernel takes for one stream head against a single instant.
pub(crate) enum StreamDecision {
    /// The head fires inside the dispatch window, a task is minted and the
    /// stream advances to its tail
    Emit {
        job: Job,
        task: ScheduledTask,
        tail: ScheduleStream,
    },
    /// The head fires beyond the epsilon window in the past, the firing is
    /// skipped and the stream advances to its tail (empty tails are forgotten)
    Skip {
        job: Job,
        missed: DateTime<Utc>,
        tail: Option<ScheduleStream>,
    },
    /// The head fires beyond the horizon, the stream is kept untouched
    Pending,
    /// The stream is forgotten: its job vertex is gone, its recurrences are
    /// exhausted, or its tail cannot be derived
    Forget,
    /// The head expression is unparsable, the stream is kept untouched and
    /// the offending expression is skipped this round
    Unparsable,
}

impl Scheduler {
    /// Runs one horizon iteration against the clock's current instant and broadcasts
    /// the accumulated events once the monitor is released
    pub async fn run_iteration(&self) {
        let now = self.clock.now().await;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            self.iteration(&mut state, now, &mut events).await;
        }
        self.observers.broadcast_all(&events).await;
    }

    /// Advances every live stream against the single instant ``now``, replacing the
    /// stream list with the survivors. Every firing materialized in this pass is
    /// consistent relative to that one instant
    pub(crate) async fn iteration(
        &self,
        state: &mut SchedulerState,
        now: DateTime<Utc>,
        events: &mut Vec<JobEvent>,
    ) {
        let streams = std::mem::take(&mut state.streams);
        let mut survivors = Vec::with_capacity(streams.len());
        for stream in streams {
            if let Some(stream) = self.advance_stream(state, now, stream, events).await {
                survivors.push(stream);
            }
        }
        state.streams = survivors;
    }

    /// Advances one stream forward through the decision kernel repeatedly, until no
    /// further task is produced or the stream is exhausted
    ///
    /// # Returns
    /// The surviving rendition of the stream, or nothing when it was forgotten
    async fn advance_stream(
        &self,
        state: &mut SchedulerState,
        now: DateTime<Utc>,
        mut stream: ScheduleStream,
        events: &mut Vec<JobEvent>,
    ) -> Option<ScheduleStream> {
        loop {
            match Self::next(&state.graph, now, self.schedule_horizon, &stream) {
                StreamDecision::Emit { job, task, tail } => {
                    let delay = (task.due - now).to_std().unwrap_or(Duration::ZERO);
                    tracing::info!(
                        job = job.name(),
                        task_id = %task.id,
                        delay_secs = delay.as_secs(),
                        "materializing firing"
                    );
                    self.task_manager.schedule_delayed(task.clone(), delay).await;
                    if let Err(error) = self.task_manager.persist_task(&task).await {
                        tracing::warn!(task_id = %task.id, %error, "failed to persist task");
                    }

                    let rewritten = job.with_schedule(tail.expression());
                    let _ = state.graph.replace_vertex(&job, rewritten.clone());
                    self.persist_job_logged(&rewritten).await;

                    stream = tail;
                }
                StreamDecision::Skip { job, missed, tail } => {
                    tracing::info!(job = job.name(), %missed, "skipping missed firing");
                    events.push(JobEvent::Skipped { job, missed });
                    match tail {
                        Some(tail) => stream = tail,
                        None => return None,
                    }
                }
                StreamDecision::Pending | StreamDecision::Unparsable => return Some(stream),
                StreamDecision::Forget => return None,
            }
        }
    }

    /// The decision kernel: resolves what one stream head means against ``now``.
    ///
    /// The dispatch window is ``(now - epsilon, now + horizon)`` exclusive on both
    /// ends, firings inside it are emitted, firings at or after ``now`` stay pending,
    /// and firings that fell past the epsilon tolerance are skipped. An exhausted head
    /// forgets the stream, actual vertex removal stays deferred since a pending task
    /// may still fire
    pub(crate) fn next(
        graph: &JobGraph,
        now: DateTime<Utc>,
        horizon: Duration,
        stream: &ScheduleStream,
    ) -> StreamDecision {
        let Some(job) = graph.lookup_vertex(stream.job_name()).cloned() else {
            return StreamDecision::Forget;
        };

        let Some(head) = stream.parse_head() else {
            tracing::warn!(
                job = stream.job_name(),
                expression = stream.expression(),
                "unparsable schedule expression"
            );
            return StreamDecision::Unparsable;
        };

        if head.recurrences == 0 {
            return StreamDecision::Forget;
        }

        let window_begin = now - job.common().epsilon;
        let window_end = now + horizon;

        if head.next_fire > window_begin && head.next_fire < window_end {
            let task = ScheduledTask::new(&job, head.next_fire, 0);
            match stream.tail() {
                Some(tail) => StreamDecision::Emit { job, task, tail },
                None => StreamDecision::Forget,
            }
        } else if head.next_fire >= now {
            StreamDecision::Pending
        } else {
            StreamDecision::Skip {
                job,
                missed: head.next_fire,
                tail: stream.tail(),
            }
        }
    }
}
