//! Scheduler loop: fills free concurrency slots from the priority index.
//!
//! A pass runs on every poll tick and whenever a submission or a finished
//! attempt wakes it. Each dispatched job runs in its own task under the
//! configured timeout; the queue lock is only held while picking jobs and
//! while recording the outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::events::QueueEvent;
use super::job::{AuditOptions, JobId, JobStatus};
use super::{AuditQueue, QueueState};
use crate::executor::AuditExecutor;

/// A job picked for execution, detached from the lock.
#[derive(Debug)]
struct Dispatch {
    id: JobId,
    target: String,
    options: AuditOptions,
    attempt: u32,
}

/// Result of one execution attempt.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Succeeded(Value),
    Failed(String),
}

/// Main scheduler loop. Returns once the queue is shut down.
pub async fn run_scheduler_loop(queue: AuditQueue) {
    info!("scheduler started");

    let mut interval = tokio::time::interval(queue.inner.config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = queue.inner.shutdown.cancelled() => break,
            _ = interval.tick() => {}
            _ = queue.inner.wake.notified() => {}
        }

        let dispatched = queue.dispatch_ready().await;
        if dispatched > 0 {
            debug!(dispatched, "scheduling pass");
        }
    }

    info!("scheduler stopped");
}

impl AuditQueue {
    /// Run one scheduling pass and return how many jobs were started.
    pub async fn dispatch_ready(&self) -> usize {
        if self.is_shutdown() {
            return 0;
        }

        let batch = {
            let mut state = self.inner.state.write().await;
            let picked = state.take_ready(self.inner.config.max_concurrent, Utc::now());
            // Emitted under the lock so observers see dispatch order.
            for d in &picked {
                self.inner.events.emit(QueueEvent::JobStarted {
                    job_id: d.id,
                    attempt: d.attempt,
                });
            }
            picked
        };

        let count = batch.len();
        for dispatch in batch {
            info!(
                job_id = %dispatch.id,
                target = %dispatch.target,
                attempt = dispatch.attempt,
                "job started"
            );
            tokio::spawn(self.clone().run_attempt(dispatch));
        }
        count
    }

    /// Execute one attempt under the job timeout and record its outcome.
    async fn run_attempt(self, dispatch: Dispatch) {
        let timeout = self.inner.config.job_timeout();
        let start = Instant::now();
        let outcome = execute_with_timeout(
            Arc::clone(&self.inner.executor),
            dispatch.target.clone(),
            dispatch.options,
            timeout,
        )
        .await;
        let elapsed = start.elapsed();

        let event = {
            let mut state = self.inner.state.write().await;
            let event = state.finish_attempt(&dispatch.id, outcome, elapsed, Utc::now());
            self.inner.events.emit(event.clone());
            event
        };

        match &event {
            QueueEvent::JobCompleted { processing_time_ms, .. } => {
                info!(job_id = %dispatch.id, processing_time_ms, "job completed");
            }
            QueueEvent::JobRetry { attempt, error, .. } => {
                warn!(job_id = %dispatch.id, attempt, error = %error, "attempt failed, job requeued");
            }
            QueueEvent::JobFailed { attempts, error, .. } => {
                error!(job_id = %dispatch.id, attempts, error = %error, "job failed");
            }
            _ => {}
        }

        self.inner.wake.notify_one();
    }
}

/// Run the executor in its own task so a panic or an overrun cannot take the
/// slot with it. On timeout the task is aborted.
async fn execute_with_timeout(
    executor: Arc<dyn AuditExecutor>,
    target: String,
    options: AuditOptions,
    timeout: Duration,
) -> AttemptOutcome {
    let mut handle =
        tokio::spawn(async move { executor.execute(&target, &options).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(result))) => AttemptOutcome::Succeeded(result),
        Ok(Ok(Err(e))) => AttemptOutcome::Failed(format!("{:#}", e)),
        Ok(Err(join_err)) => AttemptOutcome::Failed(format!("executor task failed: {}", join_err)),
        Err(_) => {
            handle.abort();
            AttemptOutcome::Failed(format!("audit timed out after {}ms", timeout.as_millis()))
        }
    }
}

impl QueueState {
    /// Pop pending jobs into free slots, marking each as processing.
    fn take_ready(&mut self, max_concurrent: usize, now: chrono::DateTime<Utc>) -> Vec<Dispatch> {
        let mut picked = Vec::new();
        while self.counts.processing < max_concurrent {
            let Some(id) = self.index.pop() else {
                break;
            };
            let job = self.job_mut(&id);
            job.mark_processing(now);
            let dispatch = Dispatch {
                id,
                target: job.target.clone(),
                options: job.options.clone(),
                attempt: job.attempts,
            };
            self.counts.moved(JobStatus::Pending, JobStatus::Processing);
            picked.push(dispatch);
        }
        picked
    }

    /// Record the outcome of an attempt. Failures go through the retry
    /// controller.
    pub(crate) fn finish_attempt(
        &mut self,
        id: &JobId,
        outcome: AttemptOutcome,
        elapsed: Duration,
        now: chrono::DateTime<Utc>,
    ) -> QueueEvent {
        match outcome {
            AttemptOutcome::Succeeded(result) => {
                let job = self.job_mut(id);
                job.mark_completed(result, elapsed, now);
                let processing_time_ms = job.processing_time_ms.unwrap_or_default();
                let signature = job.signature().clone();

                self.dedup.release(&signature, *id);
                self.counts.moved(JobStatus::Processing, JobStatus::Completed);
                self.stats.record_completed(processing_time_ms);
                QueueEvent::JobCompleted {
                    job_id: *id,
                    processing_time_ms,
                }
            }
            AttemptOutcome::Failed(error) => self.handle_failure(id, error, elapsed, now),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
