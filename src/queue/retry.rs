//! Retry controller: the one place that decides between requeue and failure.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::events::QueueEvent;
use super::job::{Job, JobId, JobStatus};
use super::QueueState;

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put it back at the end of its priority tier.
    Requeue,
    /// Attempts exhausted; the job is permanently failed.
    Fail,
}

impl RetryDecision {
    pub fn for_job(job: &Job) -> Self {
        if job.can_retry() {
            RetryDecision::Requeue
        } else {
            RetryDecision::Fail
        }
    }
}

impl QueueState {
    /// Apply the retry policy to a failed attempt of a processing job.
    pub(crate) fn handle_failure(
        &mut self,
        id: &JobId,
        error: String,
        elapsed: Duration,
        now: DateTime<Utc>,
    ) -> QueueEvent {
        let job = self.job_mut(id);
        match RetryDecision::for_job(job) {
            RetryDecision::Requeue => {
                job.mark_retry(elapsed, now);
                let attempt = job.attempts;
                let priority = job.priority;

                self.index.insert(*id, priority);
                self.counts.moved(JobStatus::Processing, JobStatus::Pending);
                self.stats.record_retry();
                QueueEvent::JobRetry {
                    job_id: *id,
                    attempt,
                    error,
                }
            }
            RetryDecision::Fail => {
                job.mark_failed(error.clone(), elapsed, now);
                let attempts = job.attempts;
                let signature = job.signature().clone();

                self.dedup.release(&signature, *id);
                self.counts.moved(JobStatus::Processing, JobStatus::Failed);
                self.stats.record_failed();
                QueueEvent::JobFailed {
                    job_id: *id,
                    attempts,
                    error,
                }
            }
        }
    }
}
