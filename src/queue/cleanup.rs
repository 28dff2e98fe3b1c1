//! Eviction of terminal jobs past the retention window.

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::job::JobId;
use super::{AuditQueue, QueueState};

/// Periodic cleanup task. Returns once the queue is shut down.
pub async fn run_cleanup_loop(queue: AuditQueue) {
    let mut interval = tokio::time::interval(queue.inner.config.cleanup_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing can be expired yet.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = queue.inner.shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        queue.cleanup_expired().await;
    }

    debug!("cleanup task stopped");
}

impl AuditQueue {
    /// Evict terminal jobs whose retention window has elapsed. Returns the
    /// number of jobs removed.
    pub async fn cleanup_expired(&self) -> usize {
        // A retention too large to represent means nothing ever expires.
        let Some(cutoff) = chrono::Duration::from_std(self.inner.config.retention())
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return 0;
        };

        let evicted = {
            let mut state = self.inner.state.write().await;
            state.evict_finished_before(cutoff)
        };

        if evicted > 0 {
            info!(evicted, "evicted expired jobs");
        } else {
            debug!("cleanup pass found nothing to evict");
        }
        evicted
    }
}

impl QueueState {
    /// Remove terminal jobs that finished before `cutoff`. Pending and
    /// processing jobs are never touched.
    pub(crate) fn evict_finished_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<JobId> = self
            .store
            .jobs()
            .filter(|job| job.status.is_terminal())
            .filter(|job| job.completed_at.is_some_and(|at| at < cutoff))
            .map(|job| job.id)
            .collect();

        for id in &expired {
            if let Some(job) = self.store.remove(id) {
                self.counts.removed(job.status);
            }
        }
        expired.len()
    }
}
