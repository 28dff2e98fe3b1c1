//! Queue depth, capacity and throughput statistics.
//!
//! Every counter here is maintained incrementally on state transitions, so
//! building a [`QueueStatus`] never scans the job table.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::job::JobStatus;

/// Smoothing factor for the processing time moving average.
const EMA_ALPHA: f64 = 0.2;

/// Number of jobs currently held in each lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    fn slot(&mut self, status: JobStatus) -> &mut usize {
        match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Cancelled => &mut self.cancelled,
        }
    }

    pub(crate) fn added(&mut self, status: JobStatus) {
        *self.slot(status) += 1;
    }

    pub(crate) fn removed(&mut self, status: JobStatus) {
        let slot = self.slot(status);
        assert!(*slot > 0, "status count for {} underflowed", status);
        *slot -= 1;
    }

    pub(crate) fn moved(&mut self, from: JobStatus, to: JobStatus) {
        self.removed(from);
        self.added(to);
    }
}

/// Lifetime counters and the processing time average.
#[derive(Debug, Clone)]
pub struct Statistics {
    total_jobs: u64,
    completed_jobs: u64,
    failed_jobs: u64,
    cancelled_jobs: u64,
    retried_attempts: u64,
    avg_processing_ms: Option<f64>,
    started_at: DateTime<Utc>,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            total_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            cancelled_jobs: 0,
            retried_attempts: 0,
            avg_processing_ms: None,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn record_submitted(&mut self) {
        self.total_jobs += 1;
    }

    /// Fold one successful execution into the moving average.
    pub(crate) fn record_completed(&mut self, processing_ms: u64) {
        self.completed_jobs += 1;
        let sample = processing_ms as f64;
        self.avg_processing_ms = Some(match self.avg_processing_ms {
            Some(avg) => avg + EMA_ALPHA * (sample - avg),
            None => sample,
        });
    }

    pub(crate) fn record_retry(&mut self) {
        self.retried_attempts += 1;
    }

    pub(crate) fn record_failed(&mut self) {
        self.failed_jobs += 1;
    }

    pub(crate) fn record_cancelled(&mut self) {
        self.cancelled_jobs += 1;
    }

    /// Average processing time, if at least one job has completed.
    pub fn avg_processing_ms(&self) -> Option<f64> {
        self.avg_processing_ms
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            total_jobs: self.total_jobs,
            completed_jobs: self.completed_jobs,
            failed_jobs: self.failed_jobs,
            cancelled_jobs: self.cancelled_jobs,
            retried_attempts: self.retried_attempts,
            avg_processing_time_ms: self.avg_processing_ms.map_or(0, |ms| ms.round() as u64),
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Expected wait before a pending job at `position` starts, in milliseconds.
///
/// A rough hint: whole "rounds" of `max_concurrent` jobs ahead of it times
/// the average processing time.
pub fn estimate_wait_ms(position: usize, max_concurrent: usize, avg_processing_ms: f64) -> u64 {
    if position == 0 || max_concurrent == 0 {
        return 0;
    }
    let rounds = position.div_ceil(max_concurrent) as f64;
    (rounds * avg_processing_ms.max(0.0)).round() as u64
}

// ---------------------------------------------------------------------------
// Reported shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub max_concurrent: usize,
    pub current_processing: usize,
    pub available_slots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
    pub retried_attempts: u64,
    #[serde(rename = "avgProcessingTime")]
    pub avg_processing_time_ms: u64,
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
}

/// Pending jobs per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub low: usize,
    pub normal: usize,
    pub high: usize,
    pub urgent: usize,
}

/// Full queue status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue: StatusCounts,
    pub capacity: Capacity,
    pub statistics: StatisticsSnapshot,
    pub priority_queues: PriorityCounts,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
