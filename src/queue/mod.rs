//! In-process audit job queue.
//!
//! [`AuditQueue`] accepts audit requests, collapses duplicates, keeps pending
//! jobs in strict priority order, runs at most `max_concurrent` audits at a
//! time, retries failures and evicts old results. All shared state lives in
//! one `QueueState` behind a single lock; executor calls run in their own
//! tasks and never hold it.
//!
//! ```
//! use std::sync::Arc;
//! use auditq::config::QueueConfig;
//! use auditq::executor::AuditExecutor;
//! use auditq::queue::{AuditOptions, AuditQueue, Priority};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl AuditExecutor for Echo {
//!     async fn execute(&self, target: &str, _: &AuditOptions) -> anyhow::Result<serde_json::Value> {
//!         Ok(serde_json::json!({ "url": target }))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let queue = AuditQueue::new(QueueConfig::default(), Arc::new(Echo)).unwrap();
//! let first = queue
//!     .submit("https://example.com", AuditOptions::new(), Priority::High)
//!     .await
//!     .unwrap();
//! let again = queue
//!     .submit("https://EXAMPLE.com/#about", AuditOptions::new(), Priority::Low)
//!     .await
//!     .unwrap();
//!
//! assert_eq!(first.position, 1);
//! assert!(again.duplicate);
//! assert_eq!(again.job_id, first.job_id);
//! # });
//! ```

pub mod cleanup;
pub mod dedup;
pub mod events;
pub mod index;
pub mod job;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::executor::AuditExecutor;

use self::dedup::DedupIndex;
use self::events::EventNotifier;
use self::index::PriorityIndex;
use self::stats::{estimate_wait_ms, Capacity, PriorityCounts, Statistics, StatusCounts};
use self::store::{JobStore, MemoryJobStore};

pub use self::events::QueueEvent;
pub use self::job::{normalize_target, AuditOptions, Job, JobId, JobStatus, Priority};
pub use self::stats::QueueStatus;

// ---------------------------------------------------------------------------
// Reported shapes
// ---------------------------------------------------------------------------

/// Outcome of a single submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub job_id: JobId,
    pub status: JobStatus,
    /// 1-based rank among pending jobs; 0 once the job is processing.
    pub position: usize,
    /// Rough wait before the job starts, in milliseconds.
    #[serde(rename = "estimatedWait")]
    pub estimated_wait_ms: u64,
    /// True when the request attached to an existing live job.
    pub duplicate: bool,
}

/// Outcome of a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmission {
    pub batch_id: Uuid,
    pub jobs: Vec<Submission>,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(rename = "estimatedWait", skip_serializing_if = "Option::is_none")]
    pub estimated_wait_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// QueueState
// ---------------------------------------------------------------------------

/// Everything the queue mutates, guarded as one unit.
pub(crate) struct QueueState {
    store: Box<dyn JobStore>,
    index: PriorityIndex,
    dedup: DedupIndex,
    counts: StatusCounts,
    stats: Statistics,
}

impl QueueState {
    pub(crate) fn new(store: Box<dyn JobStore>) -> Self {
        Self {
            store,
            index: PriorityIndex::new(),
            dedup: DedupIndex::new(),
            counts: StatusCounts::default(),
            stats: Statistics::new(),
        }
    }

    /// Look up a job the indexes claim exists.
    ///
    /// Panics if the job table disagrees with the indexes.
    pub(crate) fn job_mut(&mut self, id: &JobId) -> &mut Job {
        match self.store.get_mut(id) {
            Some(job) => job,
            None => panic!("job {} is indexed but missing from the job table", id),
        }
    }

    /// Insert a new job or attach to the live one with the same signature.
    /// Returns the job id and whether it was a duplicate.
    fn enqueue(
        &mut self,
        target: Url,
        options: AuditOptions,
        priority: Priority,
        max_attempts: u32,
    ) -> (JobId, bool) {
        let job = Job::new(target, options, priority, max_attempts);

        if let Some(existing) = self.dedup.get(job.signature()) {
            let live = self.store.get(&existing).map(|j| j.status.is_live());
            assert_eq!(
                live,
                Some(true),
                "dedup index points at job {} which is not live",
                existing
            );
            return (existing, true);
        }

        let id = job.id;
        self.dedup.claim(job.signature().clone(), id);
        self.index.insert(id, priority);
        self.counts.added(JobStatus::Pending);
        self.stats.record_submitted();
        self.store.insert(job);
        (id, false)
    }

    fn submission(&self, id: JobId, duplicate: bool, config: &QueueConfig) -> Submission {
        let status = self
            .store
            .get(&id)
            .map(|j| j.status)
            .unwrap_or_else(|| panic!("submitted job {} missing from the job table", id));
        let position = self.index.position(&id).unwrap_or(0);
        Submission {
            job_id: id,
            status,
            position,
            estimated_wait_ms: self.estimate_wait(position, config),
            duplicate,
        }
    }

    fn estimate_wait(&self, position: usize, config: &QueueConfig) -> u64 {
        let avg = self
            .stats
            .avg_processing_ms()
            .unwrap_or(config.default_estimate_ms as f64);
        estimate_wait_ms(position, config.max_concurrent, avg)
    }

    fn cancel(&mut self, id: &JobId, now: DateTime<Utc>) -> bool {
        match self.store.get(id) {
            Some(job) if job.status == JobStatus::Pending => {}
            _ => return false,
        }

        let removed = self.index.remove(id);
        assert!(removed, "pending job {} missing from the priority index", id);

        let job = self.job_mut(id);
        job.mark_cancelled(now);
        let signature = job.signature().clone();

        self.dedup.release(&signature, *id);
        self.counts.moved(JobStatus::Pending, JobStatus::Cancelled);
        self.stats.record_cancelled();
        true
    }

    fn status(&self, config: &QueueConfig) -> QueueStatus {
        let processing = self.counts.processing;
        QueueStatus {
            queue: self.counts,
            capacity: Capacity {
                max_concurrent: config.max_concurrent,
                current_processing: processing,
                available_slots: config.max_concurrent.saturating_sub(processing),
            },
            statistics: self.stats.snapshot(),
            priority_queues: PriorityCounts {
                low: self.index.tier_len(Priority::Low),
                normal: self.index.tier_len(Priority::Normal),
                high: self.index.tier_len(Priority::High),
                urgent: self.index.tier_len(Priority::Urgent),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// AuditQueue
// ---------------------------------------------------------------------------

struct Inner {
    config: QueueConfig,
    state: RwLock<QueueState>,
    executor: Arc<dyn AuditExecutor>,
    events: EventNotifier,
    /// Wakes the scheduler when a job is added or a slot frees.
    wake: Notify,
    shutdown: CancellationToken,
    started: AtomicBool,
}

/// Handle to an audit queue. Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct AuditQueue {
    inner: Arc<Inner>,
}

impl AuditQueue {
    /// Create a queue backed by the in-memory job store.
    ///
    /// The queue does not dispatch anything until [`AuditQueue::start`].
    pub fn new(config: QueueConfig, executor: Arc<dyn AuditExecutor>) -> Result<Self> {
        Self::with_store(config, executor, Box::new(MemoryJobStore::new()))
    }

    /// Create a queue backed by a custom job store.
    pub fn with_store(
        config: QueueConfig,
        executor: Arc<dyn AuditExecutor>,
        store: Box<dyn JobStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(QueueState::new(store)),
                executor,
                events: EventNotifier::new(),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Receive lifecycle events for this queue.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Spawn the scheduler and cleanup tasks. Calling it again is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("audit queue already started");
            return;
        }
        info!(
            max_concurrent = self.inner.config.max_concurrent,
            max_attempts = self.inner.config.max_attempts,
            job_timeout_ms = self.inner.config.job_timeout_ms,
            "starting audit queue"
        );
        tokio::spawn(scheduler::run_scheduler_loop(self.clone()));
        tokio::spawn(cleanup::run_cleanup_loop(self.clone()));
    }

    /// Stop the background tasks. In-flight audits run to completion or
    /// timeout; nothing new is dispatched.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Submit an audit of `target`.
    pub async fn submit(
        &self,
        target: &str,
        options: AuditOptions,
        priority: Priority,
    ) -> Result<Submission, QueueError> {
        let url = normalize_target(target)?;
        let submission = {
            let mut state = self.inner.state.write().await;
            self.enqueue_locked(&mut state, url, options, priority)
        };
        self.inner.wake.notify_one();
        Ok(submission)
    }

    /// Submit several targets with shared options and priority.
    ///
    /// Every target is validated before anything is queued, so a rejected
    /// batch leaves no jobs behind.
    pub async fn submit_batch(
        &self,
        targets: &[String],
        options: AuditOptions,
        priority: Priority,
    ) -> Result<BatchSubmission, QueueError> {
        if targets.is_empty() {
            return Err(QueueError::EmptyBatch);
        }
        let max = self.inner.config.max_batch_size;
        if targets.len() > max {
            return Err(QueueError::BatchTooLarge {
                max,
                got: targets.len(),
            });
        }

        let urls = targets
            .iter()
            .map(|t| normalize_target(t))
            .collect::<Result<Vec<_>, _>>()?;

        let batch_id = Uuid::new_v4();
        let jobs = {
            let mut state = self.inner.state.write().await;
            urls.into_iter()
                .map(|url| self.enqueue_locked(&mut state, url, options.clone(), priority))
                .collect::<Vec<_>>()
        };
        self.inner.wake.notify_one();

        info!(batch_id = %batch_id, count = jobs.len(), "batch submitted");
        Ok(BatchSubmission { batch_id, jobs })
    }

    fn enqueue_locked(
        &self,
        state: &mut QueueState,
        url: Url,
        options: AuditOptions,
        priority: Priority,
    ) -> Submission {
        let config = &self.inner.config;
        let target = url.to_string();
        let (id, duplicate) = state.enqueue(url, options, priority, config.max_attempts);
        let submission = state.submission(id, duplicate, config);

        if duplicate {
            debug!(job_id = %id, target = %target, "duplicate submission attached to live job");
        } else {
            info!(
                job_id = %id,
                target = %target,
                priority = %priority,
                position = submission.position,
                "job queued"
            );
            self.inner.events.emit(QueueEvent::JobAdded {
                job_id: id,
                target,
                priority,
                position: submission.position,
            });
        }
        submission
    }

    /// Snapshot of one job, with its live rank if it is still pending.
    pub async fn job(&self, id: &JobId) -> Result<JobSnapshot, QueueError> {
        let state = self.inner.state.read().await;
        let job = state.store.get(id).ok_or(QueueError::NotFound(*id))?.clone();
        let position = state.index.position(id);
        let estimated_wait_ms = position.map(|p| state.estimate_wait(p, &self.inner.config));
        Ok(JobSnapshot {
            job,
            position,
            estimated_wait_ms,
        })
    }

    /// Cancel a pending job. Returns false if the job is unknown or no longer
    /// pending; in-flight audits are never interrupted.
    pub async fn cancel(&self, id: &JobId) -> bool {
        let cancelled = {
            let mut state = self.inner.state.write().await;
            state.cancel(id, Utc::now())
        };
        if cancelled {
            info!(job_id = %id, "job cancelled");
            self.inner.events.emit(QueueEvent::JobCancelled { job_id: *id });
        } else {
            debug!(job_id = %id, "cancel refused: job unknown or not pending");
        }
        cancelled
    }

    /// Queue depth, capacity and statistics. Read-only.
    pub async fn status(&self) -> QueueStatus {
        let state = self.inner.state.read().await;
        state.status(&self.inner.config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::{json, Value};

    pub(crate) struct NoopExecutor;

    #[async_trait::async_trait]
    impl AuditExecutor for NoopExecutor {
        async fn execute(&self, target: &str, _options: &AuditOptions) -> Result<Value> {
            Ok(json!({ "url": target }))
        }
    }

    pub(crate) fn test_config() -> QueueConfig {
        QueueConfig {
            max_concurrent: 2,
            max_attempts: 2,
            job_timeout_ms: 1_000,
            poll_interval_ms: 50,
            retention_secs: 86_400,
            cleanup_interval_secs: 60,
            max_batch_size: 3,
            default_estimate_ms: 1_000,
        }
    }

    fn make_queue() -> AuditQueue {
        AuditQueue::new(test_config(), Arc::new(NoopExecutor)).unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_position_and_estimate() {
        let queue = make_queue();
        let first = queue
            .submit("https://example.com/a", AuditOptions::new(), Priority::Normal)
            .await
            .unwrap();
        let second = queue
            .submit("https://example.com/b", AuditOptions::new(), Priority::Normal)
            .await
            .unwrap();
        let third = queue
            .submit("https://example.com/c", AuditOptions::new(), Priority::Normal)
            .await
            .unwrap();

        assert_eq!(first.status, JobStatus::Pending);
        assert!(!first.duplicate);
        assert_eq!((first.position, second.position, third.position), (1, 2, 3));
        // Two slots: positions 1-2 wait one round, position 3 waits two.
        assert_eq!(first.estimated_wait_ms, 1_000);
        assert_eq!(second.estimated_wait_ms, 1_000);
        assert_eq!(third.estimated_wait_ms, 2_000);
    }

    #[tokio::test]
    async fn test_duplicate_submission_attaches() {
        let queue = make_queue();
        let mut events = queue.subscribe();
        let options = AuditOptions::new().with("mobile", true);

        let first = queue
            .submit("https://example.com", options.clone(), Priority::Normal)
            .await
            .unwrap();
        let again = queue
            .submit("https://EXAMPLE.com/#top", options, Priority::Urgent)
            .await
            .unwrap();

        assert_eq!(again.job_id, first.job_id);
        assert!(again.duplicate);
        assert_eq!(again.position, 1);

        let status = queue.status().await;
        assert_eq!(status.queue.pending, 1);
        assert_eq!(status.statistics.total_jobs, 1);

        // Only the first submission is announced.
        assert!(matches!(events.try_recv(), Ok(QueueEvent::JobAdded { .. })));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_different_options_are_not_duplicates() {
        let queue = make_queue();
        let a = queue
            .submit("https://example.com", AuditOptions::new(), Priority::Normal)
            .await
            .unwrap();
        let b = queue
            .submit(
                "https://example.com",
                AuditOptions::new().with("mobile", true),
                Priority::Normal,
            )
            .await
            .unwrap();
        assert_ne!(a.job_id, b.job_id);
        assert!(!b.duplicate);
    }

    #[tokio::test]
    async fn test_invalid_url_creates_nothing() {
        let queue = make_queue();
        let err = queue
            .submit("example.com/no-scheme", AuditOptions::new(), Priority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidUrl { .. }));
        assert_eq!(queue.status().await.statistics.total_jobs, 0);
    }

    #[tokio::test]
    async fn test_batch_validates_everything_first() {
        let queue = make_queue();
        let targets = vec![
            "https://example.com/1".to_string(),
            "mailto:someone@example.com".to_string(),
        ];
        let err = queue
            .submit_batch(&targets, AuditOptions::new(), Priority::Normal)
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::UnsupportedScheme("mailto".into()));
        assert_eq!(queue.status().await.queue.pending, 0);

        let too_many: Vec<String> = (0..4).map(|i| format!("https://example.com/{i}")).collect();
        assert_eq!(
            queue
                .submit_batch(&too_many, AuditOptions::new(), Priority::Normal)
                .await
                .unwrap_err(),
            QueueError::BatchTooLarge { max: 3, got: 4 }
        );
        assert_eq!(
            queue
                .submit_batch(&[], AuditOptions::new(), Priority::Normal)
                .await
                .unwrap_err(),
            QueueError::EmptyBatch
        );
    }

    #[tokio::test]
    async fn test_batch_submits_each_target() {
        let queue = make_queue();
        let targets = vec![
            "https://example.com/1".to_string(),
            "https://example.com/2".to_string(),
            "https://example.com/1".to_string(),
        ];
        let batch = queue
            .submit_batch(&targets, AuditOptions::new(), Priority::High)
            .await
            .unwrap();

        assert_eq!(batch.jobs.len(), 3);
        assert_eq!(batch.jobs[2].job_id, batch.jobs[0].job_id);
        assert!(batch.jobs[2].duplicate);
        assert_eq!(queue.status().await.priority_queues.high, 2);
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let queue = make_queue();
        let sub = queue
            .submit("https://example.com", AuditOptions::new(), Priority::Normal)
            .await
            .unwrap();
        let mut events = queue.subscribe();

        assert!(queue.cancel(&sub.job_id).await);
        assert_eq!(
            events.try_recv().unwrap(),
            QueueEvent::JobCancelled { job_id: sub.job_id }
        );
        let snapshot = queue.job(&sub.job_id).await.unwrap();
        assert_eq!(snapshot.job.status, JobStatus::Cancelled);
        assert!(snapshot.position.is_none());
        assert!(snapshot.job.completed_at.is_some());

        // Second cancel and unknown ids are refused, silently.
        assert!(!queue.cancel(&sub.job_id).await);
        assert!(!queue.cancel(&JobId::new()).await);
        assert!(events.try_recv().is_err());

        // The signature is free again.
        let again = queue
            .submit("https://example.com", AuditOptions::new(), Priority::Normal)
            .await
            .unwrap();
        assert!(!again.duplicate);
        assert_ne!(again.job_id, sub.job_id);

        let status = queue.status().await;
        assert_eq!(status.queue.cancelled, 1);
        assert_eq!(status.queue.pending, 1);
        assert_eq!(status.statistics.cancelled_jobs, 1);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let queue = make_queue();
        let id = JobId::new();
        assert_eq!(queue.job(&id).await.unwrap_err(), QueueError::NotFound(id));
    }

    #[tokio::test]
    async fn test_status_is_idempotent() {
        let queue = make_queue();
        queue
            .submit("https://example.com", AuditOptions::new(), Priority::Low)
            .await
            .unwrap();

        let a = queue.status().await;
        let b = queue.status().await;
        assert_eq!(a.queue, b.queue);
        assert_eq!(a.capacity, b.capacity);
        assert_eq!(a.priority_queues, b.priority_queues);
        assert_eq!(a.statistics.total_jobs, b.statistics.total_jobs);
        assert_eq!(a.capacity.available_slots, 2);
        assert_eq!(a.priority_queues.low, 1);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = QueueConfig {
            max_concurrent: 0,
            ..test_config()
        };
        assert!(AuditQueue::new(config, Arc::new(NoopExecutor)).is_err());
    }
}
