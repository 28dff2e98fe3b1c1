//! Lifecycle notifications published by a queue instance.

use serde::Serialize;
use tokio::sync::broadcast;

use super::job::{JobId, Priority};

/// Capacity of the per-queue event channel. Slow subscribers that fall
/// further behind than this see `RecvError::Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A state transition observed on the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    JobAdded {
        job_id: JobId,
        target: String,
        priority: Priority,
        position: usize,
    },
    JobStarted {
        job_id: JobId,
        attempt: u32,
    },
    JobCompleted {
        job_id: JobId,
        processing_time_ms: u64,
    },
    JobRetry {
        job_id: JobId,
        attempt: u32,
        error: String,
    },
    JobFailed {
        job_id: JobId,
        attempts: u32,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
    },
}

impl QueueEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            QueueEvent::JobAdded { job_id, .. }
            | QueueEvent::JobStarted { job_id, .. }
            | QueueEvent::JobCompleted { job_id, .. }
            | QueueEvent::JobRetry { job_id, .. }
            | QueueEvent::JobFailed { job_id, .. }
            | QueueEvent::JobCancelled { job_id } => *job_id,
        }
    }
}

/// Publisher side, owned by one queue.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}
