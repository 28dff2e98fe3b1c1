//! Typed errors surfaced by the audit queue to its callers.

use thiserror::Error;

use crate::queue::JobId;

/// Errors returned synchronously by queue operations.
///
/// Everything except [`QueueError::NotFound`] is a caller error: the request
/// was rejected before any job was created.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The target could not be parsed as an absolute URL.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The target parsed but does not use `http` or `https`.
    #[error("unsupported URL scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    /// The priority string is not one of the known tiers.
    #[error("invalid priority '{0}', expected one of: low, normal, high, urgent")]
    InvalidPriority(String),

    /// The options bag is not a JSON object.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// A batch submission with no targets.
    #[error("batch must contain at least one URL")]
    EmptyBatch,

    /// A batch submission over the configured bound.
    #[error("batch of {got} URLs exceeds the maximum of {max}")]
    BatchTooLarge { max: usize, got: usize },

    /// No job with this id is known to the queue.
    #[error("job {0} not found")]
    NotFound(JobId),
}

impl QueueError {
    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::InvalidUrl { .. } => "invalid_url",
            QueueError::UnsupportedScheme(_) => "unsupported_scheme",
            QueueError::InvalidPriority(_) => "invalid_priority",
            QueueError::InvalidOptions(_) => "invalid_options",
            QueueError::EmptyBatch => "empty_batch",
            QueueError::BatchTooLarge { .. } => "batch_too_large",
            QueueError::NotFound(_) => "not_found",
        }
    }

    /// Whether this error is the caller's fault (as opposed to a lookup miss).
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, QueueError::NotFound(_))
    }
}
