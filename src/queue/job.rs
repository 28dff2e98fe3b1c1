//! Job record, priority tiers, the options bag and the dedup signature.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::QueueError;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Unique identifier of a queued audit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling tier. Higher tiers are always dispatched first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    /// All tiers, highest first.
    pub const DESCENDING: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

impl FromStr for Priority {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(QueueError::InvalidPriority(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
///
/// ```text
/// PENDING -> PROCESSING -> COMPLETED
///    ^           |
///    +-- retry --+-> FAILED
/// PENDING -> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Pending or processing: the job still owns its dedup signature.
    pub fn is_live(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// AuditOptions
// ---------------------------------------------------------------------------

/// Opaque configuration handed to the executor.
///
/// Equal option sets produce the same canonical encoding regardless of the
/// order their keys were inserted in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditOptions(Map<String, Value>);

impl AuditOptions {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Accept a JSON object, or `null` for "no options".
    pub fn from_value(value: Value) -> Result<Self, QueueError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Ok(Self(map)),
            other => Err(QueueError::InvalidOptions(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key-sorted compact JSON encoding.
    pub fn canonical(&self) -> String {
        canonicalize(&Value::Object(self.0.clone())).to_string()
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Target normalization & signature
// ---------------------------------------------------------------------------

/// Parse and normalize an audit target.
///
/// Scheme and host are lower-cased and default ports dropped by the URL
/// parser; the fragment is removed since it never reaches the server.
pub fn normalize_target(raw: &str) -> Result<Url, QueueError> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|e| QueueError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(QueueError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(QueueError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    url.set_fragment(None);
    Ok(url)
}

/// Dedup key: normalized target plus canonical options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn new(target: &Url, options: &AuditOptions) -> Self {
        Signature(format!("{}|{}", target.as_str(), options.canonical()))
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One queued audit and its lifecycle state.
///
/// Transition methods panic when called from the wrong state: the queue is
/// the only caller and a wrong-state transition means its tables are corrupt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub target: String,
    pub options: AuditOptions,
    pub priority: Priority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Duration of the last execution attempt, in milliseconds.
    #[serde(rename = "processingTime")]
    pub processing_time_ms: Option<u64>,
    #[serde(skip)]
    signature: Signature,
}

impl Job {
    pub fn new(target: Url, options: AuditOptions, priority: Priority, max_attempts: u32) -> Self {
        let now = Utc::now();
        let signature = Signature::new(&target, &options);
        Self {
            id: JobId::new(),
            target: target.to_string(),
            options,
            priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            processing_time_ms: None,
            signature,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Whether another attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub(crate) fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.expect_status(JobStatus::Pending, "dispatch");
        self.status = JobStatus::Processing;
        self.attempts += 1;
        assert!(
            self.attempts <= self.max_attempts,
            "job {} dispatched beyond max_attempts",
            self.id
        );
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub(crate) fn mark_completed(&mut self, result: Value, elapsed: Duration, now: DateTime<Utc>) {
        self.expect_status(JobStatus::Processing, "complete");
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.processing_time_ms = Some(duration_ms(elapsed));
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Back to pending with a fresh arrival time, so the job queues behind
    /// its tier rather than in front of it.
    pub(crate) fn mark_retry(&mut self, elapsed: Duration, now: DateTime<Utc>) {
        self.expect_status(JobStatus::Processing, "retry");
        self.status = JobStatus::Pending;
        self.error = None;
        self.processing_time_ms = Some(duration_ms(elapsed));
        self.created_at = now;
        self.updated_at = now;
    }

    pub(crate) fn mark_failed(&mut self, error: String, elapsed: Duration, now: DateTime<Utc>) {
        self.expect_status(JobStatus::Processing, "fail");
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.result = None;
        self.processing_time_ms = Some(duration_ms(elapsed));
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.expect_status(JobStatus::Pending, "cancel");
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    fn expect_status(&self, expected: JobStatus, action: &str) {
        assert_eq!(
            self.status, expected,
            "cannot {} job {} in state {}",
            action, self.id, self.status
        );
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
