//! Audit executor boundary.
//!
//! The queue treats running an audit as an opaque async call. Analyzers,
//! headless rendering and third-party metrics all live behind this trait;
//! the queue only enforces the per-attempt timeout and records the outcome.

pub mod http;

use anyhow::Result;
use serde_json::Value;

use crate::queue::AuditOptions;

pub use self::http::HttpAuditExecutor;

/// Trait for anything that can audit a single target.
#[async_trait::async_trait]
pub trait AuditExecutor: Send + Sync {
    /// Audit `target` with the given options and return the report.
    ///
    /// Implementations need not enforce their own deadline: the queue drops
    /// the call once the configured job timeout elapses.
    async fn execute(&self, target: &str, options: &AuditOptions) -> Result<Value>;
}
