//! TOML configuration for auditq.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) yields a working service. The config file path can be supplied on
//! the command line or through the `AUDITQ_CONFIG` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "AUDITQ_CONFIG";

/// Standard system location for the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/auditq/auditq.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the auditq process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditqConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AuditqConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded auditq configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. An explicit path (from `--config`); errors are returned.
    /// 2. The path in `AUDITQ_CONFIG`.
    /// 3. `/etc/auditq/auditq.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(&env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "AUDITQ_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        if self.executor.max_body_bytes == 0 {
            bail!("executor.max_body_bytes must be greater than zero");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP API.
    pub bind: String,
    /// Allow cross-origin requests from any origin (dashboard development).
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            permissive_cors: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Scheduling, retry and retention settings for the audit queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of audits executing at once.
    pub max_concurrent: usize,
    /// Executions allowed per job before it is marked failed.
    pub max_attempts: u32,
    /// Wall-clock limit for a single execution attempt (milliseconds).
    pub job_timeout_ms: u64,
    /// Scheduler poll interval (milliseconds).
    pub poll_interval_ms: u64,
    /// How long terminal jobs are kept before eviction (seconds).
    pub retention_secs: u64,
    /// Interval between cleanup sweeps (seconds).
    pub cleanup_interval_secs: u64,
    /// Maximum number of URLs in one batch submission.
    pub max_batch_size: usize,
    /// Processing time assumed for wait estimates before any job completes
    /// (milliseconds).
    pub default_estimate_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_attempts: 2,
            job_timeout_ms: 120_000,
            poll_interval_ms: 1_000,
            retention_secs: 24 * 60 * 60,
            cleanup_interval_secs: 300,
            max_batch_size: 10,
            default_estimate_ms: 30_000,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            bail!("queue.max_concurrent must be greater than zero");
        }
        if self.max_attempts == 0 {
            bail!("queue.max_attempts must be greater than zero");
        }
        if self.job_timeout_ms == 0 {
            bail!("queue.job_timeout_ms must be greater than zero");
        }
        if self.poll_interval_ms == 0 {
            bail!("queue.poll_interval_ms must be greater than zero");
        }
        if self.cleanup_interval_secs == 0 {
            bail!("queue.cleanup_interval_secs must be greater than zero");
        }
        if self.max_batch_size == 0 {
            bail!("queue.max_batch_size must be greater than zero");
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Settings for the built-in HTTP fetch executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// User-Agent header sent with audit fetches.
    pub user_agent: String,
    /// Connect timeout for audit fetches (milliseconds).
    pub connect_timeout_ms: u64,
    /// Maximum number of redirects followed.
    pub max_redirects: usize,
    /// Response bodies larger than this are truncated for analysis.
    pub max_body_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("auditq/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_ms: 10_000,
            max_redirects: 5,
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
