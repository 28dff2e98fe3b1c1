use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use auditq::config::{AuditqConfig, LogFormat, LoggingConfig};
use auditq::executor::HttpAuditExecutor;
use auditq::queue::{AuditOptions, AuditQueue, JobStatus, Priority, QueueEvent};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(
    name = "auditq",
    about = "In-process audit job queue for website SEO / AI-readiness audits",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (falls back to $AUDITQ_CONFIG, then
    /// /etc/auditq/auditq.toml, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + queue scheduler)
    Serve {
        /// Bind address, overriding the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Audit a single URL through a local queue and print the result
    Audit {
        /// Target URL
        url: String,

        /// Priority tier: low, normal, high, urgent
        #[arg(long, default_value = "normal")]
        priority: String,

        /// Executor options as a JSON object
        #[arg(long)]
        options: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Fallback warnings from config resolution go to stderr before the
    // configured subscriber exists.
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let mut config = tracing::subscriber::with_default(bootstrap, || {
        AuditqConfig::resolve(cli.config.as_deref())
    })?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting auditq daemon");
            auditq::serve(config).await?;
        }
        Commands::Audit {
            url,
            priority,
            options,
        } => {
            let priority: Priority = priority.parse()?;
            let options = match options {
                Some(raw) => AuditOptions::from_value(
                    serde_json::from_str(&raw).context("--options is not valid JSON")?,
                )?,
                None => AuditOptions::new(),
            };
            run_single_audit(config, &url, options, priority).await?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Push one audit through a private queue so retries and the job timeout
/// apply exactly as they do in the daemon.
async fn run_single_audit(
    config: AuditqConfig,
    url: &str,
    options: AuditOptions,
    priority: Priority,
) -> Result<()> {
    let executor = HttpAuditExecutor::new(&config.executor)?;
    let queue = AuditQueue::new(config.queue.clone(), Arc::new(executor))?;
    let mut events = queue.subscribe();

    let submission = queue.submit(url, options, priority).await?;
    let id = submission.job_id;
    queue.start();

    loop {
        match events.recv().await {
            Ok(QueueEvent::JobRetry { job_id, attempt, error }) if job_id == id => {
                eprintln!("attempt {} failed: {} (retrying)", attempt, error);
            }
            Ok(QueueEvent::JobCompleted { job_id, .. } | QueueEvent::JobFailed { job_id, .. })
                if job_id == id =>
            {
                break
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {
                if queue.job(&id).await?.job.status.is_terminal() {
                    break;
                }
            }
            Err(RecvError::Closed) => bail!("queue closed before job {} finished", id),
        }
    }

    queue.shutdown();
    let snapshot = queue.job(&id).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if snapshot.job.status == JobStatus::Failed {
        bail!(
            "audit of {} failed: {}",
            snapshot.job.target,
            snapshot.job.error.unwrap_or_default()
        );
    }
    Ok(())
}
