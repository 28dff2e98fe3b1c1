//! auditq -- in-process audit job queue for website SEO / AI-readiness audits.
//!
//! This crate provides the queue that accepts audit requests, deduplicates
//! them, schedules them under a concurrency limit with retries, and exposes
//! status over an HTTP API. Running the audit itself is delegated to an
//! [`executor::AuditExecutor`].

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod queue;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AuditqConfig;
use crate::executor::HttpAuditExecutor;
use crate::queue::AuditQueue;

/// Start the auditq daemon: queue scheduler, cleanup task and API server.
pub async fn serve(config: AuditqConfig) -> Result<()> {
    // 1. Executor
    let executor = HttpAuditExecutor::new(&config.executor)?;

    // 2. Queue (scheduler + cleanup run as background tasks)
    let queue = AuditQueue::new(config.queue.clone(), Arc::new(executor))?;
    queue.start();

    // 3. API server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let state = api::state::AppState::new(queue.clone());
    let app = if config.server.permissive_cors {
        api::router_with_cors(state)
    } else {
        api::router(state)
    };

    tracing::info!(%addr, "auditq listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.shutdown();
    tracing::info!("auditq stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
