//! API route definitions.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use crate::queue::{AuditOptions, JobId, JobSnapshot, Priority, QueueStatus, Submission};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/audits", post(submit_audit))
        .route("/audits/batch", post(submit_batch))
        .route("/audits/{id}", get(get_audit).delete(cancel_audit))
        .route("/queue/status", get(queue_status))
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    url: Option<String>,
    priority: Option<String>,
    #[serde(default)]
    options: Value,
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    urls: Option<Vec<String>>,
    priority: Option<String>,
    #[serde(default)]
    options: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(flatten)]
    submission: Submission,
    check_status_url: String,
}

impl From<Submission> for SubmitResponse {
    fn from(submission: Submission) -> Self {
        let check_status_url = status_url(&submission.job_id);
        Self {
            submission,
            check_status_url,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    batch_id: Uuid,
    jobs: Vec<SubmitResponse>,
}

fn status_url(id: &JobId) -> String {
    format!("/api/v1/audits/{}", id)
}

fn parse_priority(raw: Option<&str>) -> Result<Priority, ApiError> {
    match raw {
        None => Ok(Priority::default()),
        Some(s) => Ok(s.parse()?),
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse().map_err(|_| ApiError::UnknownJob(raw.to_string()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn submit_audit(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(req) = payload?;
    let url = req.url.ok_or(ApiError::MissingField("url"))?;
    let priority = parse_priority(req.priority.as_deref())?;
    let options = AuditOptions::from_value(req.options)?;

    let submission = state.queue.submit(&url, options, priority).await?;
    Ok((StatusCode::ACCEPTED, Json(submission.into())))
}

async fn submit_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    let Json(req) = payload?;
    let urls = req.urls.ok_or(ApiError::MissingField("urls"))?;
    let priority = parse_priority(req.priority.as_deref())?;
    let options = AuditOptions::from_value(req.options)?;

    let batch = state.queue.submit_batch(&urls, options, priority).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(BatchResponse {
            batch_id: batch.batch_id,
            jobs: batch.jobs.into_iter().map(SubmitResponse::from).collect(),
        }),
    ))
}

async fn get_audit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.queue.job(&id).await?))
}

async fn cancel_audit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job_id = parse_job_id(&id).map_err(|_| ApiError::NotCancellable(id.clone()))?;
    if state.queue.cancel(&job_id).await {
        Ok(Json(json!({ "jobId": job_id, "cancelled": true })))
    } else {
        Err(ApiError::NotCancellable(id))
    }
}

async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.queue.status().await)
}
