//! HTTP API tests driven through the router with `oneshot`.

use std::sync::Arc;

use auditq::api::{self, state::AppState};
use auditq::config::QueueConfig;
use auditq::executor::AuditExecutor;
use auditq::queue::{AuditOptions, AuditQueue};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

struct EchoExecutor;

#[async_trait::async_trait]
impl AuditExecutor for EchoExecutor {
    async fn execute(&self, target: &str, _options: &AuditOptions) -> anyhow::Result<Value> {
        Ok(json!({ "url": target }))
    }
}

/// Router over a queue that is never started, so jobs stay pending.
fn app() -> (Router, AuditQueue) {
    let config = QueueConfig {
        max_batch_size: 3,
        ..QueueConfig::default()
    };
    let queue = AuditQueue::new(config, Arc::new(EchoExecutor)).unwrap();
    (api::router(AppState::new(queue.clone())), queue)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_000_000)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = app();
    let (status, body) = send(&app, Method::GET, "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_submit_returns_accepted() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/audits",
        Some(json!({ "url": "https://example.com", "priority": "high" })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["position"], 1);
    assert_eq!(body["duplicate"], false);
    assert!(body["estimatedWait"].as_u64().unwrap() > 0);

    let id = body["jobId"].as_str().unwrap();
    assert_eq!(body["checkStatusUrl"], format!("/api/v1/audits/{}", id));
}

#[tokio::test]
async fn test_submit_duplicate_returns_existing_job() {
    let (app, _) = app();
    let request = json!({
        "url": "https://Example.com/page#top",
        "options": { "device": "mobile", "depth": 2 }
    });
    let (_, first) = send(&app, Method::POST, "/api/v1/audits", Some(request)).await;

    let reordered = json!({
        "url": "https://example.com/page",
        "options": { "depth": 2, "device": "mobile" }
    });
    let (status, second) = send(&app, Method::POST, "/api/v1/audits", Some(reordered)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(second["duplicate"], true);
    assert_eq!(second["jobId"], first["jobId"]);
}

#[tokio::test]
async fn test_submit_rejects_bad_requests() {
    let (app, queue) = app();

    let cases = [
        (json!({}), "missing_field"),
        (json!({ "url": "not a url" }), "invalid_url"),
        (json!({ "url": "ftp://example.com/file" }), "unsupported_scheme"),
        (json!({ "url": "https://example.com", "priority": "critical" }), "invalid_priority"),
        (json!({ "url": "https://example.com", "options": [1, 2] }), "invalid_options"),
    ];
    for (body, code) in cases {
        let (status, resp) = send(&app, Method::POST, "/api/v1/audits", Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
        assert_eq!(resp["error"]["code"], code, "body {}", body);
    }

    // Nothing was enqueued.
    assert_eq!(queue.status().await.statistics.total_jobs, 0);
}

#[tokio::test]
async fn test_submit_rejects_malformed_json() {
    let (app, _) = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/audits")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"url\":"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_audit() {
    let (app, _) = app();
    let (_, submitted) = send(
        &app,
        Method::POST,
        "/api/v1/audits",
        Some(json!({ "url": "https://example.com" })),
    )
    .await;
    let uri = submitted["checkStatusUrl"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], submitted["jobId"]);
    assert_eq!(body["target"], "https://example.com/");
    assert_eq!(body["priority"], "normal");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["attempts"], 0);
    assert_eq!(body["position"], 1);
    assert!(body.as_object().unwrap().contains_key("processingTime"));
    assert!(body["processingTime"].is_null());
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_get_unknown_audit_is_404() {
    let (app, _) = app();

    let missing = format!("/api/v1/audits/{}", uuid::Uuid::new_v4());
    let (status, body) = send(&app, Method::GET, &missing, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send(&app, Method::GET, "/api/v1/audits/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_audit() {
    let (app, _) = app();
    let (_, submitted) = send(
        &app,
        Method::POST,
        "/api/v1/audits",
        Some(json!({ "url": "https://example.com" })),
    )
    .await;
    let uri = submitted["checkStatusUrl"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);

    // Second cancel finds nothing pending.
    let (status, body) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_cancellable");

    let (_, job) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(job["status"], "cancelled");
}

#[tokio::test]
async fn test_batch_submit() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/audits/batch",
        Some(json!({
            "urls": ["https://a.example", "https://b.example", "https://a.example"],
            "priority": "low"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["batchId"].is_string());
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0]["position"], 1);
    assert_eq!(jobs[1]["position"], 2);
    assert_eq!(jobs[2]["duplicate"], true);
    assert_eq!(jobs[2]["jobId"], jobs[0]["jobId"]);
}

#[tokio::test]
async fn test_batch_validation_is_all_or_nothing() {
    let (app, queue) = app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/audits/batch",
        Some(json!({ "urls": ["https://a.example", "nope"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_url");

    let (status, body) = send(&app, Method::POST, "/api/v1/audits/batch", Some(json!({ "urls": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "empty_batch");

    let too_many: Vec<String> = (0..4).map(|i| format!("https://{i}.example")).collect();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/audits/batch",
        Some(json!({ "urls": too_many })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "batch_too_large");

    assert_eq!(queue.status().await.statistics.total_jobs, 0);
}

#[tokio::test]
async fn test_queue_status() {
    let (app, _) = app();
    for (url, priority) in [
        ("https://a.example", "urgent"),
        ("https://b.example", "normal"),
        ("https://c.example", "normal"),
    ] {
        send(
            &app,
            Method::POST,
            "/api/v1/audits",
            Some(json!({ "url": url, "priority": priority })),
        )
        .await;
    }

    let (status, body) = send(&app, Method::GET, "/api/v1/queue/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue"]["pending"], 3);
    assert_eq!(body["queue"]["processing"], 0);
    assert_eq!(body["capacity"]["maxConcurrent"], 3);
    assert_eq!(body["capacity"]["availableSlots"], 3);
    assert_eq!(body["statistics"]["totalJobs"], 3);
    assert_eq!(body["statistics"]["avgProcessingTime"], 0);
    assert!(body["statistics"]["uptime"].is_u64());
    assert_eq!(body["priorityQueues"]["urgent"], 1);
    assert_eq!(body["priorityQueues"]["normal"], 2);
    assert_eq!(body["priorityQueues"]["low"], 0);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _) = app();
    let (status, _) = send(&app, Method::GET, "/api/v2/whatever", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
