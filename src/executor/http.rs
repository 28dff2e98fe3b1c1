//! Built-in executor: fetch the page and report on the response.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, SERVER, USER_AGENT};
use reqwest::{redirect, Client};
use serde_json::{json, Value};
use tracing::debug;

use super::AuditExecutor;
use crate::config::ExecutorConfig;
use crate::queue::AuditOptions;

/// Fetches the target over HTTP(S) and returns status, timing and basic
/// document facts.
///
/// Server errors (5xx) are reported as failures so the queue retries them;
/// client errors such as 404 are a valid audit outcome.
pub struct HttpAuditExecutor {
    client: Client,
    max_body_bytes: usize,
}

impl HttpAuditExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait::async_trait]
impl AuditExecutor for HttpAuditExecutor {
    async fn execute(&self, target: &str, options: &AuditOptions) -> Result<Value> {
        let mut request = self.client.get(target);
        if let Some(ua) = options.get("user_agent").and_then(Value::as_str) {
            request = request.header(USER_AGENT, ua);
        }

        let start = Instant::now();
        let mut response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", target))?;
        let ttfb = start.elapsed();

        let status = response.status();
        if status.is_server_error() {
            bail!("{} responded with {}", target, status);
        }

        let final_url = response.url().to_string();
        let content_type = header_str(&response, CONTENT_TYPE);
        let server = header_str(&response, SERVER);
        let content_length = response.content_length();

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("failed to read body from {}", target))?
        {
            let room = self.max_body_bytes - body.len();
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }
        let total = start.elapsed();

        let is_html = content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("text/html"));
        let title = if is_html {
            extract_title(&String::from_utf8_lossy(&body))
        } else {
            None
        };

        debug!(
            target = target,
            status = status.as_u16(),
            bytes = body.len(),
            total_ms = total.as_millis() as u64,
            "fetch finished"
        );

        Ok(json!({
            "url": target,
            "finalUrl": final_url,
            "status": status.as_u16(),
            "contentType": content_type,
            "contentLength": content_length,
            "bytesRead": body.len(),
            "truncated": truncated,
            "title": title,
            "server": server,
            "timing": {
                "ttfbMs": ttfb.as_millis() as u64,
                "totalMs": total.as_millis() as u64,
            },
            "fetchedAt": Utc::now().to_rfc3339(),
        }))
    }
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Text of the first `<title>` element, whitespace-collapsed.
fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let content_start = open + lower[open..].find('>')? + 1;
    let content_end = content_start + lower[content_start..].find("</title")?;
    let title = html[content_start..content_end]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!title.is_empty()).then_some(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><head><TITLE data-x=\"1\">\n  Hello   World </TITLE></head>"),
            Some("Hello World".to_string())
        );
        assert_eq!(extract_title("<html><title></title></html>"), None);
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
    }

    #[test]
    fn test_executor_builds_from_default_config() {
        let executor = HttpAuditExecutor::new(&ExecutorConfig::default()).unwrap();
        assert_eq!(executor.max_body_bytes, 5 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_an_error() {
        let config = ExecutorConfig {
            connect_timeout_ms: 500,
            ..ExecutorConfig::default()
        };
        let executor = HttpAuditExecutor::new(&config).unwrap();
        // Port 9 (discard) on localhost is closed on any sane test host.
        let result = executor
            .execute("http://127.0.0.1:9/", &AuditOptions::new())
            .await;
        assert!(result.is_err());
    }
}
