//! Shared HTTP transport for the Data API.
//!
//! # Design
//! One [`Agent`] wraps one long-lived `reqwest::Client` with its cookie
//! jar enabled, so server-set cookies persist across calls on the same
//! instance. The request guard runs before dispatch and the response
//! normalizer after; the agent itself adds no retries and no timeout
//! beyond what the request carries.

use serde_json::Value;
use tracing::debug;

use crate::error::FmError;
use crate::intercept;
use crate::request::{FmRequest, FmResponse};

/// Shared transport: a single HTTP client reused by every call.
///
/// Cloning is cheap and hands out the same underlying client, which is
/// safe for concurrent use from arbitrarily many in-flight calls. The
/// pipeline stages are pure and touch no shared state, so no locking
/// happens here either.
#[derive(Debug, Clone)]
pub struct Agent {
    client: reqwest::Client,
}

impl Agent {
    /// Build the transport. Constructed once at startup and shared; tests
    /// that need isolation construct independent instances, each with its
    /// own cookie jar.
    pub fn new() -> Result<Self, FmError> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self { client })
    }

    /// Dispatch one request through the interception pipeline.
    ///
    /// Exactly one network call per invocation. Validation failures reject
    /// before any I/O; structured remote errors come back normalized; pure
    /// transport failures (DNS, refused connection, per-call timeout) pass
    /// through with the underlying error intact.
    pub async fn execute(&self, request: FmRequest) -> Result<Value, FmError> {
        let request = intercept::guard(request)?;
        debug!(url = %request.url, method = ?request.method, "dispatching request");

        let mut builder = self.client.request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.params.is_empty() {
            let query: Vec<(&str, String)> = request
                .params
                .iter()
                .map(|(name, value)| (name.as_str(), param_text(value)))
                .collect();
            builder = builder.query(&query);
        }
        if let Some(data) = &request.data {
            builder = builder.json(data);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let path = {
            let url = response.url();
            match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_string(),
            }
        };
        let body = response.text().await?;
        debug!(status, path = %path, "response received");

        intercept::normalize(FmResponse { status, path, body })
    }
}

/// Query parameters go on the wire as text; strings stay bare rather than
/// JSON-quoted.
fn param_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
