//! Plain-data request and response types for the Data API transport.
//!
//! # Design
//! An outgoing call is described as data first and handed to the transport
//! whole. This keeps the guard and the normalizer pure functions over
//! values, so all of the pipeline's decision logic is testable without a
//! network in sight.
//!
//! All fields use owned types (`String`, `Vec`, `Map`) so descriptions can
//! be built by any caller and consumed exactly once by the transport.

use std::time::Duration;

use serde_json::{Map, Value};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// An outgoing Data API call described as plain data.
///
/// Built once per call, validated and sanitized by the request guard, then
/// consumed by the transport; not retained afterward. `params` become the
/// query string, `data` becomes the JSON body, and `timeout` bounds this
/// call only; the transport itself imposes no default.
#[derive(Debug, Clone)]
pub struct FmRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub params: Map<String, Value>,
    pub data: Option<Value>,
    pub timeout: Option<Duration>,
}

impl FmRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            params: Map::new(),
            data: None,
            timeout: None,
        }
    }
}

/// The wire outcome of a dispatched request, when a response exists at all.
///
/// `path` is the path-and-query of the effective URL; the normalizer needs
/// it to recognize rejected container-file requests. Pure transport
/// failures never produce one of these, since no response exists to
/// describe.
#[derive(Debug, Clone)]
pub struct FmResponse {
    pub status: u16,
    pub path: String,
    pub body: String,
}
