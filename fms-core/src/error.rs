//! Error types for the Data API client.
//!
//! # Design
//! Every failure a caller can see is one of three shapes: the underlying
//! transport error untouched (no response existed to inspect), a
//! normalized `Api` error carrying the stable `{code, message}` vocabulary
//! the remote resource speaks, or `Malformed` for bodies that break the
//! protocol contract. The `expired` flag rides on `Api` so callers can
//! react to an invalidated session token without string matching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single entry of the `messages` array in a Data API response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FmMessage {
    pub code: String,
    pub message: String,
}

/// Errors surfaced by the transport and the client operations.
#[derive(Debug, Error)]
pub enum FmError {
    /// No response was received. The original transport error (DNS
    /// failure, refused connection, per-call timeout) is passed through so
    /// the caller keeps the full diagnostic detail.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// A normalized Data API error: request validation failures, gateway
    /// errors, and structured errors the remote resource returned.
    #[error("Data API error {code}: {message}")]
    Api {
        code: String,
        message: String,
        /// `true` only when the session token was rejected as expired.
        expired: bool,
    },

    /// A structured body that breaks the protocol contract, e.g. an error
    /// envelope whose `messages` array is empty.
    #[error("malformed Data API response: {0}")]
    Malformed(String),
}

impl FmError {
    pub(crate) fn api(code: &str, message: &str) -> Self {
        FmError::Api {
            code: code.to_string(),
            message: message.to_string(),
            expired: false,
        }
    }

    /// The normalized error code, when this failure carries one.
    pub fn code(&self) -> Option<&str> {
        match self {
            FmError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether this failure marks the session token as expired.
    ///
    /// The pipeline only flags the condition; reacting to it (dropping the
    /// stored token, re-authenticating) is the caller's move.
    pub fn is_expired(&self) -> bool {
        matches!(self, FmError::Api { expired: true, .. })
    }
}
