//! Async client core for a FileMaker Data API server.
//!
//! # Overview
//! Every call flows through a two-stage interception pipeline wrapped
//! around one shared HTTP transport: a request guard validates and
//! sanitizes the outgoing description before any I/O, and a response
//! normalizer reduces every outcome to either the raw success payload or
//! one error from a stable `{code, message}` vocabulary.
//!
//! # Design
//! - [`intercept`] holds the two pipeline stages as pure functions.
//! - [`Agent`] owns the long-lived `reqwest` client (cookie jar enabled)
//!   and performs exactly one request per call; retry policy belongs to
//!   callers.
//! - [`FmsClient`] layers the domain operations (sessions, records,
//!   finds, scripts) on top and reacts to the expired-token flag by
//!   dropping its stored token.
//! - Transport-level failures pass through untouched so callers keep the
//!   full diagnostic detail; everything else arrives normalized.

pub mod client;
pub mod error;
pub mod intercept;
pub mod request;
pub mod transport;
pub mod types;

pub use client::FmsClient;
pub use error::{FmError, FmMessage};
pub use request::{FmRequest, FmResponse, HttpMethod};
pub use transport::Agent;
pub use types::{
    FmRecord, FmsConfig, FoundSet, ModAck, QueryOptions, RecordAck, Script, ScriptPhase,
    ScriptResponse,
};
