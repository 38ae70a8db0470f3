//! Domain DTOs for the Data API client.
//!
//! # Design
//! Record field data is dynamic by nature (layouts decide the shape), so
//! `fieldData` stays a `serde_json::Value`; everything with a stable wire
//! shape gets a typed struct. The wire uses camelCase names, kept via
//! serde renames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Connection settings for one hosted database.
///
/// How these are obtained (environment, file, secrets store) is the
/// embedding application's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FmsConfig {
    /// Server base URL, scheme included, e.g. `https://fms.example.com`.
    pub server: String,
    /// Hosted database name.
    pub database: String,
    pub user: String,
    pub password: String,
}

/// One record of a layout's found set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FmRecord {
    #[serde(rename = "fieldData")]
    pub field_data: Value,
    #[serde(
        rename = "portalData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub portal_data: Option<Value>,
    #[serde(rename = "recordId")]
    pub record_id: String,
    #[serde(rename = "modId")]
    pub mod_id: String,
}

/// A found set plus any script results the call produced.
///
/// Script result keys keep their wire names (`scriptResult`,
/// `scriptError`, and the phase-qualified `scriptResult.prerequest` /
/// `scriptResult.presort` variants). Result values arrive JSON-parsed
/// when the script returned JSON, as raw strings otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundSet {
    pub data: Vec<FmRecord>,
    #[serde(flatten)]
    pub script_results: Map<String, Value>,
}

/// Acknowledgement returned by record creation.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordAck {
    #[serde(rename = "recordId")]
    pub record_id: String,
    #[serde(rename = "modId")]
    pub mod_id: String,
}

/// Acknowledgement returned by record edits.
#[derive(Debug, Clone, Deserialize)]
pub struct ModAck {
    #[serde(rename = "modId")]
    pub mod_id: String,
}

/// Result of a directly triggered script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptResponse {
    pub result: Value,
}

/// Execution phase of a script attached to a call. Without a phase the
/// script runs after the request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    Prerequest,
    Presort,
}

/// A script to run alongside a call, with an optional parameter.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub param: Option<Value>,
    pub phase: Option<ScriptPhase>,
}

impl Script {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param: None,
            phase: None,
        }
    }

    pub fn param(mut self, param: Value) -> Self {
        self.param = Some(param);
        self
    }

    pub fn phase(mut self, phase: ScriptPhase) -> Self {
        self.phase = Some(phase);
        self
    }
}

/// Paging and script options shared by list and find calls.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub scripts: Vec<Script>,
}
