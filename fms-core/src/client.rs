//! High-level Data API operations for one hosted database.
//!
//! # Design
//! `FmsClient` owns the shared transport and the session token. Token
//! lifecycle mirrors the remote contract: authenticate lazily on first
//! use, attach the token as a bearer header on data calls, and drop the
//! stored token the moment any response flags it expired so the next call
//! logs in fresh. The interception pipeline itself never touches the
//! token; it only raises the flag.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::FmError;
use crate::request::{FmRequest, HttpMethod};
use crate::transport::Agent;
use crate::types::{
    FmRecord, FmsConfig, FoundSet, ModAck, QueryOptions, RecordAck, Script, ScriptPhase,
    ScriptResponse,
};

#[derive(Debug, Deserialize)]
struct TokenAck {
    token: String,
}

/// Client for one hosted database.
pub struct FmsClient {
    agent: Agent,
    config: FmsConfig,
    token: RwLock<Option<String>>,
}

impl FmsClient {
    pub fn new(config: FmsConfig) -> Result<Self, FmError> {
        Ok(Self::with_agent(Agent::new()?, config))
    }

    /// Same configuration, caller-supplied transport. Lets an application
    /// share one agent (and its cookie jar) across several databases.
    pub fn with_agent(agent: Agent, config: FmsConfig) -> Self {
        Self {
            agent,
            config,
            token: RwLock::new(None),
        }
    }

    /// Open a session and store its token. Returns the token for callers
    /// that track sessions themselves.
    pub async fn login(&self) -> Result<String, FmError> {
        let credentials =
            STANDARD.encode(format!("{}:{}", self.config.user, self.config.password));
        let mut request = FmRequest::new(
            HttpMethod::Post,
            format!("{}/sessions", self.database_url()),
        );
        request
            .headers
            .push(("Authorization".to_string(), format!("Basic {credentials}")));
        request.data = Some(json!({}));

        let body = self.agent.execute(request).await?;
        let ack: TokenAck = parse_response(body)?;
        info!(database = %self.config.database, "session opened");
        *self.token.write().await = Some(ack.token.clone());
        Ok(ack.token)
    }

    /// Close the current session. The local token is dropped even when the
    /// remote call fails, so the next operation authenticates fresh either
    /// way.
    pub async fn logout(&self) -> Result<(), FmError> {
        let token = match self.token.write().await.take() {
            Some(token) => token,
            None => return Ok(()),
        };
        let request = FmRequest::new(
            HttpMethod::Delete,
            format!("{}/sessions/{token}", self.database_url()),
        );
        self.agent.execute(request).await?;
        info!(database = %self.config.database, "session closed");
        Ok(())
    }

    /// Currently held session token, if any.
    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Resume a session token obtained elsewhere instead of logging in.
    pub async fn adopt_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    /// Fetch records from a layout.
    pub async fn list(&self, layout: &str, options: QueryOptions) -> Result<FoundSet, FmError> {
        let mut request = FmRequest::new(HttpMethod::Get, self.layout_url(layout, "/records"));
        request.params = list_params(&options);
        found_set(self.dispatch(request).await?)
    }

    /// Run a find request. `query` is one criteria object or an array of
    /// them; a single object is wrapped for the wire.
    pub async fn find(
        &self,
        layout: &str,
        query: Value,
        options: QueryOptions,
    ) -> Result<FoundSet, FmError> {
        let mut body = Map::new();
        let query = match query {
            Value::Array(_) => query,
            other => Value::Array(vec![other]),
        };
        body.insert("query".to_string(), query);
        if let Some(limit) = options.limit {
            body.insert("limit".to_string(), json!(limit.to_string()));
        }
        if let Some(offset) = options.offset {
            body.insert("offset".to_string(), json!(offset.to_string()));
        }
        script_params(&options.scripts, &mut body);

        let mut request = FmRequest::new(HttpMethod::Post, self.layout_url(layout, "/_find"));
        request.data = Some(Value::Object(body));
        found_set(self.dispatch(request).await?)
    }

    /// Create a record from a field-data object.
    pub async fn create(&self, layout: &str, field_data: Value) -> Result<RecordAck, FmError> {
        let mut request = FmRequest::new(HttpMethod::Post, self.layout_url(layout, "/records"));
        request.data = Some(json!({ "fieldData": field_data }));
        parse_response(self.dispatch(request).await?)
    }

    /// Fetch one record by id.
    pub async fn get(&self, layout: &str, record_id: &str) -> Result<FmRecord, FmError> {
        let request = FmRequest::new(
            HttpMethod::Get,
            self.layout_url(layout, &format!("/records/{record_id}")),
        );
        let found = found_set(self.dispatch(request).await?)?;
        found
            .data
            .into_iter()
            .next()
            .ok_or_else(|| FmError::Malformed("record response carried no data".to_string()))
    }

    /// Apply field changes to a record.
    pub async fn edit(
        &self,
        layout: &str,
        record_id: &str,
        field_data: Value,
    ) -> Result<ModAck, FmError> {
        let mut request = FmRequest::new(
            HttpMethod::Patch,
            self.layout_url(layout, &format!("/records/{record_id}")),
        );
        request.data = Some(json!({ "fieldData": field_data }));
        parse_response(self.dispatch(request).await?)
    }

    /// Delete a record by id.
    pub async fn delete(&self, layout: &str, record_id: &str) -> Result<(), FmError> {
        let request = FmRequest::new(
            HttpMethod::Delete,
            self.layout_url(layout, &format!("/records/{record_id}")),
        );
        self.dispatch(request).await?;
        Ok(())
    }

    /// Trigger a script on a layout and return its result.
    ///
    /// A string parameter is sent as-is, anything else is JSON-encoded;
    /// the result comes back parsed when the script produced JSON.
    pub async fn script(
        &self,
        layout: &str,
        name: &str,
        param: Option<Value>,
    ) -> Result<ScriptResponse, FmError> {
        let mut script = Script::new(name);
        script.param = param;
        let options = QueryOptions {
            limit: Some(1),
            offset: None,
            scripts: vec![script],
        };
        let found = self.list(layout, options).await?;
        let result = found
            .script_results
            .get("scriptResult")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(ScriptResponse { result })
    }

    /// Dispatch with the session token attached, clearing the stored token
    /// when the response flags it expired.
    async fn dispatch(&self, mut request: FmRequest) -> Result<Value, FmError> {
        let token = self.bearer().await?;
        request
            .headers
            .push(("Authorization".to_string(), format!("Bearer {token}")));
        let outcome = self.agent.execute(request).await;
        if let Err(error) = &outcome {
            if error.is_expired() {
                warn!(database = %self.config.database, "session token expired, dropping it");
                self.token.write().await.take();
            }
        }
        outcome
    }

    async fn bearer(&self) -> Result<String, FmError> {
        {
            let held = self.token.read().await;
            if let Some(token) = held.as_ref() {
                return Ok(token.clone());
            }
        }
        self.login().await
    }

    fn database_url(&self) -> String {
        format!(
            "{}/fmi/data/v1/databases/{}",
            self.config.server.trim_end_matches('/'),
            self.config.database
        )
    }

    fn layout_url(&self, layout: &str, suffix: &str) -> String {
        format!("{}/layouts/{layout}{suffix}", self.database_url())
    }
}

/// GET parameters use the underscore namespace (`_limit`, `_offset`);
/// script parameters keep their dotted names.
fn list_params(options: &QueryOptions) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(limit) = options.limit {
        params.insert("_limit".to_string(), json!(limit.to_string()));
    }
    if let Some(offset) = options.offset {
        params.insert("_offset".to_string(), json!(offset.to_string()));
    }
    script_params(&options.scripts, &mut params);
    params
}

/// Map scripts onto the wire parameters the resource expects: `script`
/// and `script.param` for the main phase, the `script.prerequest` /
/// `script.presort` pairs for the others.
fn script_params(scripts: &[Script], params: &mut Map<String, Value>) {
    for script in scripts {
        let key = match script.phase {
            None => "script".to_string(),
            Some(ScriptPhase::Prerequest) => "script.prerequest".to_string(),
            Some(ScriptPhase::Presort) => "script.presort".to_string(),
        };
        if let Some(param) = &script.param {
            params.insert(format!("{key}.param"), json!(stringify(param)));
        }
        params.insert(key, json!(script.name.clone()));
    }
}

/// Script parameters cross the wire as text: strings bare, numbers in
/// decimal form, objects and arrays JSON-encoded.
fn stringify(param: &Value) -> String {
    match param {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Pull the `response` object out of a success envelope and deserialize it.
fn parse_response<T: DeserializeOwned>(body: Value) -> Result<T, FmError> {
    let response = body
        .get("response")
        .cloned()
        .ok_or_else(|| FmError::Malformed("success body carried no response object".to_string()))?;
    serde_json::from_value(response).map_err(|err| FmError::Malformed(err.to_string()))
}

/// Parse a found-set response, decoding script results that contain JSON
/// back into structured values.
fn found_set(body: Value) -> Result<FoundSet, FmError> {
    let mut response = body
        .get("response")
        .cloned()
        .ok_or_else(|| FmError::Malformed("success body carried no response object".to_string()))?;
    if let Value::Object(map) = &mut response {
        for (key, value) in map.iter_mut() {
            if !key.starts_with("scriptResult") {
                continue;
            }
            let parsed = match value {
                Value::String(text) => serde_json::from_str::<Value>(text).ok(),
                _ => None,
            };
            if let Some(parsed) = parsed {
                *value = parsed;
            }
        }
    }
    serde_json::from_value(response).map_err(|err| FmError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> FmsClient {
        FmsClient::with_agent(
            Agent::new().unwrap(),
            FmsConfig {
                server: "https://fms.test/".to_string(),
                database: "coffee".to_string(),
                user: "admin".to_string(),
                password: "secret".to_string(),
            },
        )
    }

    #[test]
    fn database_url_strips_trailing_slash() {
        assert_eq!(
            client().database_url(),
            "https://fms.test/fmi/data/v1/databases/coffee"
        );
    }

    #[test]
    fn layout_url_nests_under_database() {
        assert_eq!(
            client().layout_url("orders", "/records/7"),
            "https://fms.test/fmi/data/v1/databases/coffee/layouts/orders/records/7"
        );
    }

    #[test]
    fn list_params_use_underscore_namespace() {
        let options = QueryOptions {
            limit: Some(2),
            offset: Some(5),
            scripts: Vec::new(),
        };
        let params = list_params(&options);
        assert_eq!(params.get("_limit"), Some(&json!("2")));
        assert_eq!(params.get("_offset"), Some(&json!("5")));
    }

    #[test]
    fn script_params_cover_all_three_phases() {
        let scripts = vec![
            Script::new("Before").phase(ScriptPhase::Prerequest),
            Script::new("Sort")
                .phase(ScriptPhase::Presort)
                .param(json!("fast")),
            Script::new("After").param(json!({ "name": "Han" })),
        ];
        let mut params = Map::new();
        script_params(&scripts, &mut params);

        assert_eq!(params.get("script.prerequest"), Some(&json!("Before")));
        assert!(params.get("script.prerequest.param").is_none());
        assert_eq!(params.get("script.presort"), Some(&json!("Sort")));
        assert_eq!(params.get("script.presort.param"), Some(&json!("fast")));
        assert_eq!(params.get("script"), Some(&json!("After")));
        assert_eq!(params.get("script.param"), Some(&json!(r#"{"name":"Han"}"#)));
    }

    #[test]
    fn stringify_follows_parameter_rules() {
        assert_eq!(stringify(&json!("string-here")), "string-here");
        assert_eq!(stringify(&json!(102)), "102");
        assert_eq!(
            stringify(&json!({ "child": "ben" })),
            r#"{"child":"ben"}"#
        );
        assert_eq!(stringify(&json!(["leia", "chewbacca"])), r#"["leia","chewbacca"]"#);
    }

    #[test]
    fn found_set_parses_json_script_results() {
        let body = json!({
            "response": {
                "data": [],
                "scriptError": "0",
                "scriptResult": r#"{"answer":42}"#,
                "scriptResult.prerequest": "plain text result"
            }
        });
        let found = found_set(body).unwrap();
        assert_eq!(
            found.script_results.get("scriptResult"),
            Some(&json!({ "answer": 42 }))
        );
        assert_eq!(
            found.script_results.get("scriptResult.prerequest"),
            Some(&json!("plain text result"))
        );
        assert_eq!(found.script_results.get("scriptError"), Some(&json!("0")));
    }

    #[test]
    fn found_set_requires_response_object() {
        let err = found_set(json!({ "messages": [] })).unwrap_err();
        assert!(matches!(err, FmError::Malformed(_)));
    }

    #[test]
    fn parse_response_surfaces_schema_drift() {
        let err = parse_response::<TokenAck>(json!({ "response": {} })).unwrap_err();
        assert!(matches!(err, FmError::Malformed(_)));
    }
}
