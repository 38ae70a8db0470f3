//! In-memory mock of a FileMaker Data API server.
//!
//! Mimics just enough of the real resource for the client's test suite:
//! session tokens, record CRUD on a single in-memory table, finds, script
//! echo semantics, and the envelope shape `{response, messages}` on every
//! structured reply. Two extra routes inject the failure modes the
//! response normalizer has to classify (a 502 HTML page and a WPE
//! container rejection).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// One stored record: dynamic field data plus its modification counter.
#[derive(Clone, Debug)]
pub struct StoredRecord {
    pub field_data: Value,
    pub mod_id: u32,
}

#[derive(Default)]
pub struct Database {
    sessions: HashSet<String>,
    records: HashMap<u32, StoredRecord>,
    next_record_id: u32,
}

pub type Db = Arc<RwLock<Database>>;

/// Body of a `_find` call. Unknown keys (script parameters, stray caller
/// bookkeeping) land in `extra`.
#[derive(Deserialize)]
pub struct FindRequest {
    pub query: Vec<Map<String, Value>>,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

type ErrorReply = (StatusCode, Json<Value>);

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Database::default()));
    Router::new()
        .route("/fmi/data/v1/databases/{db}/sessions", post(open_session))
        .route(
            "/fmi/data/v1/databases/{db}/sessions/{token}",
            delete(close_session),
        )
        .route(
            "/fmi/data/v1/databases/{db}/layouts/{layout}/records",
            get(list_records).post(create_record),
        )
        .route(
            "/fmi/data/v1/databases/{db}/layouts/{layout}/records/{id}",
            get(get_record).patch(edit_record).delete(delete_record),
        )
        .route(
            "/fmi/data/v1/databases/{db}/layouts/{layout}/_find",
            post(find_records),
        )
        .route("/bad-gateway", get(bad_gateway))
        .route("/Streaming_SSL/MainDB/{file}", get(container_file))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn envelope(response: Value, code: &str, message: &str) -> Value {
    json!({
        "response": response,
        "messages": [{ "code": code, "message": message }]
    })
}

fn ok(response: Value) -> Json<Value> {
    Json(envelope(response, "0", "OK"))
}

fn fm_error(status: StatusCode, code: &str, message: &str) -> ErrorReply {
    (status, Json(envelope(json!({}), code, message)))
}

async fn authorize(db: &Db, headers: &HeaderMap) -> Result<(), ErrorReply> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();
    if db.read().await.sessions.contains(token) {
        Ok(())
    } else {
        Err(fm_error(
            StatusCode::UNAUTHORIZED,
            "952",
            "Invalid FileMaker Data API token (*)",
        ))
    }
}

async fn open_session(
    State(db): State<Db>,
    Path(database): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorReply> {
    let has_credentials = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Basic "));
    if !has_credentials {
        return Err(fm_error(
            StatusCode::UNAUTHORIZED,
            "212",
            "Invalid user account or password",
        ));
    }
    let token = Uuid::new_v4().to_string();
    db.write().await.sessions.insert(token.clone());
    info!(%database, "session opened");
    Ok(ok(json!({ "token": token })))
}

async fn close_session(
    State(db): State<Db>,
    Path((database, token)): Path<(String, String)>,
) -> Result<Json<Value>, ErrorReply> {
    if !db.write().await.sessions.remove(&token) {
        return Err(fm_error(
            StatusCode::UNAUTHORIZED,
            "952",
            "Invalid FileMaker Data API token (*)",
        ));
    }
    info!(%database, "session closed");
    Ok(ok(json!({})))
}

async fn list_records(
    State(db): State<Db>,
    Path((_db, _layout)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorReply> {
    authorize(&db, &headers).await?;
    let mut response = script_results(|key| params.get(key).cloned())?;

    let limit = numeric_param(params.get("_limit"), usize::MAX);
    let offset = numeric_param(params.get("_offset"), 1);

    let store = db.read().await;
    let mut ids: Vec<u32> = store.records.keys().copied().collect();
    ids.sort_unstable();
    let data: Vec<Value> = ids
        .iter()
        .skip(offset.saturating_sub(1))
        .take(limit)
        .map(|id| record_json(*id, &store.records[id]))
        .collect();

    response.insert("data".to_string(), Value::Array(data));
    Ok(ok(Value::Object(response)))
}

async fn create_record(
    State(db): State<Db>,
    Path((_db, _layout)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ErrorReply> {
    authorize(&db, &headers).await?;
    let field_data = match body.get("fieldData") {
        Some(Value::Object(fields)) => Value::Object(fields.clone()),
        _ => return Err(fm_error(StatusCode::BAD_REQUEST, "960", "Invalid parameter")),
    };
    let mut store = db.write().await;
    store.next_record_id += 1;
    let id = store.next_record_id;
    store.records.insert(
        id,
        StoredRecord {
            field_data,
            mod_id: 0,
        },
    );
    Ok(ok(json!({ "recordId": id.to_string(), "modId": "0" })))
}

async fn get_record(
    State(db): State<Db>,
    Path((_db, _layout, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorReply> {
    authorize(&db, &headers).await?;
    let id = parse_record_id(&id)?;
    let store = db.read().await;
    let record = store.records.get(&id).ok_or_else(missing_record)?;
    Ok(ok(json!({ "data": [record_json(id, record)] })))
}

async fn edit_record(
    State(db): State<Db>,
    Path((_db, _layout, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ErrorReply> {
    authorize(&db, &headers).await?;
    let id = parse_record_id(&id)?;
    let changes = match body.get("fieldData") {
        Some(Value::Object(fields)) => fields.clone(),
        _ => return Err(fm_error(StatusCode::BAD_REQUEST, "960", "Invalid parameter")),
    };
    let mut store = db.write().await;
    let record = store.records.get_mut(&id).ok_or_else(missing_record)?;
    if let Value::Object(fields) = &mut record.field_data {
        for (name, value) in changes {
            fields.insert(name, value);
        }
    }
    record.mod_id += 1;
    Ok(ok(json!({ "modId": record.mod_id.to_string() })))
}

async fn delete_record(
    State(db): State<Db>,
    Path((_db, _layout, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ErrorReply> {
    authorize(&db, &headers).await?;
    let id = parse_record_id(&id)?;
    let mut store = db.write().await;
    store.records.remove(&id).ok_or_else(missing_record)?;
    Ok(ok(json!({})))
}

async fn find_records(
    State(db): State<Db>,
    Path((_db, _layout)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<FindRequest>,
) -> Result<Json<Value>, ErrorReply> {
    authorize(&db, &headers).await?;
    // Caller bookkeeping must never reach the wire; a strict check here
    // makes the client's request sanitization observable end to end.
    if body.extra.contains_key("request") {
        return Err(fm_error(StatusCode::BAD_REQUEST, "960", "Invalid parameter"));
    }
    let mut response = script_results(|key| {
        body.extra
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    })?;

    let limit = numeric_param(body.limit.as_ref(), usize::MAX);
    let offset = numeric_param(body.offset.as_ref(), 1);

    let store = db.read().await;
    let mut ids: Vec<u32> = store
        .records
        .iter()
        .filter(|(_, record)| body.query.iter().any(|criteria| matches(record, criteria)))
        .map(|(id, _)| *id)
        .collect();
    ids.sort_unstable();
    if ids.is_empty() {
        return Err(fm_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "401",
            "No records match the request",
        ));
    }
    let data: Vec<Value> = ids
        .iter()
        .skip(offset.saturating_sub(1))
        .take(limit)
        .map(|id| record_json(*id, &store.records[id]))
        .collect();

    response.insert("data".to_string(), Value::Array(data));
    Ok(ok(Value::Object(response)))
}

async fn bad_gateway() -> impl IntoResponse {
    (StatusCode::BAD_GATEWAY, Html("<html>Bad Gateway</html>"))
}

async fn container_file(RawQuery(query): RawQuery) -> Response {
    if query
        .as_deref()
        .unwrap_or_default()
        .contains("RCType=EmbeddedRCFileProcessor")
    {
        (StatusCode::UNAUTHORIZED, Json(json!({}))).into_response()
    } else {
        (StatusCode::OK, Json(json!({}))).into_response()
    }
}

/// Echo scripts: each requested phase reports error `"0"` and returns its
/// own parameter as the result, so the client's result parsing is
/// observable. The literal name `Missing Script` fails with code 104.
fn script_results(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Map<String, Value>, ErrorReply> {
    let mut results = Map::new();
    for (key, suffix) in [
        ("script.prerequest", ".prerequest"),
        ("script.presort", ".presort"),
        ("script", ""),
    ] {
        let Some(name) = lookup(key) else {
            continue;
        };
        if name == "Missing Script" {
            return Err(fm_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "104",
                "Script is missing",
            ));
        }
        let param = lookup(&format!("{key}.param")).unwrap_or_default();
        results.insert(format!("scriptError{suffix}"), json!("0"));
        results.insert(format!("scriptResult{suffix}"), json!(param));
    }
    Ok(results)
}

/// A record matches one criteria object when every named field is present
/// and equal in text form; `"*"` matches any present value.
fn matches(record: &StoredRecord, criteria: &Map<String, Value>) -> bool {
    criteria.iter().all(|(field, expected)| {
        let Some(actual) = record.field_data.get(field) else {
            return false;
        };
        let expected = text_form(expected);
        expected == "*" || text_form(actual) == expected
    })
}

fn text_form(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn record_json(id: u32, record: &StoredRecord) -> Value {
    json!({
        "fieldData": record.field_data,
        "recordId": id.to_string(),
        "modId": record.mod_id.to_string()
    })
}

fn numeric_param(value: Option<&String>, default: usize) -> usize {
    value.and_then(|text| text.parse().ok()).unwrap_or(default)
}

fn parse_record_id(id: &str) -> Result<u32, ErrorReply> {
    id.parse().map_err(|_| missing_record())
}

fn missing_record() -> ErrorReply {
    fm_error(StatusCode::INTERNAL_SERVER_ERROR, "101", "Record is missing")
}
