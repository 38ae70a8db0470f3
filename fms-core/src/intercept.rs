//! The request/response interception pipeline.
//!
//! Two pure functions bracket every call the transport makes: [`guard`]
//! validates and sanitizes an outgoing request before any I/O happens, and
//! [`normalize`] reduces every wire outcome to either the raw success
//! payload or one error from the stable vocabulary. Neither holds state,
//! takes locks, or performs I/O.

use serde_json::Value;

use crate::error::{FmError, FmMessage};
use crate::request::{FmRequest, FmResponse};

/// Error code shared by the scheme rejection and the gateway sentinel.
pub const UNAVAILABLE_CODE: &str = "1630";

/// Message code the resource uses for an invalidated session token.
pub const TOKEN_EXPIRED_CODE: &str = "952";

/// Query marker of container-file requests served by the Web Publishing
/// Engine rather than the Data API itself.
const WPE_PATH_MARKER: &str = "RCType=EmbeddedRCFileProcessor";

/// Validate and sanitize a request before it reaches the network.
///
/// Rejects URLs without an explicit `http`/`https` scheme, so a malformed
/// request never costs a network round trip or a rate-limit slot. Strips
/// the `request` key nested one level inside `params` and inside the body
/// object; that key carries caller bookkeeping that must not leak onto the
/// wire. Absence of either path is not an error, and every other field
/// passes through untouched.
pub fn guard(mut request: FmRequest) -> Result<FmRequest, FmError> {
    if !request.url.starts_with("http") {
        return Err(FmError::api(
            UNAVAILABLE_CODE,
            "The Data API Requires https or http",
        ));
    }
    request.params.remove("request");
    if let Some(Value::Object(data)) = request.data.as_mut() {
        data.remove("request");
    }
    Ok(request)
}

/// Reduce a wire outcome to the success payload or one normalized error.
///
/// Precedence, first match wins:
/// 1. 2xx: the body passes through untouched, parsed as JSON when it is
///    JSON and carried as a string value otherwise. Success is never
///    shape-validated here.
/// 2. Status 502, or a body that is not a JSON object: the gateway
///    sentinel. The underlying cause (proxy failure, HTML error page) is
///    unpredictable and not actionable, so callers get one stable code
///    instead of arbitrary error shapes.
/// 3. Status 401 on a path carrying the WPE container marker: the WPE
///    rejection code. Checked before the body, since its signal is the
///    status plus the URL shape.
/// 4. First entry of the body's `messages` array coded `"952"`: that
///    entry, flagged `expired`.
/// 5. Any other first entry, unchanged.
///
/// An error envelope with no usable `messages` entry is a contract
/// violation and surfaces as [`FmError::Malformed`] rather than being
/// coerced into another code. Transport-level failures never reach this
/// function; they pass through as [`FmError::Transport`].
pub fn normalize(response: FmResponse) -> Result<Value, FmError> {
    if (200..300).contains(&response.status) {
        return Ok(match serde_json::from_str(&response.body) {
            Ok(value) => value,
            Err(_) => Value::String(response.body),
        });
    }

    let body: Option<Value> = serde_json::from_str(&response.body)
        .ok()
        .filter(Value::is_object);
    let body = match body {
        Some(body) if response.status != 502 => body,
        _ => return Err(unavailable()),
    };

    if response.status == 401 && response.path.contains(WPE_PATH_MARKER) {
        return Err(FmError::api("9", "FileMaker WPE rejected the request"));
    }

    let first = match body.get("messages").and_then(|messages| messages.get(0)) {
        Some(first) => first.clone(),
        None => {
            return Err(FmError::Malformed(
                "error response carried no messages".to_string(),
            ))
        }
    };
    let message: FmMessage =
        serde_json::from_value(first).map_err(|err| FmError::Malformed(err.to_string()))?;
    Err(FmError::Api {
        expired: message.code == TOKEN_EXPIRED_CODE,
        code: message.code,
        message: message.message,
    })
}

fn unavailable() -> FmError {
    FmError::api(UNAVAILABLE_CODE, "The Data API is currently unavailable")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::request::HttpMethod;

    fn request(url: &str) -> FmRequest {
        FmRequest::new(HttpMethod::Get, url)
    }

    fn response(status: u16, path: &str, body: &str) -> FmResponse {
        FmResponse {
            status,
            path: path.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn guard_rejects_missing_scheme() {
        let err = guard(request("ftp://x")).unwrap_err();
        match err {
            FmError::Api {
                code,
                message,
                expired,
            } => {
                assert_eq!(code, "1630");
                assert_eq!(message, "The Data API Requires https or http");
                assert!(!expired);
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn guard_accepts_http_and_https() {
        assert!(guard(request("http://fms.test/records")).is_ok());
        assert!(guard(request("https://fms.test/records")).is_ok());
    }

    #[test]
    fn guard_strips_params_request_and_keeps_siblings() {
        let mut req = request("https://fms.test/records");
        req.params
            .insert("request".to_string(), json!({ "timeout": 10 }));
        req.params.insert("_limit".to_string(), json!("2"));

        let sanitized = guard(req).unwrap();
        assert!(sanitized.params.get("request").is_none());
        assert_eq!(sanitized.params.get("_limit"), Some(&json!("2")));
    }

    #[test]
    fn guard_strips_data_request_and_keeps_siblings() {
        let mut req = request("https://fms.test/_find");
        req.data = Some(json!({
            "query": [{ "name": "han" }],
            "request": { "timeout": 10 }
        }));

        let sanitized = guard(req).unwrap();
        let data = sanitized.data.unwrap();
        assert!(data.get("request").is_none());
        assert_eq!(data["query"], json!([{ "name": "han" }]));
    }

    #[test]
    fn guard_only_strips_one_level_deep() {
        let mut req = request("https://fms.test/_find");
        req.data = Some(json!({ "query": [{ "request": "literal field" }] }));

        let sanitized = guard(req).unwrap();
        assert_eq!(
            sanitized.data.unwrap()["query"][0]["request"],
            json!("literal field")
        );
    }

    #[test]
    fn guard_tolerates_absent_paths() {
        let req = guard(request("https://fms.test/records")).unwrap();
        assert!(req.params.is_empty());
        assert!(req.data.is_none());
    }

    #[test]
    fn normalize_passes_success_through_unchanged() {
        let body = json!({
            "messages": [{ "code": "0", "message": "OK" }],
            "response": { "data": [] }
        });
        let out = normalize(response(200, "/records", &body.to_string())).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn normalize_carries_non_json_success_as_string() {
        let out = normalize(response(200, "/ping", "pong")).unwrap();
        assert_eq!(out, json!("pong"));
    }

    #[test]
    fn normalize_502_html_is_unavailable() {
        let err = normalize(response(502, "/records", "<html>Bad Gateway</html>")).unwrap_err();
        assert_api(&err, "1630", "The Data API is currently unavailable", false);
    }

    #[test]
    fn normalize_502_wins_even_with_structured_body() {
        let body = json!({ "messages": [{ "code": "101", "message": "nope" }] });
        let err = normalize(response(502, "/records", &body.to_string())).unwrap_err();
        assert_api(&err, "1630", "The Data API is currently unavailable", false);
    }

    #[test]
    fn normalize_non_object_body_is_unavailable() {
        let err = normalize(response(500, "/records", "oops")).unwrap_err();
        assert_api(&err, "1630", "The Data API is currently unavailable", false);

        let err = normalize(response(500, "/records", "[1, 2]")).unwrap_err();
        assert_api(&err, "1630", "The Data API is currently unavailable", false);
    }

    #[test]
    fn normalize_wpe_rejection() {
        let err = normalize(response(
            401,
            "/Streaming_SSL/MainDB/file.pdf?RCType=EmbeddedRCFileProcessor",
            "{}",
        ))
        .unwrap_err();
        assert_api(&err, "9", "FileMaker WPE rejected the request", false);
    }

    #[test]
    fn normalize_wpe_check_requires_structured_body() {
        // A non-object body on the container path is still a gateway error;
        // the body check runs first.
        let err = normalize(response(
            401,
            "/Streaming_SSL/MainDB/file.pdf?RCType=EmbeddedRCFileProcessor",
            "<html>denied</html>",
        ))
        .unwrap_err();
        assert_api(&err, "1630", "The Data API is currently unavailable", false);
    }

    #[test]
    fn normalize_401_without_marker_reads_the_body() {
        let body = json!({ "messages": [{ "code": "212", "message": "Invalid user account or password" }] });
        let err = normalize(response(401, "/sessions", &body.to_string())).unwrap_err();
        assert_api(&err, "212", "Invalid user account or password", false);
    }

    #[test]
    fn normalize_flags_expired_token() {
        let body = json!({ "messages": [{ "code": "952", "message": "Invalid token" }] });
        let err = normalize(response(401, "/records", &body.to_string())).unwrap_err();
        assert_api(&err, "952", "Invalid token", true);
    }

    #[test]
    fn normalize_passes_other_messages_through() {
        let body = json!({ "messages": [{ "code": "401", "message": "No records match the request" }] });
        let err = normalize(response(500, "/_find", &body.to_string())).unwrap_err();
        assert_api(&err, "401", "No records match the request", false);
    }

    #[test]
    fn normalize_uses_first_message_only() {
        let body = json!({ "messages": [
            { "code": "102", "message": "Field is missing" },
            { "code": "952", "message": "Invalid token" }
        ]});
        let err = normalize(response(500, "/records", &body.to_string())).unwrap_err();
        assert_api(&err, "102", "Field is missing", false);
    }

    #[test]
    fn normalize_empty_messages_is_malformed() {
        let err = normalize(response(500, "/records", r#"{"messages":[]}"#)).unwrap_err();
        assert!(matches!(err, FmError::Malformed(_)), "got {err:?}");

        let err = normalize(response(500, "/records", r#"{"response":{}}"#)).unwrap_err();
        assert!(matches!(err, FmError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn normalize_is_idempotent_over_the_same_outcome() {
        let outcome = response(
            401,
            "/records",
            &json!({ "messages": [{ "code": "952", "message": "Invalid token" }] }).to_string(),
        );
        let first = normalize(outcome.clone()).unwrap_err();
        let second = normalize(outcome).unwrap_err();
        assert_eq!(format!("{first:?}"), format!("{second:?}"));
    }

    fn assert_api(err: &FmError, code: &str, message: &str, expired: bool) {
        match err {
            FmError::Api {
                code: c,
                message: m,
                expired: e,
            } => {
                assert_eq!(c, code);
                assert_eq!(m, message);
                assert_eq!(*e, expired);
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
