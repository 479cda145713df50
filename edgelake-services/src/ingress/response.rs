//! Gateway response shapes.
use edgelake_core::IngressError;
use http::StatusCode;
use serde_json::{json, Map, Value};

pub const POLICY_VERSION: &str = "2012-10-17";

fn cors_headers() -> Map<String, Value> {
    let mut headers = Map::new();
    headers.insert(
        "Access-Control-Allow-Headers".into(),
        "Access-Control-Allow-Origin".into(),
    );
    headers.insert("Access-Control-Allow-Origin".into(), "*".into());
    headers.insert("Content-Type".into(), "application/json".into());
    headers
}

/// Strings are sent as-is, anything else as JSON text.
fn body_text(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn http(status: StatusCode, body: &Value) -> Value {
    json!({
        "statusCode": status.as_u16(),
        "headers": cors_headers(),
        "body": body_text(body),
    })
}

pub fn error_body(err: &IngressError) -> Value {
    json!({"error": err.to_string(), "kind": err.kind()})
}

pub fn http_error(err: &IngressError) -> Value {
    http(err.status_code(), &error_body(err))
}

pub fn ws(status: StatusCode, body: &Value) -> Value {
    json!({
        "statusCode": status.as_u16(),
        "body": body_text(body),
    })
}

pub fn ws_error(err: &IngressError) -> Value {
    ws(err.status_code(), &error_body(err))
}

pub fn accepted() -> (StatusCode, Value) {
    (StatusCode::ACCEPTED, json!({"accepted": true}))
}

/// Status and body for a function result.
///
/// GraphQL functions answering with an `errors` member map to 500; any other result
/// is a 200.
pub fn function_result(result: Value, graphql: bool) -> (StatusCode, Value) {
    let has_errors = |v: &Value| v.get("errors").is_some();
    let failed = graphql
        && match &result {
            Value::String(raw) => serde_json::from_str::<Value>(raw)
                .map(|v| has_errors(&v))
                .unwrap_or(false),
            other => has_errors(other),
        };
    let status = match failed {
        true => StatusCode::INTERNAL_SERVER_ERROR,
        false => StatusCode::OK,
    };
    (status, result)
}

/// Functions may answer with a complete gateway response. Its status and headers are
/// kept and the CORS headers added where missing.
pub fn passthrough(result: &Value) -> Option<Value> {
    let map = result.as_object()?;
    map.get("statusCode")?.as_u64()?;
    let mut out = map.clone();
    let headers = out
        .entry("headers")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(headers) = headers {
        for (k, v) in cors_headers() {
            headers.entry(k).or_insert(v);
        }
    }
    if let Some(body) = out.get("body") {
        if !body.is_string() {
            let text = body_text(body);
            out.insert("body".into(), Value::String(text));
        }
    }
    Some(Value::Object(out))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// IAM-style policy answering a gateway authorizer.
///
/// Claims are flattened to strings since gateways only forward scalar context values.
pub fn policy(principal: &str, effect: Effect, resource: &str, claims: Option<&Value>) -> Value {
    let effect = match effect {
        Effect::Allow => "Allow",
        Effect::Deny => "Deny",
    };
    let mut out = json!({
        "principalId": principal,
        "policyDocument": {
            "Version": POLICY_VERSION,
            "Statement": [{
                "Action": "execute-api:Invoke",
                "Effect": effect,
                "Resource": resource,
            }],
        },
    });
    if let Some(Value::Object(claims)) = claims {
        let context: Map<String, Value> = claims
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(body_text(v))))
            .collect();
        out["context"] = Value::Object(context);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let out = http_error(&IngressError::RouteNotFound("function x".into()));
        assert_eq!(out["statusCode"], 404);
        assert_eq!(out["headers"]["Access-Control-Allow-Origin"], "*");
        let body: Value = serde_json::from_str(out["body"].as_str().unwrap()).unwrap();
        assert_eq!(body["kind"], "RouteNotFound");

        let frame = ws_error(&IngressError::NotFound("websocket connection".into()));
        assert_eq!(frame["statusCode"], 404);
        assert!(frame.get("headers").is_none());
    }

    #[test]
    fn test_graphql_errors_answer_500() {
        let (status, _) = function_result(json!("{\"errors\": [{\"message\": \"bad\"}]}"), true);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let (status, _) = function_result(json!({"errors": []}), false);
        assert_eq!(status, StatusCode::OK);
        let (status, _) = function_result(json!({"data": {}}), true);
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_passthrough_keeps_status() {
        let out = passthrough(&json!({"statusCode": 302, "headers": {"Location": "/x"}, "body": {"a": 1}})).unwrap();
        assert_eq!(out["statusCode"], 302);
        assert_eq!(out["headers"]["Location"], "/x");
        assert_eq!(out["headers"]["Access-Control-Allow-Origin"], "*");
        assert_eq!(out["body"], "{\"a\":1}");
        assert!(passthrough(&json!({"data": 1})).is_none());
    }

    #[test]
    fn test_policy_document() {
        let claims = json!({"sub": "u1", "admin": true});
        let out = policy("key-abc", Effect::Allow, "arn:x", Some(&claims));
        assert_eq!(out["policyDocument"]["Statement"][0]["Effect"], "Allow");
        assert_eq!(out["context"]["admin"], "true");
        let out = policy("key-abc", Effect::Deny, "arn:x", None);
        assert!(out.get("context").is_none());
    }
}
