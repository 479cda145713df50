//! Classification of raw gateway events and extraction of their normalized fields.
use edgelake_core::{context::ANONYMOUS_API_KEY, model::Setting, IngressError, IngressResult};
use serde_json::{Map, Value};

const API_KEY_NAMES: [&str; 4] = ["x-api-key", "api-key", "x_api_key", "api_key"];
const DEFAULT_AREA: &str = "core";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Identity-provider hook, pre-authenticated by the edge.
    IdentityTrigger,
    /// Gateway authorizer request expecting a policy document.
    Authorizer,
    WebSocket,
    Http,
}

pub fn classify(event: &Value) -> IngressResult<EventKind> {
    if !event.is_object() {
        return Err(IngressError::MalformedRequest(
            "event must be a JSON object".to_string(),
        ));
    }
    let rc = &event["requestContext"];
    let kind = if ["triggerSource", "userPoolId", "request", "response"]
        .iter()
        .all(|k| event.get(k).is_some())
    {
        EventKind::IdentityTrigger
    } else if matches!(
        event["type"].as_str().map(|t| t.trim().to_ascii_uppercase()).as_deref(),
        Some("REQUEST" | "TOKEN")
    ) {
        EventKind::Authorizer
    } else if rc.get("connectionId").is_some() && rc.get("routeKey").is_some() {
        EventKind::WebSocket
    } else if rc.get("http").is_some() || rc.get("httpMethod").is_some() {
        EventKind::Http
    } else {
        return Err(IngressError::MalformedRequest(
            "unrecognized event shape".to_string(),
        ));
    };
    Ok(kind)
}

/// Where an HTTP event points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRoute {
    pub area: String,
    pub endpoint_id: String,
    pub function_name: String,
    /// Remainder of the proxy path after the function name.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Function,
    Proxy,
}

/// Matches `/{area}/{endpoint_id}/{function}[/{*proxy}]` for events that carry a raw path
/// but no path parameters.
pub struct PathRouter(matchit::Router<Shape>);

impl PathRouter {
    pub fn new() -> Result<Self, matchit::InsertError> {
        let mut router = matchit::Router::new();
        router.insert("/{area}/{endpoint_id}/{function}", Shape::Function)?;
        router.insert("/{area}/{endpoint_id}/{function}/{*proxy}", Shape::Proxy)?;
        Ok(Self(router))
    }

    pub fn route(&self, path: &str) -> Option<HttpRoute> {
        let matched = self.0.at(path).ok()?;
        let get = |name: &str| matched.params.get(name).unwrap_or_default().to_string();
        Some(HttpRoute {
            area: get("area"),
            endpoint_id: get("endpoint_id"),
            function_name: get("function"),
            path: match matched.value {
                Shape::Function => None,
                Shape::Proxy => Some(get("proxy")).filter(|p| !p.is_empty()),
            },
        })
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Split `function[/rest]`.
fn split_proxy(proxy: &str) -> (String, Option<String>) {
    let proxy = proxy.trim_matches('/');
    match proxy.split_once('/') {
        Some((function, rest)) => (
            function.trim().to_string(),
            Some(rest.trim().to_string()).filter(|r| !r.is_empty()),
        ),
        None => (proxy.trim().to_string(), None),
    }
}

pub fn http_route(event: &Value, router: &PathRouter) -> IngressResult<HttpRoute> {
    let path_params = &event["pathParameters"];
    if let Some(endpoint_id) = str_field(path_params, "endpoint_id") {
        let (function_name, path) = match str_field(path_params, "proxy") {
            Some(proxy) => split_proxy(proxy),
            None => (
                str_field(path_params, "function_name")
                    .unwrap_or_default()
                    .to_string(),
                None,
            ),
        };
        if function_name.is_empty() {
            return Err(IngressError::MalformedRequest(
                "missing function name in path".to_string(),
            ));
        }
        return Ok(HttpRoute {
            area: str_field(path_params, "area")
                .unwrap_or(DEFAULT_AREA)
                .to_string(),
            endpoint_id: endpoint_id.to_string(),
            function_name,
            path,
        });
    }

    let raw_path = str_field(event, "rawPath")
        .or_else(|| str_field(event, "path"))
        .ok_or_else(|| IngressError::MalformedRequest("missing request path".to_string()))?;
    router.route(raw_path).ok_or_else(|| {
        IngressError::MalformedRequest(format!("path {raw_path} is not /area/endpoint/function"))
    })
}

/// Route encoded in an authorizer's `methodArn`:
/// `arn:...:api/stage/METHOD/area/endpoint_id/function[/rest]`.
pub fn authorizer_route(event: &Value, router: &PathRouter) -> IngressResult<(HttpRoute, Option<String>)> {
    if str_field(&event["pathParameters"], "endpoint_id").is_some() {
        return Ok((http_route(event, router)?, method(event)));
    }
    let arn = str_field(event, "methodArn")
        .ok_or_else(|| IngressError::MalformedRequest("missing methodArn".to_string()))?;
    let resource = arn.splitn(6, ':').nth(5).unwrap_or_default();
    let mut parts = resource.splitn(4, '/');
    let (_api, _stage) = (parts.next(), parts.next());
    let arn_method = parts
        .next()
        .filter(|m| *m != "*")
        .map(str::to_string);
    let path = format!("/{}", parts.next().unwrap_or_default());
    let route = router.route(&path).ok_or_else(|| {
        IngressError::MalformedRequest(format!("methodArn {arn} does not name a function"))
    })?;
    Ok((route, arn_method.or_else(|| method(event))))
}

pub fn method(event: &Value) -> Option<String> {
    let rc = &event["requestContext"];
    str_field(&rc["http"], "method")
        .or_else(|| str_field(rc, "httpMethod"))
        .or_else(|| str_field(event, "httpMethod"))
        .map(str::to_ascii_uppercase)
}

/// Case-insensitive lookup in an object of string values.
fn lookup_ci<'a>(map: &'a Value, name: &str) -> Option<&'a str> {
    map.as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn key_from_names(map: &Value) -> Option<&str> {
    API_KEY_NAMES.iter().find_map(|n| lookup_ci(map, n))
}

/// Parsed JSON body. Absent or blank bodies yield an empty object.
pub fn body(event: &Value) -> IngressResult<Map<String, Value>> {
    match &event["body"] {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        Value::String(raw) if raw.trim().is_empty() => Ok(Map::new()),
        Value::String(_) if event["isBase64Encoded"].as_bool() == Some(true) => Err(
            IngressError::MalformedRequest("base64 encoded bodies are not accepted".to_string()),
        ),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(IngressError::MalformedRequest(
                "request body must be a JSON object".to_string(),
            )),
            Err(e) => Err(IngressError::MalformedRequest(format!(
                "request body is not JSON: {e}"
            ))),
        },
        _ => Err(IngressError::MalformedRequest(
            "request body must be a JSON object".to_string(),
        )),
    }
}

/// Api key from, in order: gateway identity, event root, headers, query string, body.
/// Falls back to the anonymous key.
pub fn api_key(event: &Value) -> String {
    str_field(&event["requestContext"]["identity"], "apiKey")
        .or_else(|| str_field(event, "api_key"))
        .or_else(|| key_from_names(&event["headers"]))
        .or_else(|| key_from_names(&event["queryStringParameters"]))
        .map(str::to_string)
        .or_else(|| {
            body(event)
                .ok()
                .and_then(|b| b.get("api_key").and_then(Value::as_str).map(str::trim).map(str::to_string))
                .filter(|k| !k.is_empty())
        })
        .unwrap_or_else(|| ANONYMOUS_API_KEY.to_string())
}

/// Token-type authorizers carry the key as `authorizationToken`.
pub fn authorizer_api_key(event: &Value) -> String {
    match str_field(event, "authorizationToken") {
        Some(token) => token.to_string(),
        None => api_key(event),
    }
}

pub fn gateway_claims(event: &Value) -> Option<Value> {
    let authorizer = event["requestContext"].get("authorizer")?;
    let claims = authorizer
        .get("claims")
        .or_else(|| authorizer.get("jwt").and_then(|j| j.get("claims")))
        .unwrap_or(authorizer);
    claims.is_object().then(|| claims.clone())
}

pub fn query(event: &Value) -> Map<String, Value> {
    event["queryStringParameters"]
        .as_object()
        .cloned()
        .unwrap_or_default()
}

/// Parameters handed to an HTTP function: query string, routing identifiers, then
/// the body, with the proxy remainder as `path`.
pub fn http_params(event: &Value, route: &HttpRoute, api_key: &str) -> IngressResult<Map<String, Value>> {
    let mut params = query(event);
    params.insert("endpoint_id".into(), route.endpoint_id.clone().into());
    params.insert("area".into(), route.area.clone().into());
    params.insert("api_key".into(), api_key.into());
    params.extend(body(event)?);
    if let Some(path) = &route.path {
        params.insert("path".into(), path.clone().into());
    }
    Ok(params)
}

/// Whether an authorizer request guards a websocket `$connect`, either by its route key or
/// by the route at the end of its `methodArn`.
pub fn is_connect_authorizer(event: &Value) -> bool {
    let by_route = str_field(&event["requestContext"], "routeKey")
        .is_some_and(|r| r.eq_ignore_ascii_case("$connect"));
    let by_arn = str_field(event, "methodArn").is_some_and(|arn| arn.ends_with("/$connect"));
    by_route || by_arn
}

/// `requestContext.connectionId`, lower-cased.
pub fn connection_id(event: &Value) -> Option<String> {
    str_field(&event["requestContext"], "connectionId").map(str::to_ascii_lowercase)
}

/// `requestContext.connectionId` and `requestContext.routeKey`, lower-cased.
pub fn ws_ids(event: &Value) -> IngressResult<(String, String)> {
    let rc = &event["requestContext"];
    match (str_field(rc, "connectionId"), str_field(rc, "routeKey")) {
        (Some(id), Some(route)) => Ok((id.to_ascii_lowercase(), route.to_ascii_lowercase())),
        _ => Err(IngressError::MalformedRequest(
            "invalid websocket connection".to_string(),
        )),
    }
}

/// `funct` and decoded `payload` of a websocket `stream` message.
pub fn ws_message(event: &Value) -> IngressResult<(String, Map<String, Value>)> {
    let body = body(event)?;
    let funct = str_field(&Value::Object(body.clone()), "funct")
        .ok_or_else(|| IngressError::MalformedRequest("missing `funct`".to_string()))?
        .to_string();
    let payload = match body.get("payload") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(IngressError::MalformedRequest(
                    "`payload` must encode a JSON object".to_string(),
                ))
            }
        },
        Some(_) => {
            return Err(IngressError::MalformedRequest(
                "`payload` must be a JSON object".to_string(),
            ))
        }
    };
    Ok((funct, payload))
}

pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.trim().chars() {
        if c == '-' || c == ' ' || c == '_' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

fn custom_header_keys(setting: &Setting) -> Vec<String> {
    let keys = match setting.get("custom_header_keys") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(raw)) => match serde_json::from_str::<Vec<String>>(raw) {
            Ok(keys) => keys,
            Err(_) => raw.split(',').map(str::to_string).collect(),
        },
        _ => Vec::new(),
    };
    keys.iter()
        .map(|k| to_snake_case(k))
        .filter(|k| !k.is_empty())
        .collect()
}

/// Values named by the `custom_header_keys` setting, looked up by snake_case name
/// across the given sources. Earlier sources win.
pub fn metadata(setting: &Setting, sources: &[&Value]) -> Map<String, Value> {
    let wanted = custom_header_keys(setting);
    let mut found = Map::new();
    if wanted.is_empty() {
        return found;
    }
    for source in sources {
        let Some(map) = source.as_object() else {
            continue;
        };
        for (key, value) in map {
            let snake = to_snake_case(key);
            if wanted.contains(&snake) && !found.contains_key(&snake) {
                found.insert(snake, value.clone());
            }
        }
    }
    found
}
