//! HTTP front of the dispatcher.
//!
//! Requests arriving over a plain HTTP listener are turned into gateway events so the
//! same dispatcher serves both a managed gateway and a direct deployment:
//!
//! - `POST` on the configured invoke path carries a raw gateway event as its JSON body. The
//!   dispatcher output is answered verbatim as JSON.
//! - Any other request is translated into an HTTP proxy event (method, path, headers, query
//!   string, body and peer address). The `statusCode`, `headers` and `body` members of the
//!   dispatcher output become the HTTP response.
use std::fmt;

use bytes::Bytes;
use edgelake_core::{
    config::InvokePath,
    context::PeerAddr,
    http::ResponseWithContinue,
};
use http::{
    header::{HeaderName, HeaderValue, CONTENT_TYPE},
    request::Parts,
    Method, Request, Response, StatusCode,
};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use serde_json::{json, Map, Value};
use service_async::{
    layer::{layer_fn, FactoryLayer},
    MakeService, Param, Service,
};

#[derive(Clone)]
pub struct EventHandler<H> {
    inner: H,
    invoke_path: String,
}

impl<H, B> Service<(Request<B>, PeerAddr)> for EventHandler<H>
where
    H: Service<Value, Response = Value>,
    B: Body,
    B::Error: fmt::Display,
{
    type Response = ResponseWithContinue<Full<Bytes>>;
    type Error = H::Error;

    async fn call(
        &self,
        (request, peer): (Request<B>, PeerAddr),
    ) -> Result<Self::Response, Self::Error> {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!("failed to read request body from {}: {e}", peer.0);
                return Ok((error_response(StatusCode::BAD_REQUEST, "unreadable body"), false));
            }
        };

        if parts.method == Method::POST && parts.uri.path() == self.invoke_path {
            let event = match serde_json::from_slice::<Value>(&body) {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!("invalid event from {}: {e}", peer.0);
                    return Ok((error_response(StatusCode::BAD_REQUEST, "invalid event"), true));
                }
            };
            let out = self.inner.call(event).await?;
            return Ok((json_response(StatusCode::OK, &out), true));
        }

        let event = proxy_event(&parts, &body, peer);
        let out = self.inner.call(event).await?;
        Ok((gateway_response(&out), true))
    }
}

/// HTTP proxy event for a direct request.
pub fn proxy_event(parts: &Parts, body: &[u8], peer: PeerAddr) -> Value {
    let headers: Map<String, Value> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), Value::String(value.to_string())))
        })
        .collect();
    let query: Map<String, Value> = parts
        .uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .map(|(k, v)| (k, Value::String(v)))
                .collect()
        })
        .unwrap_or_default();
    let path = parts.uri.path();
    let method = parts.method.as_str();
    json!({
        "httpMethod": method,
        "path": path,
        "rawPath": path,
        "headers": headers,
        "queryStringParameters": query,
        "body": String::from_utf8_lossy(body),
        "isBase64Encoded": false,
        "requestContext": {
            "httpMethod": method,
            "path": path,
            "identity": {"sourceIp": peer.0.ip().to_string()},
        },
    })
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({"error": message}))
}

/// Maps a `{statusCode, headers, body}` document onto an HTTP response. Outputs without a
/// status code are sent as JSON with 200.
fn gateway_response(out: &Value) -> Response<Full<Bytes>> {
    let Some(status) = out["statusCode"]
        .as_u64()
        .and_then(|s| u16::try_from(s).ok())
        .and_then(|s| StatusCode::from_u16(s).ok())
    else {
        return json_response(StatusCode::OK, out);
    };
    let body = match &out["body"] {
        Value::Null => Bytes::new(),
        Value::String(text) => Bytes::from(text.clone()),
        other => Bytes::from(other.to_string()),
    };
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if let Some(headers) = out["headers"].as_object() {
        for (name, value) in headers {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => tracing::debug!("dropping invalid response header {name}"),
            }
        }
    }
    response
}

impl<F: MakeService> MakeService for EventHandler<F> {
    type Service = EventHandler<F::Service>;
    type Error = F::Error;

    fn make_via_ref(&self, old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(EventHandler {
            inner: self.inner.make_via_ref(old.map(|o| &o.inner))?,
            invoke_path: self.invoke_path.clone(),
        })
    }
}

impl<F> EventHandler<F> {
    pub fn layer<C>() -> impl FactoryLayer<C, F, Factory = Self>
    where
        C: Param<InvokePath>,
    {
        layer_fn(|c: &C, inner| {
            let InvokePath(invoke_path) = c.param();
            Self { inner, invoke_path }
        })
    }
}
