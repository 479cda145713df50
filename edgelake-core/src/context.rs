use std::{net::SocketAddr, sync::Arc};

use derive_more::{From, Into};
use serde_json::{Map, Value};

/// Key used when the caller did not present any API key.
pub const ANONYMOUS_API_KEY: &str = "#####";

#[derive(From, Into, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Normalized request data shared by the resolver, the authorization gate and the
/// invocation engine.
///
/// The dispatcher builds one per event and hands it down by reference; no stage
/// mutates it. Values learned later in the pipeline (merged setting, granted claims)
/// travel next to it instead of being written back.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub area: String,
    pub endpoint_id: String,
    pub function_name: String,
    pub api_key: String,
    /// HTTP method, absent for websocket messages.
    pub method: Option<String>,
    pub connection_id: Option<String>,
    /// Business parameters handed to the function.
    pub params: Map<String, Value>,
    /// Claims attached by the edge (e.g. a gateway authorizer).
    pub gateway_claims: Option<Value>,
    /// Complete normalized ingress event.
    pub event: Arc<Value>,
}

impl RequestContext {
    pub fn new(
        area: impl Into<String>,
        endpoint_id: impl Into<String>,
        function_name: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let api_key = match api_key.trim() {
            "" => ANONYMOUS_API_KEY.to_string(),
            trimmed => trimmed.to_string(),
        };
        RequestContext {
            area: area.into(),
            endpoint_id: endpoint_id.into(),
            function_name: function_name.into(),
            api_key,
            method: None,
            connection_id: None,
            params: Map::new(),
            gateway_claims: None,
            event: Arc::new(Value::Null),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into().to_ascii_uppercase());
        self
    }

    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_gateway_claims(mut self, claims: Option<Value>) -> Self {
        self.gateway_claims = claims;
        self
    }

    pub fn with_event(mut self, event: Value) -> Self {
        self.event = Arc::new(event);
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.api_key == ANONYMOUS_API_KEY
    }
}
