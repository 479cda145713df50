//! Records read by the ingress pipeline and the values derived from them.
//!
//! Endpoint, Connection and Function records are provisioned elsewhere and are
//! read-only here. WebSocket connection records are the only ones the ingress writes.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Setting = Map<String, Value>;

/// Websocket connections expire one day after `$connect`.
pub const WS_CONNECTION_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub endpoint_id: String,
    pub area: String,
    pub region: String,
    #[serde(default)]
    pub setting: Setting,
}

/// Entry of a connection's function mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionRef {
    /// Compute target the function record lives under.
    pub target: String,
    /// Name of the function record. Defaults to the mapping key.
    pub function: Option<String>,
    /// Overrides applied on top of the function setting for this connection only.
    #[serde(default)]
    pub setting: Setting,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub endpoint_id: String,
    pub api_key: String,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionRef>,
    #[serde(default)]
    pub connection_setting: Setting,
}

impl Connection {
    pub fn function(&self, name: &str) -> Option<&FunctionRef> {
        self.functions.get(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvocationType {
    #[default]
    #[serde(alias = "RequestResponse")]
    Sync,
    #[serde(alias = "Event")]
    Async,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Function {
    pub target: String,
    pub function: String,
    pub module_name: String,
    pub class_name: String,
    pub region: String,
    /// Area the function belongs to. Unchecked when absent.
    pub area: Option<String>,
    /// Upper-case HTTP methods. Empty means every method is accepted.
    #[serde(default)]
    pub allowed_methods: BTreeSet<String>,
    #[serde(default)]
    pub function_setting: Setting,
    #[serde(default)]
    pub invocation_type: InvocationType,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub graphql: bool,
}

/// Everything the gate and the invocation engine need about a resolved function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDescriptor {
    pub module_name: String,
    pub class_name: String,
    pub function: String,
    pub merged_setting: Setting,
    pub region: String,
    pub target: String,
    pub area: Option<String>,
    pub allowed_methods: BTreeSet<String>,
    pub invocation_type: InvocationType,
    pub auth_required: bool,
    pub graphql: bool,
}

impl FunctionDescriptor {
    pub fn new(function: Function, merged_setting: Setting) -> Self {
        FunctionDescriptor {
            module_name: function.module_name,
            class_name: function.class_name,
            function: function.function,
            merged_setting,
            region: function.region,
            target: function.target,
            area: function.area,
            allowed_methods: function.allowed_methods,
            invocation_type: function.invocation_type,
            auth_required: function.auth_required,
            graphql: function.graphql,
        }
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.allowed_methods.is_empty()
            || self
                .allowed_methods
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(method))
    }
}

/// Shallow merge: every top-level key of `overrides` replaces the one in `base`.
///
/// Nested objects are replaced as a whole, never merged recursively.
pub fn merge_setting(base: &Setting, overrides: &Setting) -> Setting {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Function defaults overridden by the connection, where the per-function entry of the
/// connection mapping takes precedence over the connection-wide setting.
pub fn merged_setting(function: &Function, connection: &Connection, entry: &FunctionRef) -> Setting {
    let connection_level = merge_setting(&connection.connection_setting, &entry.setting);
    merge_setting(&function.function_setting, &connection_level)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsConnection {
    pub connection_id: String,
    pub area: String,
    pub endpoint_id: String,
    pub api_key: String,
    #[serde(default)]
    pub url_parameters: Setting,
    pub created_at: u64,
    pub updated_at: u64,
    /// Expiry as unix seconds.
    pub ttl: u64,
    pub status: WsStatus,
}

impl WsConnection {
    pub fn open(
        connection_id: impl Into<String>,
        area: impl Into<String>,
        endpoint_id: impl Into<String>,
        api_key: impl Into<String>,
        url_parameters: Setting,
        now: u64,
    ) -> Self {
        WsConnection {
            connection_id: connection_id.into(),
            area: area.into(),
            endpoint_id: endpoint_id.into(),
            api_key: api_key.into(),
            url_parameters,
            created_at: now,
            updated_at: now,
            ttl: now + WS_CONNECTION_TTL_SECS,
            status: WsStatus::Active,
        }
    }

    pub fn close(&mut self, now: u64) {
        self.status = WsStatus::Closed;
        self.updated_at = now;
    }

    pub fn is_live(&self, now: u64) -> bool {
        self.status == WsStatus::Active && now < self.ttl
    }
}
