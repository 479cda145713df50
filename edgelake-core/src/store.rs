//! Record-store boundary.
//!
//! The ingress only reads endpoint, connection and function records. Websocket
//! connection records are the single kind it writes.
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
};

use serde::Deserialize;

use crate::{
    config::parse_from_slice,
    model::{Connection, Endpoint, Function, WsConnection},
    util::file_read_sync,
    IngressError,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed record: {0}")]
    Malformed(String),
}

impl From<StoreError> for IngressError {
    fn from(e: StoreError) -> Self {
        IngressError::Unavailable(e.to_string())
    }
}

pub trait RecordStore {
    async fn get_endpoint(&self, endpoint_id: &str) -> Result<Option<Endpoint>, StoreError>;

    async fn get_connection(
        &self,
        endpoint_id: &str,
        api_key: &str,
    ) -> Result<Option<Connection>, StoreError>;

    async fn get_function(
        &self,
        target: &str,
        function: &str,
    ) -> Result<Option<Function>, StoreError>;

    async fn get_ws_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<WsConnection>, StoreError>;

    /// Insert or overwrite, keyed by `connection_id`.
    async fn put_ws_connection(&self, record: WsConnection) -> Result<(), StoreError>;

    async fn delete_ws_connection(&self, connection_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Records {
    endpoints: HashMap<String, Endpoint>,
    connections: HashMap<(String, String), Connection>,
    functions: HashMap<(String, String), Function>,
    ws_connections: HashMap<String, WsConnection>,
}

/// Records kept in process memory, shared between every worker holding a clone.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<Records>>,
}

#[derive(Debug, Default, Deserialize)]
struct Seed {
    #[serde(default)]
    endpoints: Vec<Endpoint>,
    #[serde(default)]
    connections: Vec<Connection>,
    #[serde(default)]
    functions: Vec<Function>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load endpoint, connection and function records from a TOML or JSON fixture.
    pub fn from_seed_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = file_read_sync(path)?;
        Self::from_seed(&content)
    }

    pub fn from_seed(content: &[u8]) -> anyhow::Result<Self> {
        let seed = parse_from_slice::<Seed>(content)?;
        tracing::info!(
            "seeding record store: {} endpoints, {} connections, {} functions",
            seed.endpoints.len(),
            seed.connections.len(),
            seed.functions.len()
        );
        let store = Self::new();
        for endpoint in seed.endpoints {
            store.insert_endpoint(endpoint);
        }
        for connection in seed.connections {
            let key = (connection.endpoint_id.clone(), connection.api_key.clone());
            if store.read().connections.contains_key(&key) {
                return Err(StoreError::Malformed(format!(
                    "duplicate connection for endpoint {}",
                    key.0
                ))
                .into());
            }
            if let Some((name, _)) = connection.functions.iter().find(|(_, r)| r.target.is_empty()) {
                return Err(StoreError::Malformed(format!(
                    "function {name} of endpoint {} has no target",
                    key.0
                ))
                .into());
            }
            store.insert_connection(connection);
        }
        for function in seed.functions {
            if function.target.is_empty() || function.function.is_empty() {
                return Err(StoreError::Malformed(format!(
                    "function record `{}/{}` needs a target and a name",
                    function.target, function.function
                ))
                .into());
            }
            store.insert_function(function);
        }
        Ok(store)
    }

    pub fn insert_endpoint(&self, endpoint: Endpoint) {
        self.write()
            .endpoints
            .insert(endpoint.endpoint_id.clone(), endpoint);
    }

    pub fn insert_connection(&self, connection: Connection) {
        let key = (connection.endpoint_id.clone(), connection.api_key.clone());
        self.write().connections.insert(key, connection);
    }

    pub fn insert_function(&self, function: Function) {
        let key = (function.target.clone(), function.function.clone());
        self.write().functions.insert(key, function);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Records> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Records> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordStore for MemoryStore {
    async fn get_endpoint(&self, endpoint_id: &str) -> Result<Option<Endpoint>, StoreError> {
        Ok(self.read().endpoints.get(endpoint_id).cloned())
    }

    async fn get_connection(
        &self,
        endpoint_id: &str,
        api_key: &str,
    ) -> Result<Option<Connection>, StoreError> {
        let key = (endpoint_id.to_string(), api_key.to_string());
        Ok(self.read().connections.get(&key).cloned())
    }

    async fn get_function(
        &self,
        target: &str,
        function: &str,
    ) -> Result<Option<Function>, StoreError> {
        let key = (target.to_string(), function.to_string());
        Ok(self.read().functions.get(&key).cloned())
    }

    async fn get_ws_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<WsConnection>, StoreError> {
        Ok(self.read().ws_connections.get(connection_id).cloned())
    }

    async fn put_ws_connection(&self, record: WsConnection) -> Result<(), StoreError> {
        self.write()
            .ws_connections
            .insert(record.connection_id.clone(), record);
        Ok(())
    }

    async fn delete_ws_connection(&self, connection_id: &str) -> Result<(), StoreError> {
        self.write().ws_connections.remove(connection_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use super::*;
    use crate::model::{Setting, WsStatus};

    fn ready<F: Future>(fut: F) -> F::Output {
        monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
            .build()
            .unwrap()
            .block_on(fut)
    }

    const SEED: &str = r#"
        [[endpoints]]
        endpoint_id = "ep1"
        area = "core"
        region = "us-east-1"

        [[connections]]
        endpoint_id = "ep1"
        api_key = "key-abc"
        connection_setting = { tier = "gold" }

        [connections.functions.doStuff]
        target = "worker"
        setting = { timeout = 60 }

        [[functions]]
        target = "worker"
        function = "doStuff"
        module_name = "stuff"
        class_name = "Stuff"
        region = "us-east-1"
        allowed_methods = ["POST"]
        function_setting = { timeout = 30, env = "prod" }
    "#;

    #[test]
    fn test_seed_records_are_readable() {
        let store = MemoryStore::from_seed(SEED.as_bytes()).unwrap();
        let endpoint = ready(store.get_endpoint("ep1")).unwrap().unwrap();
        assert_eq!(endpoint.area, "core");
        let connection = ready(store.get_connection("ep1", "key-abc"))
            .unwrap()
            .unwrap();
        assert_eq!(connection.function("doStuff").unwrap().target, "worker");
        assert!(ready(store.get_connection("ep1", "other")).unwrap().is_none());
        let function = ready(store.get_function("worker", "doStuff"))
            .unwrap()
            .unwrap();
        assert!(function.allowed_methods.contains("POST"));
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let seed = r#"{"connections": [
            {"endpoint_id": "ep1", "api_key": "k"},
            {"endpoint_id": "ep1", "api_key": "k"}
        ]}"#;
        let err = MemoryStore::from_seed(seed.as_bytes()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn test_seed_function_without_target_rejected() {
        let seed = r#"{"connections": [
            {"endpoint_id": "ep1", "api_key": "k", "functions": {"doStuff": {"target": ""}}}
        ]}"#;
        let err = MemoryStore::from_seed(seed.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("doStuff"));
    }

    #[test]
    fn test_ws_connection_last_writer_wins() {
        let store = MemoryStore::new();
        let mut record = WsConnection::open("c1", "core", "ep1", "k", Setting::new(), 10);
        ready(store.put_ws_connection(record.clone())).unwrap();
        record.close(20);
        ready(store.put_ws_connection(record)).unwrap();
        let stored = ready(store.get_ws_connection("c1")).unwrap().unwrap();
        assert_eq!(stored.status, WsStatus::Closed);
        ready(store.delete_ws_connection("c1")).unwrap();
        ready(store.delete_ws_connection("c1")).unwrap();
        assert!(ready(store.get_ws_connection("c1")).unwrap().is_none());
    }
}
