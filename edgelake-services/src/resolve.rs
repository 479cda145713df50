//! Walks endpoint, connection and function records into a [`FunctionDescriptor`].
//!
//! The endpoint is always read from the store so that region and area are validated
//! on every request. The rest of the chain is cached under [`ROUTING_CACHE`] keyed by
//! endpoint, function name and api key. Only successful resolutions are cached, and the
//! method check runs on every request against the cached descriptor.
use std::time::Duration;

use edgelake_core::{
    context::RequestContext,
    model::{merged_setting, Endpoint, FunctionDescriptor},
    store::RecordStore,
    IngressError, IngressResult,
};

use crate::cache::CacheFacade;

pub const ROUTING_CACHE: &str = "routing";

pub struct Resolver<S> {
    store: S,
    cache: CacheFacade,
    region: String,
    routing_ttl: Duration,
}

impl<S> Resolver<S> {
    pub fn new(store: S, cache: CacheFacade, region: impl Into<String>, routing_ttl: Duration) -> Self {
        Self {
            store,
            cache,
            region: region.into(),
            routing_ttl,
        }
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    pub fn cache(&self) -> &CacheFacade {
        &self.cache
    }
}

pub fn routing_key(endpoint_id: &str, function_name: &str, api_key: &str) -> String {
    format!("{endpoint_id}/{function_name}/{api_key}")
}

impl<S: RecordStore> Resolver<S> {
    pub async fn resolve(&self, ctx: &RequestContext) -> IngressResult<FunctionDescriptor> {
        let endpoint = self.endpoint(ctx).await?;
        let key = routing_key(&ctx.endpoint_id, &ctx.function_name, &ctx.api_key);
        let descriptor = self
            .cache
            .get_or_compute(ROUTING_CACHE, &key, self.routing_ttl, || {
                self.resolve_uncached(ctx, &endpoint)
            })
            .await?;

        if let Some(method) = ctx.method.as_deref() {
            if !descriptor.allows_method(method) {
                return Err(IngressError::MethodNotAllowed {
                    function: ctx.function_name.clone(),
                    method: method.to_string(),
                });
            }
        }
        Ok(descriptor)
    }

    /// The endpoint named by `ctx`, checked against the area and operating region.
    pub async fn endpoint(&self, ctx: &RequestContext) -> IngressResult<Endpoint> {
        let endpoint = match self.store.get_endpoint(&ctx.endpoint_id).await? {
            Some(endpoint) if endpoint.area == ctx.area => endpoint,
            _ => {
                return Err(IngressError::NotFound(format!(
                    "endpoint {} in area {}",
                    ctx.endpoint_id, ctx.area
                )))
            }
        };
        if endpoint.region != self.region {
            return Err(IngressError::RegionMismatch {
                endpoint: endpoint.region,
                operating: self.region.clone(),
            });
        }
        Ok(endpoint)
    }

    async fn resolve_uncached(
        &self,
        ctx: &RequestContext,
        endpoint: &Endpoint,
    ) -> IngressResult<FunctionDescriptor> {
        let connection = self
            .store
            .get_connection(&endpoint.endpoint_id, &ctx.api_key)
            .await?
            .ok_or_else(|| IngressError::Unauthorized("invalid api key".to_string()))?;

        let entry = connection.function(&ctx.function_name).ok_or_else(|| {
            IngressError::RouteNotFound(format!("function {}", ctx.function_name))
        })?;
        let record_name = entry.function.as_deref().unwrap_or(&ctx.function_name);
        let function = self
            .store
            .get_function(&entry.target, record_name)
            .await?
            .ok_or_else(|| {
                IngressError::NotFound(format!("function {}/{}", entry.target, record_name))
            })?;

        if let Some(area) = function.area.as_deref() {
            if area != ctx.area {
                return Err(IngressError::RouteNotFound(format!(
                    "function {} in area {}",
                    ctx.function_name, ctx.area
                )));
            }
        }

        let setting = merged_setting(&function, &connection, entry);
        tracing::debug!(
            "resolved {}/{} to {}.{}.{}",
            ctx.endpoint_id,
            ctx.function_name,
            function.module_name,
            function.class_name,
            function.function
        );
        Ok(FunctionDescriptor::new(function, setting))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        cell::Cell,
        collections::{BTreeMap, BTreeSet},
    };

    use edgelake_core::{
        model::{Connection, Function, FunctionRef, Setting, WsConnection},
        store::{MemoryStore, StoreError},
    };
    use serde_json::{json, Value};

    use super::*;
    use crate::{cache::MemoryTier, testing::block_on};

    pub(crate) fn obj(value: Value) -> Setting {
        value.as_object().cloned().unwrap_or_default()
    }

    /// Endpoint `ep1` in area `core` / region `us-east-1`, key `key-abc` mapping
    /// `doStuff` (POST/GET) and `dangling`.
    pub(crate) fn fixture_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_endpoint(Endpoint {
            endpoint_id: "ep1".into(),
            area: "core".into(),
            region: "us-east-1".into(),
            setting: Setting::new(),
        });
        let mut functions = BTreeMap::new();
        functions.insert(
            "doStuff".to_string(),
            FunctionRef {
                target: "worker".into(),
                function: None,
                setting: obj(json!({"timeout": 60})),
            },
        );
        functions.insert(
            "dangling".to_string(),
            FunctionRef {
                target: "worker".into(),
                function: Some("gone".into()),
                setting: Setting::new(),
            },
        );
        store.insert_connection(Connection {
            endpoint_id: "ep1".into(),
            api_key: "key-abc".into(),
            functions,
            connection_setting: Setting::new(),
        });
        store.insert_function(Function {
            target: "worker".into(),
            function: "doStuff".into(),
            module_name: "stuff".into(),
            class_name: "Stuff".into(),
            region: "us-east-1".into(),
            area: Some("core".into()),
            allowed_methods: BTreeSet::from(["GET".to_string(), "POST".to_string()]),
            function_setting: obj(json!({"timeout": 30, "env": "prod"})),
            invocation_type: Default::default(),
            auth_required: false,
            graphql: false,
        });
        store
    }

    fn resolver(store: MemoryStore, region: &str) -> Resolver<MemoryStore> {
        let cache = CacheFacade::builder().tier(MemoryTier::new()).build();
        Resolver::new(store, cache, region, Duration::from_secs(120))
    }

    fn ctx(function: &str, api_key: &str, method: &str) -> RequestContext {
        RequestContext::new("core", "ep1", function, api_key).with_method(method)
    }

    #[test]
    fn test_resolve_merges_connection_override() {
        let resolver = resolver(fixture_store(), "us-east-1");
        let descriptor = block_on(resolver.resolve(&ctx("doStuff", "key-abc", "POST"))).unwrap();
        assert_eq!(descriptor.module_name, "stuff");
        assert_eq!(
            Value::Object(descriptor.merged_setting),
            json!({"timeout": 60, "env": "prod"})
        );
    }

    #[test]
    fn test_unknown_key_is_unauthorized() {
        let resolver = resolver(fixture_store(), "us-east-1");
        let err = block_on(resolver.resolve(&ctx("doStuff", "nope", "POST"))).unwrap_err();
        assert!(matches!(err, IngressError::Unauthorized(_)));
        let err = block_on(resolver.resolve(&ctx("missing", "nope", "POST"))).unwrap_err();
        assert!(matches!(err, IngressError::Unauthorized(_)));
    }

    #[test]
    fn test_route_and_record_errors() {
        let resolver = resolver(fixture_store(), "us-east-1");
        let err = block_on(resolver.resolve(&ctx("missing", "key-abc", "POST"))).unwrap_err();
        assert!(matches!(err, IngressError::RouteNotFound(_)));
        let err = block_on(resolver.resolve(&ctx("dangling", "key-abc", "POST"))).unwrap_err();
        assert!(matches!(err, IngressError::NotFound(_)));
        let other_area = RequestContext::new("admin", "ep1", "doStuff", "key-abc");
        let err = block_on(resolver.resolve(&other_area)).unwrap_err();
        assert!(matches!(err, IngressError::NotFound(_)));
    }

    #[test]
    fn test_method_checked_on_cached_descriptor() {
        let resolver = resolver(fixture_store(), "us-east-1");
        block_on(resolver.resolve(&ctx("doStuff", "key-abc", "POST"))).unwrap();
        let err = block_on(resolver.resolve(&ctx("doStuff", "key-abc", "delete"))).unwrap_err();
        assert_eq!(
            err,
            IngressError::MethodNotAllowed {
                function: "doStuff".into(),
                method: "DELETE".into()
            }
        );
        let ws = RequestContext::new("core", "ep1", "doStuff", "key-abc");
        assert!(block_on(resolver.resolve(&ws)).is_ok());
    }

    /// Counts every lookup past the endpoint.
    struct CountingStore {
        inner: MemoryStore,
        deeper_reads: Cell<u32>,
    }

    impl RecordStore for CountingStore {
        async fn get_endpoint(&self, endpoint_id: &str) -> Result<Option<Endpoint>, StoreError> {
            self.inner.get_endpoint(endpoint_id).await
        }

        async fn get_connection(
            &self,
            endpoint_id: &str,
            api_key: &str,
        ) -> Result<Option<Connection>, StoreError> {
            self.deeper_reads.set(self.deeper_reads.get() + 1);
            self.inner.get_connection(endpoint_id, api_key).await
        }

        async fn get_function(
            &self,
            target: &str,
            function: &str,
        ) -> Result<Option<Function>, StoreError> {
            self.deeper_reads.set(self.deeper_reads.get() + 1);
            self.inner.get_function(target, function).await
        }

        async fn get_ws_connection(
            &self,
            connection_id: &str,
        ) -> Result<Option<WsConnection>, StoreError> {
            self.inner.get_ws_connection(connection_id).await
        }

        async fn put_ws_connection(&self, record: WsConnection) -> Result<(), StoreError> {
            self.inner.put_ws_connection(record).await
        }

        async fn delete_ws_connection(&self, connection_id: &str) -> Result<(), StoreError> {
            self.inner.delete_ws_connection(connection_id).await
        }
    }

    #[test]
    fn test_region_mismatch_stops_after_endpoint() {
        let store = CountingStore {
            inner: fixture_store(),
            deeper_reads: Cell::new(0),
        };
        let cache = CacheFacade::builder().tier(MemoryTier::new()).build();
        let resolver = Resolver::new(store, cache, "us-west-2", Duration::from_secs(120));
        let err = block_on(resolver.resolve(&ctx("doStuff", "key-abc", "POST"))).unwrap_err();
        assert_eq!(
            err,
            IngressError::RegionMismatch {
                endpoint: "us-east-1".into(),
                operating: "us-west-2".into()
            }
        );
        assert_eq!(resolver.store().deeper_reads.get(), 0);
    }

    #[test]
    fn test_chain_is_cached() {
        let store = CountingStore {
            inner: fixture_store(),
            deeper_reads: Cell::new(0),
        };
        let cache = CacheFacade::builder().tier(MemoryTier::new()).build();
        let resolver = Resolver::new(store, cache, "us-east-1", Duration::from_secs(120));
        block_on(resolver.resolve(&ctx("doStuff", "key-abc", "POST"))).unwrap();
        block_on(resolver.resolve(&ctx("doStuff", "key-abc", "GET"))).unwrap();
        assert_eq!(resolver.store().deeper_reads.get(), 2);
        assert_eq!(resolver.cache().clear(Some(ROUTING_CACHE), Some("ep1/doStuff/*")), 1);
        block_on(resolver.resolve(&ctx("doStuff", "key-abc", "POST"))).unwrap();
        assert_eq!(resolver.store().deeper_reads.get(), 4);
    }
}
