//! Ingress dispatcher.
//!
//! Entry point for every gateway event. The event is classified, its identifiers
//! extracted into a [`RequestContext`], and the context handed through resolution,
//! authorization and invocation. Every error ends here: it is reported to the
//! notifier and turned into the response shape of the event's protocol.
use std::{collections::HashSet, convert::Infallible, sync::Arc};

use edgelake_core::{
    config::{Config, TriggerConfig},
    context::{RequestContext, ANONYMOUS_API_KEY},
    model::FunctionDescriptor,
    store::RecordStore,
    util::{Clock, SystemClock},
    AnyError, IngressError, IngressResult,
};
use http::StatusCode;
use serde_json::{Map, Value};
use service_async::{MakeService, Service};

pub mod event;
pub mod response;
mod websocket;

use self::{
    event::{EventKind, PathRouter},
    response::Effect,
};
use crate::{
    auth::{Action, AuthorizationGate, Authorizer},
    cache::CacheFacade,
    invoke::{InvocationEngine, InvokeOutcome, Invoker},
    notify::Notifier,
    resolve::Resolver,
};

pub const CACHE_CLEAR: &str = "cache_clear";
pub const CACHE_STATS: &str = "cache_stats";

pub struct Dispatcher<S, I> {
    resolver: Resolver<S>,
    gate: AuthorizationGate,
    engine: InvocationEngine<I>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    router: PathRouter,
    stream_endpoint_id: Option<String>,
    trigger: Option<TriggerConfig>,
}

impl<S, I> Dispatcher<S, I>
where
    S: RecordStore,
    I: Invoker,
{
    pub async fn dispatch(&self, event: Value) -> Value {
        match event::classify(&event) {
            Ok(EventKind::IdentityTrigger) => match self.trigger(&event).await {
                Ok(out) => out,
                Err(e) => self.fail(e, response::http_error),
            },
            Ok(EventKind::Authorizer) => self.authorizer(&event).await,
            Ok(EventKind::WebSocket) => self.websocket(event).await,
            Ok(EventKind::Http) => match self.http(event).await {
                Ok(out) => out,
                Err(e) => self.fail(e, response::http_error),
            },
            Err(e) => self.fail(e, response::http_error),
        }
    }

    fn report(&self, err: &IngressError) {
        tracing::warn!("request failed: {err}");
        self.notifier.notify(err.kind(), &err.to_string());
    }

    fn fail(&self, err: IngressError, shape: fn(&IngressError) -> Value) -> Value {
        self.report(&err);
        shape(&err)
    }

    async fn trigger(&self, event: &Value) -> IngressResult<Value> {
        let trigger = self.trigger.as_ref().ok_or_else(|| {
            IngressError::Configuration("no trigger target configured".to_string())
        })?;
        tracing::info!(
            "forwarding {} trigger to {}",
            event["triggerSource"].as_str().unwrap_or("-"),
            trigger.target
        );
        self.engine.invoke_trigger(trigger, event).await
    }

    async fn authorizer(&self, event: &Value) -> Value {
        let resource = event["methodArn"].as_str().unwrap_or("*");
        let principal = event::authorizer_api_key(event);
        let authorized = match event::is_connect_authorizer(event) {
            true => self.authorize_connect(event, &principal).await,
            false => self.authorize_event(event, &principal).await,
        };
        match authorized {
            Ok(claims) => response::policy(&principal, Effect::Allow, resource, claims.as_ref()),
            Err(e) => {
                self.report(&e);
                response::policy(&principal, Effect::Deny, resource, None)
            }
        }
    }

    async fn authorize_event(&self, event: &Value, api_key: &str) -> IngressResult<Option<Value>> {
        let (route, method) = event::authorizer_route(event, &self.router)?;
        let mut ctx = RequestContext::new(route.area, route.endpoint_id, route.function_name, api_key)
            .with_gateway_claims(event::gateway_claims(event))
            .with_event(event.clone());
        if let Some(method) = method {
            ctx = ctx.with_method(method);
        }
        let descriptor = self.resolver.resolve(&ctx).await?;
        if !descriptor.auth_required {
            return Ok(None);
        }
        let decision = self.gate.authorize(Action::Authorize, &ctx, Some(&descriptor))?;
        Ok(decision.claims)
    }

    async fn http(&self, event: Value) -> IngressResult<Value> {
        let route = event::http_route(&event, &self.router)?;
        let api_key = event::api_key(&event);
        if matches!(route.function_name.as_str(), CACHE_CLEAR | CACHE_STATS) {
            if api_key == ANONYMOUS_API_KEY {
                return Err(IngressError::Unauthorized(format!(
                    "{} requires an api key",
                    route.function_name
                )));
            }
            return Ok(match route.function_name.as_str() {
                CACHE_CLEAR => self.cache_clear(&event),
                _ => self.cache_stats(&event),
            });
        }

        let params = event::http_params(&event, &route, &api_key)?;
        let mut ctx = RequestContext::new(route.area, route.endpoint_id, route.function_name, api_key)
            .with_gateway_claims(event::gateway_claims(&event));
        if let Some(method) = event::method(&event) {
            ctx = ctx.with_method(method);
        }
        let ctx = ctx.with_params(params).with_event(event);

        let descriptor = self.resolver.resolve(&ctx).await?;
        let metadata = event::metadata(
            &descriptor.merged_setting,
            &[
                &ctx.event["headers"],
                &ctx.event["pathParameters"],
                &ctx.event["queryStringParameters"],
            ],
        );
        let ctx = with_metadata(ctx, metadata);
        let outcome = self.execute(&ctx, &descriptor).await?;
        Ok(match outcome {
            InvokeOutcome::Completed(result) => match response::passthrough(&result) {
                Some(out) => out,
                None => {
                    let (status, body) = response::function_result(result, is_graphql(&descriptor));
                    response::http(status, &body)
                }
            },
            InvokeOutcome::Accepted => {
                let (status, body) = response::accepted();
                response::http(status, &body)
            }
        })
    }

    /// Permission check then invocation, shared by HTTP requests and websocket messages.
    async fn execute(
        &self,
        ctx: &RequestContext,
        descriptor: &FunctionDescriptor,
    ) -> IngressResult<InvokeOutcome> {
        let decision = match descriptor.auth_required {
            true => Some(self.gate.authorize(Action::VerifyPermission, ctx, Some(descriptor))?),
            false => None,
        };
        let claims = decision.and_then(|d| d.claims);
        self.engine.invoke(descriptor, ctx, claims.as_ref()).await
    }

    fn cache_clear(&self, event: &Value) -> Value {
        let query = event::query(event);
        let cache_name = query.get("cache_name").and_then(Value::as_str);
        let pattern = query.get("cache_key").and_then(Value::as_str);
        let cache = self.resolver.cache();
        let removed = cache.clear(cache_name, pattern);
        let mut body = cache.stats(cache_name).to_json();
        body.insert("removed".into(), removed.into());
        self.cache_response(body)
    }

    fn cache_stats(&self, event: &Value) -> Value {
        let query = event::query(event);
        let cache_name = query.get("cache_name").and_then(Value::as_str);
        let body = self.resolver.cache().stats(cache_name).to_json();
        self.cache_response(body)
    }

    fn cache_response(&self, mut body: Map<String, Value>) -> Value {
        let reachable = body
            .iter()
            .any(|(k, v)| k.ends_with("_available") && v.as_bool() == Some(true));
        body.insert("success".into(), reachable.into());
        let status = match reachable {
            true => StatusCode::OK,
            false => StatusCode::SERVICE_UNAVAILABLE,
        };
        response::http(status, &Value::Object(body))
    }
}

fn is_graphql(descriptor: &FunctionDescriptor) -> bool {
    descriptor.graphql || descriptor.function.contains("graphql")
}

fn with_metadata(ctx: RequestContext, metadata: Map<String, Value>) -> RequestContext {
    if metadata.is_empty() {
        return ctx;
    }
    let mut params = ctx.params.clone();
    params.insert("metadata".into(), Value::Object(metadata));
    ctx.with_params(params)
}

impl<S, I> Service<Value> for Dispatcher<S, I>
where
    S: RecordStore,
    I: Invoker,
{
    type Response = Value;
    type Error = Infallible;

    async fn call(&self, event: Value) -> Result<Self::Response, Self::Error> {
        Ok(self.dispatch(event).await)
    }
}

/// Builds a [`Dispatcher`] per worker from shared collaborators.
#[derive(Clone)]
pub struct DispatcherFactory<S, I> {
    store: S,
    invoker: I,
    cache: CacheFacade,
    authorizer: Arc<dyn Authorizer>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    region: String,
    routing_ttl: std::time::Duration,
    full_event_areas: HashSet<String>,
    stream_endpoint_id: Option<String>,
    trigger: Option<TriggerConfig>,
}

impl<S, I> DispatcherFactory<S, I> {
    pub fn new(
        config: &Config,
        store: S,
        invoker: I,
        cache: CacheFacade,
        authorizer: Arc<dyn Authorizer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            invoker,
            cache,
            authorizer,
            notifier,
            clock: Arc::new(SystemClock),
            region: config.region.clone(),
            routing_ttl: config.cache.routing_ttl(),
            full_event_areas: config.full_event_areas.clone(),
            stream_endpoint_id: config.stream_endpoint_id.clone(),
            trigger: config.trigger.clone(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

impl<S: Clone, I: Clone + Invoker> MakeService for DispatcherFactory<S, I> {
    type Service = Dispatcher<S, I>;
    type Error = AnyError;

    fn make_via_ref(&self, _old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(Dispatcher {
            resolver: Resolver::new(
                self.store.clone(),
                self.cache.clone(),
                self.region.clone(),
                self.routing_ttl,
            ),
            gate: AuthorizationGate::new(self.authorizer.clone(), self.notifier.clone()),
            engine: InvocationEngine::new(self.invoker.clone(), self.full_event_areas.clone()),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
            router: PathRouter::new()?,
            stream_endpoint_id: self.stream_endpoint_id.clone(),
            trigger: self.trigger.clone(),
        })
    }
}
