use edgelake_core::{
    context::RequestContext, model::WsConnection, store::RecordStore, IngressError,
    IngressResult,
};
use http::StatusCode;
use serde_json::{Map, Value};

use super::{event, response, with_metadata, Dispatcher};
use crate::{
    auth::Action,
    invoke::{InvokeOutcome, Invoker},
};

const CONNECT: &str = "$connect";
const DISCONNECT: &str = "$disconnect";
const STREAM: &str = "stream";

impl<S, I> Dispatcher<S, I>
where
    S: RecordStore,
    I: Invoker,
{
    pub(super) async fn websocket(&self, event: Value) -> Value {
        let result = match event::ws_ids(&event) {
            Ok((connection_id, route_key)) => match route_key.as_str() {
                CONNECT => self.connect(&event, connection_id).await,
                DISCONNECT => self.disconnect(&connection_id).await,
                STREAM => self.stream(event, connection_id).await,
                other => Err(IngressError::MalformedRequest(format!(
                    "invalid websocket route {other}"
                ))),
            },
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| self.fail(e, response::ws_error))
    }

    /// Endpoint id and area a `$connect` request asks for, from its query string.
    pub(super) fn connect_target(&self, event: &Value) -> IngressResult<(String, String)> {
        let query = event::query(event);
        let field = |name: &str| {
            query
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let endpoint_id = field("endpointId")
            .or_else(|| field("endpoint_id"))
            .or_else(|| self.stream_endpoint_id.clone())
            .ok_or_else(|| IngressError::MalformedRequest("missing `endpointId`".to_string()))?;
        let area = field("area")
            .ok_or_else(|| IngressError::MalformedRequest("missing `area`".to_string()))?;
        Ok((endpoint_id, area))
    }

    /// Authorizer request guarding a websocket `$connect`. No function is resolved: the
    /// endpoint is checked and the caller authorized against it.
    pub(super) async fn authorize_connect(
        &self,
        event: &Value,
        api_key: &str,
    ) -> IngressResult<Option<Value>> {
        let (endpoint_id, area) = self.connect_target(event)?;
        let mut ctx = RequestContext::new(area, endpoint_id, CONNECT, api_key)
            .with_gateway_claims(event::gateway_claims(event))
            .with_params(event::query(event));
        if let Some(connection_id) = event::connection_id(event) {
            ctx = ctx.with_connection_id(connection_id);
        }
        let ctx = ctx.with_event(event.clone());
        self.resolver.endpoint(&ctx).await?;
        let decision = self.gate.authorize(Action::Authorize, &ctx, None)?;
        Ok(decision.claims)
    }

    /// Stores the connection record, overwriting any previous one for the same id.
    async fn connect(&self, event: &Value, connection_id: String) -> IngressResult<Value> {
        let (endpoint_id, area) = self.connect_target(event)?;
        let api_key = event::api_key(event);

        let mut url_parameters = event::query(event);
        url_parameters.insert("connection_id".into(), connection_id.clone().into());
        let record = WsConnection::open(
            connection_id,
            area,
            endpoint_id,
            api_key,
            url_parameters,
            self.clock.now_secs(),
        );
        tracing::info!(
            "websocket {} connected to {}/{}",
            record.connection_id,
            record.area,
            record.endpoint_id
        );
        self.resolver.store().put_ws_connection(record).await?;
        Ok(response::ws(
            StatusCode::OK,
            &Value::String("Connection successful".to_string()),
        ))
    }

    /// Marks the record closed. Unknown ids are acknowledged the same way.
    async fn disconnect(&self, connection_id: &str) -> IngressResult<Value> {
        let store = self.resolver.store();
        if let Some(mut record) = store.get_ws_connection(connection_id).await? {
            record.close(self.clock.now_secs());
            store.put_ws_connection(record).await?;
            tracing::info!("websocket {connection_id} disconnected");
        }
        Ok(response::ws(
            StatusCode::OK,
            &Value::String("Disconnection successful".to_string()),
        ))
    }

    async fn stream(&self, event: Value, connection_id: String) -> IngressResult<Value> {
        let record = self
            .resolver
            .store()
            .get_ws_connection(&connection_id)
            .await?
            .filter(|r| r.is_live(self.clock.now_secs()))
            .ok_or_else(|| IngressError::NotFound("websocket connection".to_string()))?;
        let endpoint_id = Some(record.endpoint_id.clone())
            .filter(|e| !e.is_empty())
            .or_else(|| self.stream_endpoint_id.clone())
            .ok_or_else(|| IngressError::MalformedRequest("missing `endpointId`".to_string()))?;
        let (funct, payload) = event::ws_message(&event)?;

        let mut params: Map<String, Value> = payload;
        params.insert("endpoint_id".into(), endpoint_id.clone().into());
        params.insert("connection_id".into(), connection_id.clone().into());
        let ctx = RequestContext::new(record.area.clone(), endpoint_id, funct, record.api_key.clone())
            .with_connection_id(connection_id)
            .with_params(params)
            .with_event(event);

        let descriptor = self.resolver.resolve(&ctx).await?;
        let url_parameters = Value::Object(record.url_parameters);
        let metadata = event::metadata(&descriptor.merged_setting, &[&url_parameters]);
        let ctx = with_metadata(ctx, metadata);
        let (status, body) = match self.execute(&ctx, &descriptor).await? {
            InvokeOutcome::Completed(result) => {
                response::function_result(result, super::is_graphql(&descriptor))
            }
            InvokeOutcome::Accepted => response::accepted(),
        };
        Ok(response::ws(status, &body))
    }
}
