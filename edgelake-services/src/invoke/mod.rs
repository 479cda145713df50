//! Invocation engine: builds the payload envelope and hands it to an [`Invoker`].
use std::{collections::HashSet, sync::Arc};

use edgelake_core::{
    config::TriggerConfig, context::RequestContext, model::{FunctionDescriptor, InvocationType},
    IngressError, IngressResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod local;
pub use local::{Echo, FnHandler, Handler, LocalInvoker};

use crate::notify::Notifier;

/// Payload delivered to a compute target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub module_name: String,
    pub class_name: String,
    pub funct: String,
    /// Merged setting, serialized as JSON text.
    pub setting: String,
    /// Request parameters, serialized as JSON text.
    pub params: String,
    pub event: Value,
}

impl Envelope {
    /// `full_event` selects the complete ingress event; otherwise the event is reduced to
    /// the request parameters. Granted claims are attached in both shapes.
    pub fn build(
        descriptor: &FunctionDescriptor,
        ctx: &RequestContext,
        full_event: bool,
        claims: Option<&Value>,
    ) -> IngressResult<Self> {
        let encode = |v: &Map<String, Value>| {
            serde_json::to_string(v).map_err(|e| IngressError::MalformedRequest(e.to_string()))
        };
        let mut event = if full_event {
            ctx.event.as_ref().clone()
        } else {
            Value::Object(ctx.params.clone())
        };
        if let (Some(claims), Value::Object(map)) = (claims, &mut event) {
            attach_claims(map, claims, full_event);
        }
        Ok(Envelope {
            module_name: descriptor.module_name.clone(),
            class_name: descriptor.class_name.clone(),
            funct: descriptor.function.clone(),
            setting: encode(&descriptor.merged_setting)?,
            params: encode(&ctx.params)?,
            event,
        })
    }
}

fn attach_claims(event: &mut Map<String, Value>, claims: &Value, full_event: bool) {
    if !full_event {
        event.insert("authorizer".to_string(), claims.clone());
        return;
    }
    let request_context = event
        .entry("requestContext")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(rc) = request_context {
        let authorizer = rc
            .entry("authorizer")
            .or_insert_with(|| Value::Object(Map::new()));
        match (authorizer, claims) {
            (Value::Object(current), Value::Object(granted)) => {
                current.extend(granted.iter().map(|(k, v)| (k.clone(), v.clone())))
            }
            (slot, _) => *slot = claims.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    /// Result of a synchronous call.
    Completed(Value),
    /// The payload was submitted and nothing more will be heard from it.
    Accepted,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The callee ran and reported a failure.
    #[error("{0}")]
    Execution(String),
    #[error("unknown compute target {0}")]
    UnknownTarget(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<InvokeError> for IngressError {
    fn from(e: InvokeError) -> Self {
        match e {
            InvokeError::Execution(msg) => IngressError::FunctionExecution(msg),
            InvokeError::UnknownTarget(target) => {
                IngressError::Configuration(format!("unknown compute target {target}"))
            }
            InvokeError::Transport(msg) => IngressError::Unavailable(msg),
        }
    }
}

/// Delivers envelopes to compute targets.
///
/// In [`InvocationType::Async`] mode the call must return [`InvokeOutcome::Accepted`]
/// without waiting for the callee, and callee failures go to the notifier only.
pub trait Invoker {
    async fn invoke(
        &self,
        target: &str,
        envelope: Envelope,
        mode: InvocationType,
    ) -> Result<InvokeOutcome, InvokeError>;
}

impl<T: Invoker> Invoker for Arc<T> {
    async fn invoke(
        &self,
        target: &str,
        envelope: Envelope,
        mode: InvocationType,
    ) -> Result<InvokeOutcome, InvokeError> {
        self.as_ref().invoke(target, envelope, mode).await
    }
}

pub struct InvocationEngine<I> {
    invoker: I,
    full_event_areas: HashSet<String>,
}

impl<I: Invoker> InvocationEngine<I> {
    pub fn new(invoker: I, full_event_areas: HashSet<String>) -> Self {
        Self {
            invoker,
            full_event_areas,
        }
    }

    pub fn receives_full_event(&self, area: &str) -> bool {
        self.full_event_areas.contains(area)
    }

    pub async fn invoke(
        &self,
        descriptor: &FunctionDescriptor,
        ctx: &RequestContext,
        claims: Option<&Value>,
    ) -> IngressResult<InvokeOutcome> {
        let envelope = Envelope::build(
            descriptor,
            ctx,
            self.receives_full_event(&ctx.area),
            claims,
        )?;
        tracing::debug!(
            "invoking {}.{}.{} on {} ({:?})",
            envelope.module_name,
            envelope.class_name,
            envelope.funct,
            descriptor.target,
            descriptor.invocation_type
        );
        Ok(self
            .invoker
            .invoke(&descriptor.target, envelope, descriptor.invocation_type)
            .await?)
    }

    /// Forward an identity-provider trigger event untouched to the trigger target.
    pub async fn invoke_trigger(&self, trigger: &TriggerConfig, event: &Value) -> IngressResult<Value> {
        let envelope = Envelope {
            module_name: trigger.module_name.clone(),
            class_name: trigger.class_name.clone(),
            funct: trigger.function.clone(),
            setting: "{}".to_string(),
            params: serde_json::to_string(event)
                .map_err(|e| IngressError::MalformedRequest(e.to_string()))?,
            event: event.clone(),
        };
        match self
            .invoker
            .invoke(&trigger.target, envelope, InvocationType::Sync)
            .await?
        {
            InvokeOutcome::Completed(value) => Ok(value),
            InvokeOutcome::Accepted => Ok(event.clone()),
        }
    }
}

/// Report a failure of a fire-and-forget call.
pub(crate) fn report_async_failure(notifier: &dyn Notifier, target: &str, envelope: &Envelope, err: &str) {
    tracing::warn!("async invocation of {}.{} on {target} failed: {err}", envelope.class_name, envelope.funct);
    notifier.notify(
        "async invocation failure",
        &format!(
            "{}.{}.{} on {target}: {err}",
            envelope.module_name, envelope.class_name, envelope.funct
        ),
    );
}
