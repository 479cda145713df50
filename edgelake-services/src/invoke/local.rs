use std::{collections::HashMap, sync::Arc};

use edgelake_core::model::InvocationType;
use serde_json::{json, Value};

use super::{report_async_failure, Envelope, InvokeError, InvokeOutcome, Invoker};
use crate::notify::Notifier;

/// In-process compute target.
pub trait Handler: Send + Sync {
    fn handle(&self, envelope: &Envelope) -> Result<Value, String>;
}

pub struct FnHandler<F>(pub F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Envelope) -> Result<Value, String> + Send + Sync,
{
    fn handle(&self, envelope: &Envelope) -> Result<Value, String> {
        (self.0)(envelope)
    }
}

/// Answers with the function symbol and the decoded setting and parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Handler for Echo {
    fn handle(&self, envelope: &Envelope) -> Result<Value, String> {
        let decode = |s: &str| serde_json::from_str::<Value>(s).map_err(|e| e.to_string());
        Ok(json!({
            "module_name": envelope.module_name,
            "class_name": envelope.class_name,
            "funct": envelope.funct,
            "setting": decode(&envelope.setting)?,
            "params": decode(&envelope.params)?,
        }))
    }
}

/// Dispatches envelopes to handlers registered per compute target.
///
/// Async calls are spawned on the current monoio runtime.
#[derive(Clone)]
pub struct LocalInvoker {
    handlers: HashMap<String, Arc<dyn Handler>>,
    fallback: Option<Arc<dyn Handler>>,
    notifier: Arc<dyn Notifier>,
}

impl LocalInvoker {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: None,
            notifier,
        }
    }

    pub fn register(mut self, target: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.handlers.insert(target.into(), Arc::new(handler));
        self
    }

    /// Handler for targets nothing was registered for.
    pub fn fallback(mut self, handler: impl Handler + 'static) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }
}

impl Invoker for LocalInvoker {
    async fn invoke(
        &self,
        target: &str,
        envelope: Envelope,
        mode: InvocationType,
    ) -> Result<InvokeOutcome, InvokeError> {
        let handler = self
            .handlers
            .get(target)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| InvokeError::UnknownTarget(target.to_string()))?;
        match mode {
            InvocationType::Sync => handler
                .handle(&envelope)
                .map(InvokeOutcome::Completed)
                .map_err(InvokeError::Execution),
            InvocationType::Async => {
                let notifier = self.notifier.clone();
                let target = target.to_string();
                monoio::spawn(async move {
                    if let Err(e) = handler.handle(&envelope) {
                        report_async_failure(notifier.as_ref(), &target, &envelope, &e);
                    }
                });
                Ok(InvokeOutcome::Accepted)
            }
        }
    }
}
