//! Authorization gate.
//!
//! The decision logic lives in an [`Authorizer`] selected by name from an
//! [`AuthorizerRegistry`] at startup. The gate only enforces the contract: a denial or
//! a failing authorizer both end the request as `Unauthorized`.
use std::{collections::HashMap, fmt, sync::Arc};

use edgelake_core::{
    config::AuthorizerConfig, context::RequestContext, model::FunctionDescriptor, AnyError,
    IngressError, IngressResult,
};
use serde_json::Value;

mod builtin;
pub use builtin::{AllowAll, ClaimsAuthorizer, StaticKeys};

use crate::notify::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// May the caller reach the endpoint at all.
    Authorize,
    /// Does the caller hold the permission required by a specific function.
    VerifyPermission,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Authorize => f.write_str("authorize"),
            Action::VerifyPermission => f.write_str("verify_permission"),
        }
    }
}

/// Who is calling.
#[derive(Debug, Clone, Copy)]
pub struct Identity<'a> {
    pub api_key: &'a str,
    pub claims: Option<&'a Value>,
}

impl<'a> From<&'a RequestContext> for Identity<'a> {
    fn from(ctx: &'a RequestContext) -> Self {
        Identity {
            api_key: &ctx.api_key,
            claims: ctx.gateway_claims.as_ref(),
        }
    }
}

/// What is being called. Websocket `$connect` requests target an endpoint, not a function.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub request: &'a RequestContext,
    pub function: Option<&'a FunctionDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub granted: bool,
    pub reason: Option<String>,
    /// Claims granted to the caller, forwarded to the function.
    pub claims: Option<Value>,
}

impl Decision {
    pub fn allow(claims: Option<Value>) -> Self {
        Decision {
            granted: true,
            reason: None,
            claims,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Decision {
            granted: false,
            reason: Some(reason.into()),
            claims: None,
        }
    }
}

pub trait Authorizer: Send + Sync {
    fn decide(
        &self,
        action: Action,
        identity: &Identity<'_>,
        context: &AuthContext<'_>,
    ) -> Result<Decision, AnyError>;
}

type Constructor = Box<dyn Fn(&Value) -> Result<Arc<dyn Authorizer>, AnyError> + Send + Sync>;

/// Maps configured authorizer names to constructors.
pub struct AuthorizerRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for AuthorizerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl AuthorizerRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("allow_all", |_| Ok(Arc::new(AllowAll) as Arc<dyn Authorizer>));
        registry.register("static_keys", |options| {
            Ok(Arc::new(StaticKeys::from_options(options)?) as Arc<dyn Authorizer>)
        });
        registry.register("claims", |options| {
            Ok(Arc::new(ClaimsAuthorizer::from_options(options)?) as Arc<dyn Authorizer>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Authorizer>, AnyError> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn build(&self, config: &AuthorizerConfig) -> IngressResult<Arc<dyn Authorizer>> {
        let constructor = self.constructors.get(&config.name).ok_or_else(|| {
            IngressError::Configuration(format!("no authorizer registered as {}", config.name))
        })?;
        constructor(&config.options).map_err(|e| {
            IngressError::Configuration(format!("authorizer {} rejected its options: {e}", config.name))
        })
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    authorizer: Arc<dyn Authorizer>,
    notifier: Arc<dyn Notifier>,
}

impl AuthorizationGate {
    pub fn new(authorizer: Arc<dyn Authorizer>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            authorizer,
            notifier,
        }
    }

    /// Granted decisions pass through; anything else becomes `Unauthorized`.
    pub fn authorize(
        &self,
        action: Action,
        request: &RequestContext,
        function: Option<&FunctionDescriptor>,
    ) -> IngressResult<Decision> {
        let identity = Identity::from(request);
        let context = AuthContext { request, function };
        match self.authorizer.decide(action, &identity, &context) {
            Ok(decision) if decision.granted => Ok(decision),
            Ok(decision) => Err(IngressError::Unauthorized(
                decision
                    .reason
                    .unwrap_or_else(|| format!("{action} denied")),
            )),
            Err(e) => {
                tracing::error!("authorizer failed on {action} for {}: {e:?}", request.function_name);
                self.notifier
                    .notify("authorizer failure", &format!("{action}: {e:#}"));
                Err(IngressError::Unauthorized(format!("{action} failed")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use edgelake_core::model::{InvocationType, Setting};
    use serde_json::json;

    use super::*;
    use crate::testing::RecordingNotifier;

    pub(crate) fn descriptor() -> FunctionDescriptor {
        FunctionDescriptor {
            module_name: "stuff".into(),
            class_name: "Stuff".into(),
            function: "doStuff".into(),
            merged_setting: Setting::new(),
            region: "us-east-1".into(),
            target: "worker".into(),
            area: None,
            allowed_methods: Default::default(),
            invocation_type: InvocationType::Sync,
            auth_required: true,
            graphql: false,
        }
    }

    struct Failing;

    impl Authorizer for Failing {
        fn decide(&self, _: Action, _: &Identity<'_>, _: &AuthContext<'_>) -> Result<Decision, AnyError> {
            anyhow::bail!("identity provider timeout")
        }
    }

    #[test]
    fn test_unknown_authorizer_is_configuration_error() {
        let registry = AuthorizerRegistry::with_builtins();
        let config = AuthorizerConfig {
            name: "ldap".into(),
            options: Value::Null,
        };
        assert!(matches!(
            registry.build(&config),
            Err(IngressError::Configuration(_))
        ));
    }

    #[test]
    fn test_registered_authorizer_resolves() {
        let mut registry = AuthorizerRegistry::empty();
        registry.register("failing", |_| Ok(Arc::new(Failing) as Arc<dyn Authorizer>));
        let config = AuthorizerConfig {
            name: "failing".into(),
            options: Value::Null,
        };
        assert!(registry.build(&config).is_ok());
    }

    #[test]
    fn test_failing_authorizer_never_allows() {
        let notifier = RecordingNotifier::default();
        let gate = AuthorizationGate::new(Arc::new(Failing), Arc::new(notifier.clone()));
        let request = RequestContext::new("core", "ep1", "doStuff", "key-abc");
        let err = gate
            .authorize(Action::VerifyPermission, &request, Some(&descriptor()))
            .unwrap_err();
        assert_eq!(err, IngressError::Unauthorized("verify_permission failed".into()));
        assert!(notifier.messages()[0].contains("identity provider timeout"));
    }

    #[test]
    fn test_denial_is_unauthorized_with_reason() {
        let authorizer = StaticKeys::from_options(&json!({"keys": ["other"]})).unwrap();
        let gate = AuthorizationGate::new(Arc::new(authorizer), Arc::new(RecordingNotifier::default()));
        let request = RequestContext::new("core", "ep1", "doStuff", "key-abc");
        let err = gate
            .authorize(Action::Authorize, &request, Some(&descriptor()))
            .unwrap_err();
        assert!(matches!(err, IngressError::Unauthorized(reason) if reason.contains("not allowed")));
    }
}
