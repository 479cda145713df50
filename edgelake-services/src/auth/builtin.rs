use std::collections::HashSet;

use edgelake_core::AnyError;
use serde::Deserialize;
use serde_json::Value;

use super::{Action, AuthContext, Authorizer, Decision, Identity};

/// Grants everything and passes gateway claims through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn decide(
        &self,
        _action: Action,
        identity: &Identity<'_>,
        _context: &AuthContext<'_>,
    ) -> Result<Decision, AnyError> {
        Ok(Decision::allow(identity.claims.cloned()))
    }
}

/// Grants callers presenting one of a fixed set of api keys.
#[derive(Debug, Clone)]
pub struct StaticKeys {
    keys: HashSet<String>,
}

#[derive(Deserialize)]
struct StaticKeysOptions {
    keys: HashSet<String>,
}

impl StaticKeys {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn from_options(options: &Value) -> Result<Self, AnyError> {
        let options: StaticKeysOptions = serde_json::from_value(options.clone())?;
        Ok(Self { keys: options.keys })
    }
}

impl Authorizer for StaticKeys {
    fn decide(
        &self,
        _action: Action,
        identity: &Identity<'_>,
        _context: &AuthContext<'_>,
    ) -> Result<Decision, AnyError> {
        if self.keys.contains(identity.api_key) {
            Ok(Decision::allow(identity.claims.cloned()))
        } else {
            Ok(Decision::deny("api key not allowed"))
        }
    }
}

/// Decides on the claims the gateway attached to the request.
///
/// `authorize` requires claims to be present. `verify_permission` additionally
/// requires the permission claim to list the function, either as
/// `module.class.function`, as the bare function name, or as `*`.
#[derive(Debug, Clone)]
pub struct ClaimsAuthorizer {
    permission_claim: String,
}

#[derive(Deserialize)]
struct ClaimsOptions {
    #[serde(default = "default_permission_claim")]
    permission_claim: String,
}

fn default_permission_claim() -> String {
    "permissions".to_string()
}

impl ClaimsAuthorizer {
    pub fn from_options(options: &Value) -> Result<Self, AnyError> {
        let options: ClaimsOptions = match options {
            Value::Null => ClaimsOptions {
                permission_claim: default_permission_claim(),
            },
            other => serde_json::from_value(other.clone())?,
        };
        Ok(Self {
            permission_claim: options.permission_claim,
        })
    }

    fn holds_permission(&self, claims: &Value, context: &AuthContext<'_>) -> bool {
        let qualified = context
            .function
            .map(|f| format!("{}.{}.{}", f.module_name, f.class_name, f.function));
        let granted = |p: &str| {
            p == "*" || qualified.as_deref() == Some(p) || p == context.request.function_name
        };
        match claims.get(&self.permission_claim) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).any(granted),
            // gateways flatten claim lists into comma separated strings
            Some(Value::String(list)) => list.split(',').map(str::trim).any(granted),
            _ => false,
        }
    }
}

impl Authorizer for ClaimsAuthorizer {
    fn decide(
        &self,
        action: Action,
        identity: &Identity<'_>,
        context: &AuthContext<'_>,
    ) -> Result<Decision, AnyError> {
        let Some(claims) = identity.claims else {
            return Ok(Decision::deny("missing claims"));
        };
        match action {
            Action::Authorize => Ok(Decision::allow(Some(claims.clone()))),
            Action::VerifyPermission if self.holds_permission(claims, context) => {
                Ok(Decision::allow(Some(claims.clone())))
            }
            Action::VerifyPermission => Ok(Decision::deny(format!(
                "permission {} not granted",
                context.request.function_name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use edgelake_core::context::RequestContext;
    use serde_json::json;

    use super::*;
    use crate::auth::tests::descriptor;

    fn decide(
        authorizer: &dyn Authorizer,
        action: Action,
        request: &RequestContext,
    ) -> Decision {
        let function = descriptor();
        let context = AuthContext {
            request,
            function: Some(&function),
        };
        authorizer
            .decide(action, &Identity::from(request), &context)
            .unwrap()
    }

    #[test]
    fn test_static_keys() {
        let authorizer = StaticKeys::new(["key-abc".to_string()]);
        let ok = RequestContext::new("core", "ep1", "doStuff", "key-abc");
        let bad = RequestContext::new("core", "ep1", "doStuff", "key-xyz");
        assert!(decide(&authorizer, Action::Authorize, &ok).granted);
        assert!(!decide(&authorizer, Action::Authorize, &bad).granted);
        assert!(StaticKeys::from_options(&json!({"nokeys": 1})).is_err());
    }

    #[test]
    fn test_claims_permission() {
        let authorizer = ClaimsAuthorizer::from_options(&Value::Null).unwrap();
        let anonymous = RequestContext::new("core", "ep1", "doStuff", "");
        assert!(!decide(&authorizer, Action::Authorize, &anonymous).granted);

        let allowed = RequestContext::new("core", "ep1", "doStuff", "k")
            .with_gateway_claims(Some(json!({"sub": "u1", "permissions": ["stuff.Stuff.doStuff"]})));
        let decision = decide(&authorizer, Action::VerifyPermission, &allowed);
        assert!(decision.granted);
        assert_eq!(decision.claims.unwrap()["sub"], "u1");

        let flattened = RequestContext::new("core", "ep1", "doStuff", "k")
            .with_gateway_claims(Some(json!({"permissions": "other, doStuff"})));
        assert!(decide(&authorizer, Action::VerifyPermission, &flattened).granted);

        let denied = RequestContext::new("core", "ep1", "doStuff", "k")
            .with_gateway_claims(Some(json!({"permissions": ["other"]})));
        assert!(decide(&authorizer, Action::Authorize, &denied).granted);
        assert!(!decide(&authorizer, Action::VerifyPermission, &denied).granted);
    }

    #[test]
    fn test_claims_permission_without_function() {
        let authorizer = ClaimsAuthorizer::from_options(&Value::Null).unwrap();
        let request = RequestContext::new("core", "ep1", "$connect", "k")
            .with_gateway_claims(Some(json!({"permissions": ["stuff.Stuff.doStuff"]})));
        let context = AuthContext {
            request: &request,
            function: None,
        };
        let identity = Identity::from(&request);
        let decision = authorizer
            .decide(Action::VerifyPermission, &identity, &context)
            .unwrap();
        assert!(!decision.granted);
        let decision = authorizer
            .decide(Action::Authorize, &identity, &context)
            .unwrap();
        assert!(decision.granted);
    }
}
