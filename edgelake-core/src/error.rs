use http::StatusCode;
use thiserror::Error;

pub type AnyError = anyhow::Error;
pub type AnyResult<T> = anyhow::Result<T>;

pub type IngressResult<T> = std::result::Result<T, IngressError>;

/// Errors surfaced by the ingress pipeline.
///
/// Every variant is terminal for the request it belongs to. The dispatcher turns them
/// into protocol responses with [`IngressError::status_code`] and
/// [`IngressError::kind`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngressError {
    #[error("route not found: {0}")]
    RouteNotFound(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("endpoint region ({endpoint}) does not match the operating region ({operating})")]
    RegionMismatch { endpoint: String, operating: String },
    #[error("the function ({function}) doesn't support the method ({method})")]
    MethodNotAllowed { function: String, method: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    // Callee message is carried verbatim.
    #[error("{0}")]
    FunctionExecution(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    /// A backing record store or compute target could not be reached.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl IngressError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngressError::RouteNotFound(_) => "RouteNotFound",
            IngressError::NotFound(_) => "NotFound",
            IngressError::Unauthorized(_) => "Unauthorized",
            IngressError::RegionMismatch { .. } => "RegionMismatch",
            IngressError::MethodNotAllowed { .. } => "MethodNotAllowed",
            IngressError::Configuration(_) => "ConfigurationError",
            IngressError::FunctionExecution(_) => "FunctionExecutionError",
            IngressError::MalformedRequest(_) => "MalformedRequest",
            IngressError::Unavailable(_) => "ServiceUnavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IngressError::RouteNotFound(_) | IngressError::NotFound(_) => StatusCode::NOT_FOUND,
            IngressError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            IngressError::RegionMismatch { .. } => StatusCode::MISDIRECTED_REQUEST,
            IngressError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            IngressError::Configuration(_) | IngressError::FunctionExecution(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            IngressError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            IngressError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            IngressError::Unauthorized("bad key".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            IngressError::MethodNotAllowed {
                function: "doStuff".into(),
                method: "DELETE".into()
            }
            .status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            IngressError::RegionMismatch {
                endpoint: "us-east-1".into(),
                operating: "us-west-2".into()
            }
            .kind(),
            "RegionMismatch"
        );
    }

    #[test]
    fn test_function_error_keeps_callee_message() {
        let err = IngressError::FunctionExecution("division by zero".into());
        assert_eq!(err.to_string(), "division by zero");
        assert_eq!(err.kind(), "FunctionExecutionError");
    }
}
