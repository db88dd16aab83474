use datum_core::error::codes;
use datum_core::kind::ResolveError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// One per-field cause attached to a server-side rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldCause {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Kind or object absent
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    AmbiguousKind {
        message: String,
        candidates: Vec<String>,
    },
    #[error("{message}")]
    InvalidParams {
        message: String,
        field: Option<String>,
    },
    #[error("{}", render_causes(.message, .causes))]
    ValidationFailed {
        message: String,
        causes: Vec<FieldCause>,
    },
    /// Readiness or transport failure against the control plane
    #[error("{0}")]
    Connectivity(String),
    #[error("discovery failed: {0}")]
    Discovery(String),
    /// Any other server Status, message kept verbatim
    #[error("{message}")]
    Api {
        code: u16,
        reason: Option<String>,
        message: String,
    },
    #[error("Unknown tool {0}")]
    UnknownTool(String),
    #[error("{0}")]
    Internal(String),
}

fn render_causes(message: &str, causes: &[FieldCause]) -> String {
    if causes.is_empty() {
        return message.to_string();
    }
    let mut rendered = format!("{message}:");
    for cause in causes {
        rendered.push(' ');
        rendered.push_str(&cause.message);
    }
    rendered
}

impl EngineError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Classifies a non-2xx response from the API server.
    pub fn from_status(code: u16, status: Status) -> Self {
        let message = status
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("server returned HTTP {code}"));
        let causes: Vec<FieldCause> = status
            .details
            .and_then(|details| details.causes)
            .unwrap_or_default()
            .into_iter()
            .map(|cause| FieldCause {
                field: cause.field,
                reason: cause.reason,
                message: cause.message.unwrap_or_default(),
            })
            .collect();
        let reason = status.reason.filter(|r| !r.is_empty());

        match (code, reason.as_deref()) {
            (404, _) | (_, Some("NotFound")) => Self::NotFound(message),
            (422, _) | (_, Some("Invalid")) => Self::ValidationFailed { message, causes },
            _ if !causes.is_empty() => Self::ValidationFailed { message, causes },
            _ => Self::Api {
                code,
                reason,
                message,
            },
        }
    }

    /// Decodes an error body as a `Status`, keeping the raw text when it is
    /// not one.
    pub fn from_response(code: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<Status>(body) {
            Ok(status) => Self::from_status(code, status),
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                let message = if text.is_empty() {
                    format!("server returned HTTP {code}")
                } else {
                    text
                };
                if code == 404 {
                    return Self::NotFound(message);
                }
                Self::Api {
                    code,
                    reason: None,
                    message,
                }
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => codes::NOT_FOUND,
            Self::AmbiguousKind { .. } => codes::AMBIGUOUS_KIND,
            Self::InvalidParams { .. } => codes::INVALID_PARAMS,
            Self::ValidationFailed { .. } => codes::VALIDATION_FAILED,
            Self::Connectivity(_) => codes::CONNECTIVITY,
            Self::Discovery(_) => codes::DISCOVERY,
            Self::Api { .. } => codes::API_ERROR,
            Self::UnknownTool(_) => codes::UNKNOWN_TOOL,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidParams { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::AmbiguousKind { candidates, .. } => Some(json!({ "candidates": candidates })),
            Self::ValidationFailed { causes, .. } if !causes.is_empty() => {
                Some(json!({ "causes": causes }))
            }
            Self::Api { code, reason, .. } => Some(json!({ "status": code, "reason": reason })),
            _ => None,
        }
    }

    /// True for failures that belong to one manifest document rather than to
    /// the connection as a whole.
    pub fn is_document_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::AmbiguousKind { .. }
                | Self::InvalidParams { .. }
                | Self::ValidationFailed { .. }
                | Self::Api { .. }
        )
    }
}

impl From<ResolveError> for EngineError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Ambiguous { ref candidates, .. } => Self::AmbiguousKind {
                candidates: candidates.clone(),
                message: err.to_string(),
            },
            ResolveError::NotFound { .. } => Self::NotFound(err.to_string()),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Unknown method {method}"),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

impl From<EngineError> for RpcError {
    fn from(err: EngineError) -> Self {
        let mut rpc = match &err {
            EngineError::InvalidParams { .. } => Self::invalid_params(err.to_string()),
            EngineError::UnknownTool(_) => Self {
                code: -32601,
                message: err.to_string(),
                data: None,
            },
            _ => Self::internal(err.to_string()),
        };
        let mut data = json!({ "error": err.code() });
        if let Some(field) = err.field() {
            data["field"] = json!(field);
        }
        if let Some(details) = err.details() {
            data["details"] = details;
        }
        rpc.data = Some(data);
        rpc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_status_folds_causes_into_message() {
        let body = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "HTTPProxy.networking.datumapis.com \"web\" is invalid",
            "reason": "Invalid",
            "details": {
                "causes": [
                    {"reason": "FieldValueRequired", "message": "Required value", "field": "spec.rules"},
                    {"reason": "FieldValueInvalid", "message": "must be a hostname", "field": "spec.hostnames[0]"}
                ]
            },
            "code": 422
        });
        let err = EngineError::from_response(422, body.to_string().as_bytes());
        assert_eq!(
            err.to_string(),
            "HTTPProxy.networking.datumapis.com \"web\" is invalid: Required value must be a hostname"
        );
        assert_eq!(err.code(), codes::VALIDATION_FAILED);
        assert_eq!(
            err.details().expect("causes should be reported")["causes"][0]["field"],
            "spec.rules"
        );
    }

    #[test]
    fn not_found_status_maps_to_not_found() {
        let body = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "configmaps \"a\" not found",
            "reason": "NotFound",
            "code": 404
        });
        let err = EngineError::from_response(404, body.to_string().as_bytes());
        assert!(matches!(err, EngineError::NotFound(ref m) if m == "configmaps \"a\" not found"));
    }

    #[test]
    fn non_status_body_is_preserved_verbatim() {
        let err = EngineError::from_response(409, b"object has been modified\n");
        match err {
            EngineError::Api { code, message, .. } => {
                assert_eq!(code, 409);
                assert_eq!(message, "object has been modified");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rpc_mapping_follows_taxonomy() {
        let rpc = RpcError::from(EngineError::invalid_field("kind", "Missing required field 'kind'"));
        assert_eq!(rpc.code, -32602);
        assert_eq!(rpc.data.as_ref().expect("data")["field"], "kind");

        assert_eq!(RpcError::from(EngineError::UnknownTool("nope".into())).code, -32601);

        let rpc = RpcError::from(EngineError::Api {
            code: 409,
            reason: Some("AlreadyExists".into()),
            message: "configmaps \"a\" already exists".into(),
        });
        assert_eq!(rpc.code, -32603);
        assert_eq!(rpc.message, "configmaps \"a\" already exists");
    }
}
