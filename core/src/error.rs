use serde::Serialize;

/// Structured error body returned by the HTTP debug surface.
/// Carries the server-provided message verbatim so agents can react to
/// specific conditions (already-exists vs. schema-invalid).
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Server-provided or validation message, verbatim
    pub error: String,
    /// Machine-readable error code (e.g. "invalid_params", "not_found")
    pub code: String,
    /// Which argument caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Extra structured context (candidate apiVersions, per-field causes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Request ID for correlating with stderr logs
    pub request_id: String,
}

/// Error codes shared by the protocol and HTTP front ends
pub mod codes {
    pub const NOT_FOUND: &str = "not_found";
    pub const AMBIGUOUS_KIND: &str = "ambiguous_kind";
    pub const INVALID_PARAMS: &str = "invalid_params";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const CONNECTIVITY: &str = "connectivity_error";
    pub const DISCOVERY: &str = "discovery_error";
    pub const API_ERROR: &str = "api_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
}
