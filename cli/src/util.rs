use std::io::Read;

use datum_mcp_runtime::error::EngineError;
use serde_json::{Value, json};

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", pretty(&err));
    std::process::exit(4);
}

pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// 1 for rejections of the request itself, 2 for server-side failures,
/// 3 when the control plane cannot be reached, 4 for usage errors.
pub fn exit_code(err: &EngineError) -> i32 {
    match err {
        EngineError::InvalidParams { .. } | EngineError::UnknownTool(_) => 4,
        EngineError::Connectivity(_) => 3,
        EngineError::NotFound(_)
        | EngineError::AmbiguousKind { .. }
        | EngineError::ValidationFailed { .. } => 1,
        EngineError::Api { code, .. } if (400..500).contains(code) => 1,
        EngineError::Api { .. } | EngineError::Discovery(_) | EngineError::Internal(_) => 2,
    }
}

/// Prints the error as JSON on stderr and returns the exit code.
pub fn report_error(err: &EngineError) -> i32 {
    let mut payload = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    if let Some(field) = err.field() {
        payload["field"] = json!(field);
    }
    if let Some(details) = err.details() {
        payload["details"] = details;
    }
    eprintln!("{}", pretty(&payload));
    exit_code(err)
}

/// Reads a whole file, or stdin for `-`.
pub fn read_input(path: &str) -> Result<String, String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("Failed to read stdin: {e}"))?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(exit_code(&EngineError::invalid_params("bad")), 4);
        assert_eq!(exit_code(&EngineError::Connectivity("down".into())), 3);
        assert_eq!(exit_code(&EngineError::NotFound("gone".into())), 1);
        assert_eq!(
            exit_code(&EngineError::Api {
                code: 409,
                reason: Some("AlreadyExists".into()),
                message: "exists".into(),
            }),
            1
        );
        assert_eq!(
            exit_code(&EngineError::Api {
                code: 503,
                reason: None,
                message: "unavailable".into(),
            }),
            2
        );
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let err = read_input("/nonexistent/manifest.yaml").expect_err("missing");
        assert!(err.contains("/nonexistent/manifest.yaml"));
    }
}
