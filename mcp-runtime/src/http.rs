//! Loopback-only HTTP surface exposing the same tools for manual debugging.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use datum_core::error::ApiError;
use serde::Serialize;
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;

use crate::error::EngineError;
use crate::protocol::call_tool;
use crate::session::SessionState;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

struct HttpError(EngineError);

impl From<EngineError> for HttpError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl HttpError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::InvalidParams { .. } => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) | EngineError::UnknownTool(_) => StatusCode::NOT_FOUND,
            EngineError::AmbiguousKind { .. } => StatusCode::CONFLICT,
            EngineError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Connectivity(_) => StatusCode::UNAUTHORIZED,
            EngineError::Discovery(_) => StatusCode::BAD_GATEWAY,
            EngineError::Api { code, .. } => StatusCode::from_u16(*code)
                .ok()
                .filter(StatusCode::is_client_error)
                .unwrap_or(StatusCode::BAD_GATEWAY),
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%request_id, error = %self.0, "debug request failed");
        }
        let body = ApiError {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
            field: self.0.field().map(str::to_string),
            details: self.0.details(),
            request_id,
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<SessionState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/datum/{tool}", post(invoke_tool))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// The request body is the tool's arguments object. An empty body means no
/// arguments.
async fn invoke_tool(
    State(state): State<Arc<SessionState>>,
    Path(tool): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, HttpError> {
    let args = if body.iter().all(u8::is_ascii_whitespace) {
        Map::new()
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(EngineError::invalid_params("request body must be a JSON object").into()),
            Err(err) => {
                return Err(EngineError::invalid_params(format!("invalid JSON body: {err}")).into());
            }
        }
    };
    Ok(Json(call_tool(&state, &tool, &args).await?))
}

/// Serves until the process exits. Bound to 127.0.0.1 only.
pub async fn serve(state: Arc<SessionState>, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP debug surface listening");
    axum::serve(listener, router(state)).await
}
