//! Line-delimited JSON-RPC over stdio.
//!
//! One JSON object per line in each direction. Requests are handled strictly
//! in order; a line that is not UTF-8 JSON is skipped without a reply.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{EngineError, RpcError};
use crate::session::SessionState;
use crate::tools::{self, ToolCall};
use crate::util::to_pretty_json;

pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
pub const MCP_SERVER_NAME: &str = "datum-mcp";

/// Methods some peers probe for. Requests get an empty result keyed by the
/// method family instead of an error.
const IGNORED_METHODS: &[&str] = &[
    "resources/list",
    "prompts/list",
    "notifications/cancelled",
    "notifications/initialized",
];

/// Inbound message shapes, told apart by `id` and `method`.
enum ProtocolMessage {
    Request { id: Value, method: String, params: Value },
    Notification { method: String },
    /// Replies to server-initiated requests; this server never sends any
    Response,
}

impl ProtocolMessage {
    fn classify(obj: &Map<String, Value>) -> Self {
        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            return Self::Response;
        };
        let method = method.to_string();
        match obj.get("id") {
            Some(id) => Self::Request {
                id: id.clone(),
                method,
                params: obj.get("params").cloned().unwrap_or(Value::Null),
            },
            None => Self::Notification { method },
        }
    }
}

pub struct McpServer {
    state: Arc<SessionState>,
}

impl McpServer {
    pub fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }

    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }

    /// Reads until EOF. Every outbound message is written and flushed as one
    /// line.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping protocol line that is not UTF-8");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            let incoming: Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed protocol line");
                    continue;
                }
            };
            for message in self.handle_message(incoming).await {
                let mut encoded = serde_json::to_vec(&message)?;
                encoded.push(b'\n');
                writer.write_all(&encoded).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Zero or more outbound messages for one inbound message.
    pub async fn handle_message(&self, incoming: Value) -> Vec<Value> {
        let Some(obj) = incoming.as_object() else {
            tracing::debug!("skipping protocol message that is not an object");
            return Vec::new();
        };
        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            // Only requests get a reply.
            return match obj.get("id") {
                Some(id) => vec![error_response(
                    id.clone(),
                    RpcError::invalid_request("jsonrpc must be '2.0'"),
                )],
                None => {
                    tracing::debug!("skipping notification without jsonrpc '2.0'");
                    Vec::new()
                }
            };
        }

        match ProtocolMessage::classify(obj) {
            ProtocolMessage::Response => Vec::new(),
            ProtocolMessage::Notification { method } => {
                tracing::debug!(%method, "notification received");
                Vec::new()
            }
            ProtocolMessage::Request { id, method, params } => match method.as_str() {
                "initialize" => vec![
                    success_response(id, initialize_payload()),
                    notification("notifications/initialized", json!({})),
                ],
                "ping" => vec![success_response(id, json!({}))],
                "tools/list" => vec![success_response(id, tools::tools_list_payload())],
                "tools/call" => vec![match self.handle_tools_call(params).await {
                    Ok(result) => success_response(id, result),
                    Err(err) => error_response(id, err),
                }],
                m if IGNORED_METHODS.contains(&m) => {
                    let root = m.split('/').next().unwrap_or(m);
                    let mut result = Map::new();
                    result.insert(root.to_string(), json!([]));
                    vec![success_response(id, Value::Object(result))]
                }
                m => vec![error_response(id, RpcError::method_not_found(m))],
            },
        }
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params.as_object().cloned().unwrap_or_default();
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RpcError::invalid_params("Missing tool name"))?;
        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let result = call_tool(&self.state, name, &args).await?;
        Ok(json!({
            "content": [{ "type": "text", "text": to_pretty_json(&result) }]
        }))
    }
}

/// Parse, snapshot, readiness gate, execute. Shared by both front ends.
pub async fn call_tool(
    state: &SessionState,
    name: &str,
    args: &Map<String, Value>,
) -> Result<Value, EngineError> {
    let call = ToolCall::parse(name, args)?;
    let session = state.snapshot().await;
    session.ready().await?;
    let tool = call.name();
    match tools::execute(state, &session, call).await {
        Ok(result) => {
            tracing::info!(tool, "tool call completed");
            Ok(result)
        }
        Err(err) => {
            tracing::warn!(tool, error = %err, code = err.code(), "tool call failed");
            Err(err)
        }
    }
}

fn initialize_payload() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}
