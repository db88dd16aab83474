//! MCP runtime for Datum Cloud control planes.
//!
//! Resolves kinds against live discovery, performs dry-run-by-default CRUD
//! and manifest validation, and serves the operations as tools over stdio
//! JSON-RPC with an optional loopback HTTP surface.

pub mod control_plane;
pub mod crd;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod http;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod util;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use clap::{Args, Subcommand};
use datum_core::resource::DEFAULT_NAMESPACE;
use serde_json::{Value, json};

use crate::control_plane::{ConnectionConfig, Connector, HttpConnector, Scope};
use crate::error::EngineError;
use crate::protocol::McpServer;
use crate::session::{Session, SessionState};
use crate::util::to_pretty_json;

/// Which control plane to talk to and how to authenticate.
#[derive(Args, Clone, Debug, Default)]
pub struct TargetArgs {
    /// Organization whose control plane to use
    #[arg(long, env = "DATUM_ORGANIZATION")]
    pub organization: Option<String>,
    /// Project whose control plane to use
    #[arg(long, env = "DATUM_PROJECT")]
    pub project: Option<String>,
    /// Default namespace for namespaced kinds
    #[arg(long, short = 'n', env = "DATUM_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,
    /// API hostname (otherwise taken from stored credentials)
    #[arg(long, env = "DATUM_API_HOSTNAME")]
    pub api_hostname: Option<String>,
    /// Fixed control-plane URL, bypassing organization/project routing
    #[arg(long, env = "DATUM_SERVER")]
    pub server: Option<String>,
    /// Bearer token override (otherwise stored credentials)
    #[arg(long, env = "DATUM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl TargetArgs {
    pub fn scope(&self) -> Result<Scope, EngineError> {
        let nonempty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        match (nonempty(&self.project), nonempty(&self.organization)) {
            (Some(project), None) => Ok(Scope::Project(project)),
            (None, Some(org)) => Ok(Scope::Organization(org)),
            (Some(_), Some(_)) => Err(EngineError::invalid_params(
                "exactly one of --project or --organization is required, not both",
            )),
            (None, None) => Err(EngineError::invalid_params(
                "exactly one of --project or --organization is required",
            )),
        }
    }

    pub fn connector(&self) -> HttpConnector {
        HttpConnector::new(ConnectionConfig {
            api_hostname: self.api_hostname.clone(),
            server: self.server.clone(),
            token: self.token.clone(),
        })
    }

    /// Builds the initial session. No network traffic happens here.
    pub async fn session_state(&self) -> Result<Arc<SessionState>, EngineError> {
        let scope = self.scope()?;
        let connector: Arc<dyn Connector> = Arc::new(self.connector());
        let control_plane = connector.connect(&scope).await?;
        let session = Session::new(scope, self.namespace.clone(), control_plane);
        Ok(Arc::new(SessionState::new(session, connector)))
    }
}

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the MCP server over stdio
    Serve(McpServeArgs),
    /// Check readiness and discovery against the configured target
    Diagnose(McpDiagnoseArgs),
}

#[derive(Args, Clone, Debug)]
pub struct McpServeArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Also serve the tools over HTTP on 127.0.0.1:<port>
    #[arg(long, env = "DATUM_MCP_PORT")]
    pub port: Option<u16>,
}

#[derive(Args, Clone, Debug)]
pub struct McpDiagnoseArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

fn startup_error(err: &EngineError) -> i32 {
    let payload = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    eprintln!("{}", to_pretty_json(&payload));
    1
}

pub async fn run(command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve(args) => {
            let state = match args.target.session_state().await {
                Ok(state) => state,
                Err(err) => return startup_error(&err),
            };
            let session = state.snapshot().await;
            match session.ready().await {
                Ok(info) => tracing::info!(
                    scope = %session.scope(),
                    endpoint = session.control_plane().endpoint(),
                    server_version = %info.git_version,
                    "control plane ready"
                ),
                // Tool calls gate on readiness individually.
                Err(err) => tracing::warn!(
                    scope = %session.scope(),
                    error = %err,
                    "control plane not ready at startup"
                ),
            }
            drop(session);

            if let Some(port) = args.port {
                let http_state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(err) = http::serve(http_state, port).await {
                        tracing::error!(port, error = %err, "HTTP debug surface stopped");
                    }
                });
            }

            match McpServer::new(state).serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err.to_string(),
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Diagnose(args) => {
            let state = match args.target.session_state().await {
                Ok(state) => state,
                Err(err) => return startup_error(&err),
            };
            let report = diagnose(&state).await;
            println!("{}", to_pretty_json(&report));
            if report.get("status").and_then(Value::as_str) == Some("ready") {
                0
            } else {
                2
            }
        }
    }
}

/// Readiness plus a discovery pass. Never fails; problems are reported in
/// the payload.
pub async fn diagnose(state: &SessionState) -> Value {
    let session = state.snapshot().await;
    let mut report = json!({
        "endpoint": session.control_plane().endpoint(),
        "scope": session.scope().to_string(),
        "namespace": session.namespace(),
    });
    match session.ready().await {
        Ok(info) => report["serverVersion"] = json!(info.git_version),
        Err(err) => {
            report["status"] = json!("unreachable");
            report["error"] = json!(err.to_string());
            return report;
        }
    }
    match session.discovery().group_resources(session.control_plane()).await {
        Ok(groups) => {
            let resources: usize = groups
                .iter()
                .map(|group| group.resources().filter(|(_, r)| !r.is_subresource()).count())
                .sum();
            report["status"] = json!("ready");
            report["groups"] = json!(groups.len());
            report["resources"] = json!(resources);
        }
        Err(err) => {
            report["status"] = json!("discovery_failed");
            report["error"] = json!(err.to_string());
        }
    }
    report
}
