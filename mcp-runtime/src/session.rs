use std::sync::Arc;

use datum_core::kind::ResolvedKind;
use datum_core::resource::DEFAULT_NAMESPACE;
use k8s_openapi::apimachinery::pkg::version::Info;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::control_plane::{Connector, ControlPlane, Scope};
use crate::discovery::DiscoveryCache;
use crate::error::EngineError;

/// The active control plane plus the default namespace. Immutable once built;
/// a context switch installs a new one.
pub struct Session {
    scope: Scope,
    namespace: String,
    control_plane: Arc<dyn ControlPlane>,
    discovery: Arc<DiscoveryCache>,
}

impl Session {
    pub fn new(scope: Scope, namespace: impl Into<String>, control_plane: Arc<dyn ControlPlane>) -> Self {
        let namespace = namespace.into();
        Self {
            scope,
            namespace: if namespace.is_empty() {
                DEFAULT_NAMESPACE.to_string()
            } else {
                namespace
            },
            control_plane,
            discovery: Arc::new(DiscoveryCache::new()),
        }
    }

    /// Same transport and discovery cache, different default namespace.
    fn with_namespace(&self, namespace: String) -> Self {
        Self {
            scope: self.scope.clone(),
            namespace,
            control_plane: Arc::clone(&self.control_plane),
            discovery: Arc::clone(&self.discovery),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn control_plane(&self) -> &dyn ControlPlane {
        self.control_plane.as_ref()
    }

    pub fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    pub async fn resolve(
        &self,
        kind: &str,
        api_version: Option<&str>,
    ) -> Result<ResolvedKind, EngineError> {
        self.discovery
            .resolve(self.control_plane.as_ref(), kind, api_version)
            .await
    }

    /// Readiness check: the server must answer its version endpoint.
    pub async fn ready(&self) -> Result<Info, EngineError> {
        self.control_plane.server_version().await.map_err(|err| match err {
            EngineError::Connectivity(_) => err,
            other => EngineError::Connectivity(other.to_string()),
        })
    }

    /// Request namespace, else the session default. `None` for cluster-scoped
    /// kinds.
    pub fn namespace_for(&self, kind: &ResolvedKind, requested: Option<&str>) -> Option<String> {
        if !kind.namespaced {
            return None;
        }
        Some(
            requested
                .filter(|ns| !ns.is_empty())
                .unwrap_or(&self.namespace)
                .to_string(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextChange {
    pub project: Option<String>,
    pub organization: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    pub namespace: String,
}

impl ContextOutcome {
    fn for_session(session: &Session) -> Self {
        let (project, org) = match session.scope() {
            Scope::Project(id) => (Some(id.clone()), None),
            Scope::Organization(id) => (None, Some(id.clone())),
        };
        Self {
            ok: true,
            project,
            org,
            namespace: session.namespace.clone(),
        }
    }
}

/// Owner of the active session, shared by the stdio loop and the HTTP
/// surface. Handlers work on an `Arc<Session>` snapshot so a switch can never
/// be observed half applied.
pub struct SessionState {
    current: RwLock<Arc<Session>>,
    switching: Mutex<()>,
    connector: Arc<dyn Connector>,
}

impl SessionState {
    pub fn new(session: Session, connector: Arc<dyn Connector>) -> Self {
        Self {
            current: RwLock::new(Arc::new(session)),
            switching: Mutex::new(()),
            connector,
        }
    }

    pub async fn snapshot(&self) -> Arc<Session> {
        Arc::clone(&*self.current.read().await)
    }

    /// Namespace-only changes keep the transport. Anything else needs exactly
    /// one of project or organization, and the new target must pass the
    /// readiness check before it replaces the active session.
    pub async fn change_context(&self, change: ContextChange) -> Result<ContextOutcome, EngineError> {
        let _switching = self.switching.lock().await;
        let current = self.snapshot().await;

        let scope = match (change.project, change.organization) {
            (Some(_), Some(_)) => {
                return Err(EngineError::invalid_params(
                    "exactly one of project or org is required",
                ));
            }
            (None, None) => {
                let Some(namespace) = change.namespace else {
                    return Err(EngineError::invalid_params(
                        "one of project, org or namespace is required",
                    ));
                };
                let next = Arc::new(current.with_namespace(namespace));
                *self.current.write().await = Arc::clone(&next);
                tracing::info!(namespace = next.namespace(), "default namespace changed");
                return Ok(ContextOutcome::for_session(&next));
            }
            (Some(project), None) => Scope::Project(project),
            (None, Some(org)) => Scope::Organization(org),
        };

        let control_plane = self.connector.connect(&scope).await?;
        let namespace = change
            .namespace
            .unwrap_or_else(|| current.namespace().to_string());
        let next = Session::new(scope, namespace, control_plane);
        let version = next.ready().await?;

        tracing::info!(
            scope = %next.scope(),
            namespace = next.namespace(),
            server_version = %version.git_version,
            "context switched"
        );
        let outcome = ContextOutcome::for_session(&next);
        *self.current.write().await = Arc::new(next);
        Ok(outcome)
    }
}
