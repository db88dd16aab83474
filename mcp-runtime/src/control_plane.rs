use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use datum_core::kind::{ApiGroupResources, DiscoveredResource, ResolvedKind, VersionedResources};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroupList, APIResourceList, APIVersions};
use k8s_openapi::apimachinery::pkg::version::Info;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::EngineError;
use crate::util::{client, control_plane_url, resolve_token};

pub const FIELD_MANAGER: &str = "datumctl-mcp";
const APPLY_PATCH_CONTENT_TYPE: &str = "application/apply-patch+yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    pub field_manager: String,
    pub force: bool,
    pub dry_run: bool,
}

impl ApplyOptions {
    pub fn new(force: bool, dry_run: bool) -> Self {
        Self {
            field_manager: FIELD_MANAGER.to_string(),
            force,
            dry_run,
        }
    }
}

/// Server-side list filters. The continue token is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub limit: Option<u64>,
    pub continue_token: Option<String>,
}

impl ListQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(selector) = &self.label_selector {
            pairs.push(("labelSelector", selector.clone()));
        }
        if let Some(selector) = &self.field_selector {
            pairs.push(("fieldSelector", selector.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(token) = &self.continue_token {
            pairs.push(("continue", token.clone()));
        }
        pairs
    }
}

/// The API server operations the engine needs. `namespace` is only honored
/// for namespaced kinds.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn server_version(&self) -> Result<Info, EngineError>;

    async fn discover(&self) -> Result<Vec<ApiGroupResources>, EngineError>;

    async fn create(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        object: &Value,
        dry_run: bool,
    ) -> Result<Value, EngineError>;

    async fn get(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, EngineError>;

    async fn apply(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
        options: &ApplyOptions,
    ) -> Result<Value, EngineError>;

    async fn delete(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
        dry_run: bool,
    ) -> Result<(), EngineError>;

    async fn list(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Value, EngineError>;
}

/// Which control plane a session talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Organization(String),
    Project(String),
}

impl Scope {
    pub fn collection(&self) -> &'static str {
        match self {
            Scope::Organization(_) => "organizations",
            Scope::Project(_) => "projects",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Scope::Organization(id) | Scope::Project(id) => id,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Organization(id) => write!(f, "organization {id}"),
            Scope::Project(id) => write!(f, "project {id}"),
        }
    }
}

/// Builds a control plane for a scope. No network traffic happens here; the
/// caller runs the readiness check.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, scope: &Scope) -> Result<Arc<dyn ControlPlane>, EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub api_hostname: Option<String>,
    /// Fixed control-plane URL used for every scope
    pub server: Option<String>,
    pub token: Option<String>,
}

pub struct HttpConnector {
    config: ConnectionConfig,
    http: reqwest::Client,
}

impl HttpConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            http: client(),
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, scope: &Scope) -> Result<Arc<dyn ControlPlane>, EngineError> {
        let endpoint = match &self.config.server {
            Some(server) => {
                tracing::debug!(%scope, server = %server, "using fixed control-plane server");
                server.trim_end_matches('/').to_string()
            }
            None => {
                let hostname = self
                    .config
                    .api_hostname
                    .clone()
                    .or_else(|| crate::util::load_credentials().map(|c| c.api_hostname))
                    .ok_or_else(|| {
                        EngineError::Connectivity(
                            "No API hostname configured. Pass --api-hostname, set DATUM_API_HOSTNAME, or log in with datumctl."
                                .to_string(),
                        )
                    })?;
                control_plane_url(&hostname, scope)
            }
        };
        Url::parse(&endpoint).map_err(|e| {
            EngineError::Connectivity(format!("Invalid control-plane URL {endpoint}: {e}"))
        })?;
        Ok(Arc::new(HttpControlPlane {
            endpoint,
            http: self.http.clone(),
            token: self.config.token.clone(),
        }))
    }
}

enum Payload<'a> {
    Json(&'a Value),
    ApplyPatch(Vec<u8>),
}

/// `ControlPlane` over the Kubernetes REST conventions.
pub struct HttpControlPlane {
    endpoint: String,
    http: reqwest::Client,
    token: Option<String>,
}

impl HttpControlPlane {
    fn url(&self, segments: &[String], query: &[(&str, String)]) -> Result<Url, EngineError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| EngineError::Internal(format!("Invalid control-plane URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| {
                EngineError::Internal(format!("Control-plane URL cannot be a base: {}", self.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in query {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn bearer_token(&self) -> Result<String, EngineError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        resolve_token(&self.http)
            .await
            .map_err(|e| EngineError::Connectivity(e.to_string()))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        payload: Option<Payload<'_>>,
    ) -> Result<Value, EngineError> {
        tracing::debug!(method = %method, url = %url, "control-plane request");
        let token = self.bearer_token().await?;
        let mut request = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json")
            .bearer_auth(token);
        request = match payload {
            Some(Payload::Json(body)) => request.json(body),
            Some(Payload::ApplyPatch(body)) => {
                request.header(CONTENT_TYPE, APPLY_PATCH_CONTENT_TYPE).body(body)
            }
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            EngineError::Connectivity(format!("Failed to reach control plane at {}: {e}", self.endpoint))
        })?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| {
            EngineError::Connectivity(format!("Failed to read control-plane response: {e}"))
        })?;
        if !(200..=299).contains(&status) {
            return Err(EngineError::from_response(status, &bytes));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Internal(format!("Invalid JSON from control plane: {e}")))
    }

    async fn get_typed<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, EngineError> {
        let segments: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
        let url = self.url(&segments, &[])?;
        let body = self.send(Method::GET, url, None).await?;
        serde_json::from_value(body).map_err(|e| {
            EngineError::Internal(format!("Unexpected response from /{}: {e}", segments.join("/")))
        })
    }

    async fn resource_list(&self, segments: &[&str]) -> Result<Vec<DiscoveredResource>, EngineError> {
        let list: APIResourceList = self.get_typed(segments).await?;
        Ok(list
            .resources
            .into_iter()
            .map(|resource| DiscoveredResource {
                plural: resource.name,
                kind: resource.kind,
                namespaced: resource.namespaced,
                short_names: resource.short_names.unwrap_or_default(),
                verbs: resource.verbs,
            })
            .collect())
    }
}

fn dry_run_query(dry_run: bool) -> Vec<(&'static str, String)> {
    if dry_run {
        vec![("dryRun", "All".to_string())]
    } else {
        Vec::new()
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn server_version(&self) -> Result<Info, EngineError> {
        self.get_typed(&["version"]).await.map_err(|err| match err {
            EngineError::Connectivity(_) => err,
            other => EngineError::Connectivity(format!(
                "Cannot reach the control plane for the selected context: {other}"
            )),
        })
    }

    async fn discover(&self) -> Result<Vec<ApiGroupResources>, EngineError> {
        let discovery_error = |err: EngineError| match err {
            EngineError::Connectivity(_) => err,
            other => EngineError::Discovery(other.to_string()),
        };
        let mut groups = Vec::new();

        let core: APIVersions = self.get_typed(&["api"]).await.map_err(discovery_error)?;
        let mut core_versions = Vec::new();
        for version in core.versions {
            let listed = self.resource_list(&["api", version.as_str()]).await;
            match listed {
                Ok(resources) => core_versions.push(VersionedResources { version, resources }),
                Err(err) => tracing::warn!(group_version = %version, error = %err, "skipping unavailable group version"),
            }
        }
        groups.push(ApiGroupResources {
            group: String::new(),
            preferred_version: core_versions.first().map(|v| v.version.clone()),
            versions: core_versions,
        });

        let list: APIGroupList = self.get_typed(&["apis"]).await.map_err(discovery_error)?;
        for group in list.groups {
            let mut versions = Vec::new();
            for gv in &group.versions {
                let listed = self
                    .resource_list(&["apis", group.name.as_str(), gv.version.as_str()])
                    .await;
                match listed {
                    Ok(resources) => versions.push(VersionedResources {
                        version: gv.version.clone(),
                        resources,
                    }),
                    Err(err) => tracing::warn!(
                        group_version = %gv.group_version,
                        error = %err,
                        "skipping unavailable group version"
                    ),
                }
            }
            groups.push(ApiGroupResources {
                group: group.name,
                preferred_version: group.preferred_version.map(|p| p.version),
                versions,
            });
        }
        Ok(groups)
    }

    async fn create(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        object: &Value,
        dry_run: bool,
    ) -> Result<Value, EngineError> {
        let url = self.url(&kind.collection_segments(namespace), &dry_run_query(dry_run))?;
        self.send(Method::POST, url, Some(Payload::Json(object))).await
    }

    async fn get(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, EngineError> {
        let url = self.url(&kind.object_segments(namespace, name), &[])?;
        self.send(Method::GET, url, None).await
    }

    async fn apply(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
        options: &ApplyOptions,
    ) -> Result<Value, EngineError> {
        let mut query = vec![
            ("fieldManager", options.field_manager.clone()),
            ("force", options.force.to_string()),
        ];
        query.extend(dry_run_query(options.dry_run));
        let url = self.url(&kind.object_segments(namespace, name), &query)?;
        // JSON is valid YAML, so the apply body needs no re-encoding.
        let body = serde_json::to_vec(object)
            .map_err(|e| EngineError::Internal(format!("Failed to encode apply body: {e}")))?;
        self.send(Method::PATCH, url, Some(Payload::ApplyPatch(body))).await
    }

    async fn delete(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
        dry_run: bool,
    ) -> Result<(), EngineError> {
        let url = self.url(&kind.object_segments(namespace, name), &dry_run_query(dry_run))?;
        self.send(Method::DELETE, url, None).await.map(|_| ())
    }

    async fn list(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Value, EngineError> {
        let url = self.url(&kind.collection_segments(namespace), &query.pairs())?;
        self.send(Method::GET, url, None).await
    }
}
