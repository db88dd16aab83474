use std::fmt;

use serde::Serialize;
use thiserror::Error;

const SUGGESTION_THRESHOLD: f64 = 0.85;
const MAX_SUGGESTIONS: usize = 3;

/// An (API group, version) pair. The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid apiVersion {0:?}: expected \"group/version\" or \"version\"")]
pub struct InvalidApiVersion(pub String);

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// Parses `group/version`, or a bare `version` for the core group.
    pub fn parse(api_version: &str) -> Result<Self, InvalidApiVersion> {
        let invalid = || InvalidApiVersion(api_version.to_string());
        match api_version.split_once('/') {
            None if !api_version.is_empty() => Ok(Self::new("", api_version)),
            None => Err(invalid()),
            Some((group, version)) => {
                if group.is_empty() || version.is_empty() || version.contains('/') {
                    return Err(invalid());
                }
                Ok(Self::new(group, version))
            }
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn matches(&self, api_version: &str) -> bool {
        self.api_version() == api_version
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

/// One resource entry from a group-version discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredResource {
    /// Plural resource name; subresources look like `deployments/scale`.
    pub plural: String,
    pub kind: String,
    pub namespaced: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub short_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,
}

impl DiscoveredResource {
    pub fn is_subresource(&self) -> bool {
        self.plural.contains('/')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionedResources {
    pub version: String,
    pub resources: Vec<DiscoveredResource>,
}

/// Everything the API server serves for one group, preferred version first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroupResources {
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_version: Option<String>,
    pub versions: Vec<VersionedResources>,
}

impl ApiGroupResources {
    /// Iterates `(group/version, resource)` pairs, subresources included.
    pub fn resources(&self) -> impl Iterator<Item = (GroupVersion, &DiscoveredResource)> + '_ {
        self.versions.iter().flat_map(move |versioned| {
            versioned
                .resources
                .iter()
                .map(move |resource| (GroupVersion::new(&self.group, &versioned.version), resource))
        })
    }
}

/// A concrete, versioned resource endpoint for a Kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedKind {
    pub group: String,
    pub version: String,
    pub plural: String,
    pub kind: String,
    pub namespaced: bool,
}

impl ResolvedKind {
    fn from_discovery(gv: &GroupVersion, resource: &DiscoveredResource) -> Self {
        Self {
            group: gv.group.clone(),
            version: gv.version.clone(),
            plural: resource.plural.clone(),
            kind: resource.kind.clone(),
            namespaced: resource.namespaced,
        }
    }

    /// The cluster-scoped CRD endpoint; served by every conformant API server.
    pub fn custom_resource_definitions() -> Self {
        Self {
            group: "apiextensions.k8s.io".to_string(),
            version: "v1".to_string(),
            plural: "customresourcedefinitions".to_string(),
            kind: "CustomResourceDefinition".to_string(),
            namespaced: false,
        }
    }

    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(&self.group, &self.version)
    }

    pub fn api_version(&self) -> String {
        self.group_version().api_version()
    }

    /// `group/version, Kind=Kind`, the conventional GVK rendering.
    pub fn gvk(&self) -> String {
        format!("{}, Kind={}", self.api_version(), self.kind)
    }

    /// URL path segments of the collection endpoint. The namespace is only
    /// applied to namespaced kinds.
    pub fn collection_segments(&self, namespace: Option<&str>) -> Vec<String> {
        let mut segments = if self.group.is_empty() {
            vec!["api".to_string(), self.version.clone()]
        } else {
            vec!["apis".to_string(), self.group.clone(), self.version.clone()]
        };
        if self.namespaced {
            if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
                segments.push("namespaces".to_string());
                segments.push(ns.to_string());
            }
        }
        segments.push(self.plural.clone());
        segments
    }

    pub fn object_segments(&self, namespace: Option<&str>, name: &str) -> Vec<String> {
        let mut segments = self.collection_segments(namespace);
        segments.push(name.to_string());
        segments
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{}", render_not_found(.kind, .api_version, .available_versions, .suggestions))]
    NotFound {
        kind: String,
        api_version: Option<String>,
        /// apiVersions serving this exact kind when a non-matching hint was given
        available_versions: Vec<String>,
        suggestions: Vec<String>,
    },
    #[error(
        "kind {kind:?} is available in multiple apiVersions ({}); please specify apiVersion",
        .candidates.join(", ")
    )]
    Ambiguous { kind: String, candidates: Vec<String> },
}

fn render_not_found(
    kind: &str,
    api_version: &Option<String>,
    available_versions: &[String],
    suggestions: &[String],
) -> String {
    let mut message = match api_version {
        Some(api_version) => format!("kind {kind:?} not found in apiVersion {api_version:?}"),
        None => format!("kind {kind:?} not found"),
    };
    if !available_versions.is_empty() {
        message.push_str(&format!(
            "; available apiVersions: {}",
            available_versions.join(", ")
        ));
    }
    if !suggestions.is_empty() {
        message.push_str(&format!("; did you mean: {}?", suggestions.join(", ")));
    }
    message
}

/// Resolves a Kind (exact, case-sensitive) and optional apiVersion hint to
/// exactly one endpoint. Fails closed when the kind is served by more than one
/// group/version and no hint was given.
pub fn resolve(
    groups: &[ApiGroupResources],
    kind: &str,
    api_version: Option<&str>,
) -> Result<ResolvedKind, ResolveError> {
    let api_version = api_version.filter(|hint| !hint.is_empty());
    let mut candidates: Vec<ResolvedKind> = Vec::new();
    let mut available_versions: Vec<String> = Vec::new();

    for group in groups {
        for (gv, resource) in group.resources() {
            if resource.kind != kind || resource.is_subresource() {
                continue;
            }
            let gv_string = gv.api_version();
            if !available_versions.contains(&gv_string) {
                available_versions.push(gv_string);
            }
            if api_version.is_none_or(|hint| gv.matches(hint)) {
                candidates.push(ResolvedKind::from_discovery(&gv, resource));
            }
        }
    }

    if candidates.is_empty() {
        let suggestions = if available_versions.is_empty() {
            suggest_kinds(groups, kind)
        } else {
            Vec::new()
        };
        return Err(ResolveError::NotFound {
            kind: kind.to_string(),
            api_version: api_version.map(str::to_string),
            available_versions,
            suggestions,
        });
    }

    let mut distinct: Vec<String> = Vec::new();
    for candidate in &candidates {
        let gv = candidate.api_version();
        if !distinct.contains(&gv) {
            distinct.push(gv);
        }
    }
    if api_version.is_none() && distinct.len() > 1 {
        return Err(ResolveError::Ambiguous {
            kind: kind.to_string(),
            candidates: distinct,
        });
    }

    Ok(candidates.swap_remove(0))
}

fn suggest_kinds(groups: &[ApiGroupResources], kind: &str) -> Vec<String> {
    let wanted = kind.to_lowercase();
    let mut scored: Vec<(f64, String)> = Vec::new();
    for group in groups {
        for (_, resource) in group.resources() {
            if resource.is_subresource() || scored.iter().any(|(_, k)| *k == resource.kind) {
                continue;
            }
            let score = if resource.kind.eq_ignore_ascii_case(kind) {
                1.0
            } else {
                strsim::jaro_winkler(&resource.kind.to_lowercase(), &wanted)
            };
            if score >= SUGGESTION_THRESHOLD {
                scored.push((score, resource.kind.clone()));
            }
        }
    }
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, kind)| kind)
        .collect()
}
