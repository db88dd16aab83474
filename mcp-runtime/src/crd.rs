use std::fmt::Write as _;
use std::str::FromStr;

use datum_core::kind::ResolvedKind;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde::Serialize;
use serde_json::Value;

use crate::control_plane::ListQuery;
use crate::error::EngineError;
use crate::session::Session;
use crate::util::to_pretty_json;

const PAGE_SIZE: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrdSummary {
    pub name: String,
    pub group: String,
    pub kind: String,
    /// Served versions only, sorted
    pub versions: Vec<String>,
    pub scope: String,
}

impl CrdSummary {
    fn from_definition(crd: &CustomResourceDefinition) -> Self {
        let mut versions: Vec<String> = crd
            .spec
            .versions
            .iter()
            .filter(|v| v.served)
            .map(|v| v.name.clone())
            .collect();
        versions.sort();
        Self {
            name: crd.metadata.name.clone().unwrap_or_default(),
            group: crd.spec.group.clone(),
            kind: crd.spec.names.kind.clone(),
            versions,
            scope: crd.spec.scope.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CrdFormat {
    #[default]
    Yaml,
    Json,
    Describe,
}

impl FromStr for CrdFormat {
    type Err = EngineError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "" | "yaml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "describe" => Ok(Self::Describe),
            other => Err(EngineError::invalid_field(
                "mode",
                format!("unsupported mode {other:?} (use yaml|json|describe)"),
            )),
        }
    }
}

/// List items usually arrive without `apiVersion`/`kind`, which the typed
/// decoder insists on.
fn decode(mut object: Value) -> Result<CustomResourceDefinition, EngineError> {
    let kind = ResolvedKind::custom_resource_definitions();
    if let Some(root) = object.as_object_mut() {
        root.insert("apiVersion".to_string(), Value::String(kind.api_version()));
        root.insert("kind".to_string(), Value::String(kind.kind));
    }
    serde_json::from_value(object)
        .map_err(|e| EngineError::Internal(format!("Unexpected CustomResourceDefinition shape: {e}")))
}

/// Every CRD installed on the control plane, sorted by group then kind.
pub async fn list_crds(session: &Session) -> Result<Vec<CrdSummary>, EngineError> {
    let kind = ResolvedKind::custom_resource_definitions();
    let mut query = ListQuery {
        limit: Some(PAGE_SIZE),
        ..Default::default()
    };
    let mut summaries = Vec::new();
    loop {
        let mut page = session.control_plane().list(&kind, None, &query).await?;
        let next = page
            .pointer("/metadata/continue")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        if let Some(Value::Array(items)) = page.get_mut("items").map(Value::take) {
            for item in items {
                summaries.push(CrdSummary::from_definition(&decode(item)?));
            }
        }
        match next {
            Some(token) => query.continue_token = Some(token),
            None => break,
        }
    }
    summaries.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.kind.cmp(&b.kind)));
    Ok(summaries)
}

pub async fn get_crd(session: &Session, name: &str, format: CrdFormat) -> Result<String, EngineError> {
    let object = session
        .control_plane()
        .get(&ResolvedKind::custom_resource_definitions(), None, name)
        .await?;
    match format {
        CrdFormat::Yaml => serde_yaml::to_string(&object)
            .map_err(|e| EngineError::Internal(format!("Failed to render YAML: {e}"))),
        CrdFormat::Json => Ok(to_pretty_json(&object)),
        CrdFormat::Describe => Ok(describe(&decode(object)?)),
    }
}

/// kubectl-describe style summary of a CRD and its versions.
pub fn describe(crd: &CustomResourceDefinition) -> String {
    let mut out = String::new();
    let name = crd.metadata.name.as_deref().unwrap_or_default();
    let _ = writeln!(out, "Name:        {name}");
    let _ = writeln!(out, "Group:       {}", crd.spec.group);
    let _ = writeln!(out, "Kind:        {}", crd.spec.names.kind);
    let _ = writeln!(out, "Plural:      {}", crd.spec.names.plural);
    let _ = writeln!(out, "Scope:       {}", crd.spec.scope);
    let _ = writeln!(out, "Versions:");
    for version in &crd.spec.versions {
        let _ = writeln!(
            out,
            "  - {} (served={}, storage={})",
            version.name, version.served, version.storage
        );
        let columns = version.additional_printer_columns.as_deref().unwrap_or_default();
        if columns.is_empty() {
            continue;
        }
        let _ = writeln!(out, "    AdditionalPrinterColumns:");
        for column in columns {
            let _ = writeln!(out, "      - {} ({}) {}", column.name, column.type_, column.json_path);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{FakeControlPlane, crd, state_with};

    const CRDS: &str = "apiextensions.k8s.io/v1";

    fn seeded() -> FakeControlPlane {
        let fake = FakeControlPlane::new();
        for object in [
            crd("networking.datumapis.com", "HTTPProxy", "httpproxies", &[("v1alpha", true)]),
            crd(
                "networking.datumapis.com",
                "Gateway",
                "gateways",
                &[("v1beta1", true), ("v1alpha", true), ("v0", false)],
            ),
            crd("compute.datumapis.com", "Workload", "workloads", &[("v1alpha", true)]),
        ] {
            fake.insert_object(CRDS, "customresourcedefinitions", None, object);
        }
        fake
    }

    #[tokio::test]
    async fn summaries_are_sorted_and_list_served_versions() {
        let (state, _) = state_with(seeded());
        let session = state.snapshot().await;
        let summaries = list_crds(&session).await.expect("list");
        let order: Vec<(&str, &str)> = summaries
            .iter()
            .map(|s| (s.group.as_str(), s.kind.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("compute.datumapis.com", "Workload"),
                ("networking.datumapis.com", "Gateway"),
                ("networking.datumapis.com", "HTTPProxy"),
            ]
        );
        assert_eq!(summaries[1].versions, vec!["v1alpha", "v1beta1"]);
        assert_eq!(summaries[1].name, "gateways.networking.datumapis.com");
        assert_eq!(summaries[1].scope, "Namespaced");
    }

    #[tokio::test]
    async fn describe_lists_versions_and_printer_columns() {
        let (state, _) = state_with(seeded());
        let session = state.snapshot().await;
        let text = get_crd(&session, "httpproxies.networking.datumapis.com", CrdFormat::Describe)
            .await
            .expect("describe");
        assert_eq!(
            text,
            "Name:        httpproxies.networking.datumapis.com\n\
             Group:       networking.datumapis.com\n\
             Kind:        HTTPProxy\n\
             Plural:      httpproxies\n\
             Scope:       Namespaced\n\
             Versions:\n  \
             - v1alpha (served=true, storage=true)\n    \
             AdditionalPrinterColumns:\n      \
             - Ready (string) .status.conditions[?(@.type==\"Ready\")].status\n"
        );
    }

    #[tokio::test]
    async fn json_and_yaml_render_the_object() {
        let (state, _) = state_with(seeded());
        let session = state.snapshot().await;
        let text = get_crd(&session, "workloads.compute.datumapis.com", CrdFormat::Json)
            .await
            .expect("json");
        let parsed: Value = serde_json::from_str(&text).expect("valid json");
        assert_eq!(parsed["spec"]["names"]["kind"], "Workload");

        let text = get_crd(&session, "workloads.compute.datumapis.com", CrdFormat::Yaml)
            .await
            .expect("yaml");
        assert!(text.contains("group: compute.datumapis.com"));
    }

    #[tokio::test]
    async fn missing_crd_is_not_found() {
        let (state, _) = state_with(seeded());
        let session = state.snapshot().await;
        let err = get_crd(&session, "widgets.example.com", CrdFormat::Yaml)
            .await
            .expect_err("absent");
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("".parse::<CrdFormat>().expect("default"), CrdFormat::Yaml);
        assert_eq!("describe".parse::<CrdFormat>().expect("describe"), CrdFormat::Describe);
        let err = "table".parse::<CrdFormat>().expect_err("unsupported");
        assert_eq!(err.to_string(), "unsupported mode \"table\" (use yaml|json|describe)");
        assert_eq!(err.field(), Some("mode"));
    }

    #[test]
    fn summary_serializes_flat() {
        let summary = CrdSummary {
            name: "a.b".into(),
            group: "b".into(),
            kind: "A".into(),
            versions: vec!["v1".into()],
            scope: "Cluster".into(),
        };
        assert_eq!(
            serde_json::to_value(summary).expect("serialize"),
            json!({"name": "a.b", "group": "b", "kind": "A", "versions": ["v1"], "scope": "Cluster"})
        );
    }
}
