use std::collections::BTreeSet;

use clap::Args;
use datum_core::kind::ApiGroupResources;
use datum_mcp_runtime::TargetArgs;
use datum_mcp_runtime::error::EngineError;

use crate::util::report_error;

#[derive(Args, Debug)]
pub struct ApiResourcesArgs {
    /// Only show resources from this API group ("" for the core group)
    #[arg(long)]
    pub api_group: Option<String>,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct ApiVersionsArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

async fn discover(target: &TargetArgs) -> Result<std::sync::Arc<Vec<ApiGroupResources>>, EngineError> {
    let state = target.session_state().await?;
    let session = state.snapshot().await;
    session.discovery().group_resources(session.control_plane()).await
}

/// kubectl-style table of the preferred version of every resource.
pub fn resources_table(groups: &[ApiGroupResources], api_group: Option<&str>) -> String {
    let mut rows = vec![[
        "NAME".to_string(),
        "SHORTNAMES".to_string(),
        "APIVERSION".to_string(),
        "NAMESPACED".to_string(),
        "KIND".to_string(),
    ]];
    for group in groups {
        if api_group.is_some_and(|wanted| wanted != group.group) {
            continue;
        }
        let preferred = group
            .preferred_version
            .as_deref()
            .or_else(|| group.versions.first().map(|v| v.version.as_str()));
        for (gv, resource) in group.resources() {
            if resource.is_subresource() || Some(gv.version.as_str()) != preferred {
                continue;
            }
            rows.push([
                resource.plural.clone(),
                resource.short_names.join(","),
                gv.api_version(),
                resource.namespaced.to_string(),
                resource.kind.clone(),
            ]);
        }
    }

    let mut widths = [0usize; 5];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let mut out = String::new();
    for row in &rows {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("   ").trim_end());
        out.push('\n');
    }
    out
}

/// Every served group/version, sorted, one per line.
pub fn api_versions(groups: &[ApiGroupResources]) -> String {
    let versions: BTreeSet<String> = groups
        .iter()
        .flat_map(|group| {
            group.versions.iter().map(move |v| {
                if group.group.is_empty() {
                    v.version.clone()
                } else {
                    format!("{}/{}", group.group, v.version)
                }
            })
        })
        .collect();
    versions.into_iter().map(|v| v + "\n").collect()
}

pub async fn run_api_resources(args: ApiResourcesArgs) -> i32 {
    match discover(&args.target).await {
        Ok(groups) => {
            print!("{}", resources_table(&groups, args.api_group.as_deref()));
            0
        }
        Err(err) => report_error(&err),
    }
}

pub async fn run_api_versions(args: ApiVersionsArgs) -> i32 {
    match discover(&args.target).await {
        Ok(groups) => {
            print!("{}", api_versions(&groups));
            0
        }
        Err(err) => report_error(&err),
    }
}

#[cfg(test)]
mod tests {
    use datum_core::kind::{DiscoveredResource, VersionedResources};

    use super::*;

    fn resource(plural: &str, kind: &str, namespaced: bool) -> DiscoveredResource {
        DiscoveredResource {
            plural: plural.to_string(),
            kind: kind.to_string(),
            namespaced,
            short_names: Vec::new(),
            verbs: Vec::new(),
        }
    }

    fn groups() -> Vec<ApiGroupResources> {
        vec![
            ApiGroupResources {
                group: String::new(),
                preferred_version: Some("v1".to_string()),
                versions: vec![VersionedResources {
                    version: "v1".to_string(),
                    resources: vec![
                        resource("configmaps", "ConfigMap", true),
                        resource("pods/status", "Pod", true),
                    ],
                }],
            },
            ApiGroupResources {
                group: "networking.datumapis.com".to_string(),
                preferred_version: Some("v1alpha".to_string()),
                versions: vec![
                    VersionedResources {
                        version: "v1alpha".to_string(),
                        resources: vec![resource("gateways", "Gateway", true)],
                    },
                    VersionedResources {
                        version: "v1beta1".to_string(),
                        resources: vec![resource("gateways", "Gateway", true)],
                    },
                ],
            },
        ]
    }

    #[test]
    fn table_shows_preferred_versions_without_subresources() {
        let table = resources_table(&groups(), None);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].starts_with("configmaps"));
        assert!(lines[2].contains("networking.datumapis.com/v1alpha"));
        assert!(!table.contains("v1beta1"));
        assert!(!table.contains("pods/status"));
    }

    #[test]
    fn table_filters_by_group() {
        let table = resources_table(&groups(), Some(""));
        assert_eq!(table.lines().count(), 2);
    }

    #[test]
    fn versions_are_sorted_and_unique() {
        assert_eq!(
            api_versions(&groups()),
            "networking.datumapis.com/v1alpha\nnetworking.datumapis.com/v1beta1\nv1\n"
        );
    }
}
