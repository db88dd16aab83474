use clap::{Args, ValueEnum};
use datum_core::resource;
use datum_mcp_runtime::TargetArgs;
use datum_mcp_runtime::control_plane::ListQuery;
use datum_mcp_runtime::engine::{ListRequest, ObjectRef, ResourceEngine};
use datum_mcp_runtime::error::EngineError;
use serde_json::Value;

use crate::util::{pretty, report_error};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
    Name,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Kind, e.g. HTTPProxy (case-sensitive)
    pub kind: String,
    /// Object name; lists the kind when omitted
    pub name: Option<String>,
    /// group/version, required when the kind is served by more than one
    #[arg(long)]
    pub api_version: Option<String>,
    /// Label selector, e.g. app=web
    #[arg(long, short = 'l')]
    pub selector: Option<String>,
    #[arg(long)]
    pub field_selector: Option<String>,
    /// Page size
    #[arg(long)]
    pub limit: Option<u64>,
    /// Continue token from a previous page
    #[arg(long = "continue")]
    pub continue_token: Option<String>,
    #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
    #[command(flatten)]
    pub target: TargetArgs,
}

fn render(value: &Value, format: OutputFormat) -> Result<String, EngineError> {
    match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| EngineError::Internal(format!("Failed to render YAML: {e}"))),
        OutputFormat::Json => Ok(pretty(value) + "\n"),
        OutputFormat::Name => Ok(resource::display_name(value).unwrap_or_default() + "\n"),
    }
}

async fn get(args: GetArgs) -> Result<String, EngineError> {
    let state = args.target.session_state().await?;
    let session = state.snapshot().await;
    let engine = ResourceEngine::new(&session);

    if let Some(name) = args.name {
        let mut object = engine
            .get(&ObjectRef {
                kind: args.kind,
                api_version: args.api_version,
                name,
                namespace: Some(args.target.namespace.clone()),
            })
            .await?;
        resource::strip_managed_fields(&mut object);
        return render(&object, args.output);
    }

    let page = engine
        .list(&ListRequest {
            kind: args.kind,
            api_version: args.api_version,
            namespace: Some(args.target.namespace.clone()),
            query: ListQuery {
                label_selector: args.selector,
                field_selector: args.field_selector,
                limit: args.limit,
                continue_token: args.continue_token,
            },
        })
        .await?;
    if let Some(token) = &page.continue_token {
        tracing::info!(continue_token = %token, "more results available; pass --continue");
    }
    match args.output {
        OutputFormat::Name => Ok(page.names()),
        format => render(&page.list, format),
    }
}

pub async fn run(args: GetArgs) -> i32 {
    match get(args).await {
        Ok(text) => {
            print!("{text}");
            0
        }
        Err(err) => report_error(&err),
    }
}
