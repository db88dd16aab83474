use std::collections::BTreeMap;
use std::sync::LazyLock;

use datum_core::resource;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::control_plane::ListQuery;
use crate::crd::{self, CrdFormat};
use crate::engine::{
    CreateRequest, DeleteRequest, ListRequest, ObjectRef, ResourceEngine, UpdateRequest,
};
use crate::error::EngineError;
use crate::session::{ContextChange, Session, SessionState};
use crate::util::to_pretty_json;
use crate::validate::validate_manifest;

/// Older clients call the tools with this prefix.
const LEGACY_TOOL_PREFIX: &str = "datum_";

#[derive(Debug)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

static TOOLS: LazyLock<Vec<ToolDefinition>> = LazyLock::new(build_tool_definitions);

pub fn tool_definitions() -> &'static [ToolDefinition] {
    &TOOLS
}

pub fn tools_list_payload() -> Value {
    let tools: Vec<Value> = tool_definitions()
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn object_target_properties() -> Map<String, Value> {
    let properties = json!({
        "kind": { "type": "string", "description": "Kind, e.g. HTTPProxy (case-sensitive)" },
        "apiVersion": { "type": "string", "description": "group/version; required when the kind is served by more than one" },
        "name": { "type": "string" },
        "namespace": { "type": "string", "description": "Defaults to the session namespace for namespaced kinds" }
    });
    properties.as_object().cloned().unwrap_or_default()
}

fn string_map_schema() -> Value {
    json!({ "type": "object", "additionalProperties": { "type": "string" } })
}

fn build_tool_definitions() -> Vec<ToolDefinition> {
    let mut create = object_target_properties();
    create.insert("generateName".into(), json!({ "type": "string", "description": "Name prefix; the server appends a suffix" }));
    create.insert("spec".into(), json!({ "type": "object" }));
    create.insert("labels".into(), string_map_schema());
    create.insert("annotations".into(), string_map_schema());
    create.insert("dryRun".into(), json!({ "type": "boolean", "default": true }));

    let mut get = object_target_properties();
    get.insert("format".into(), json!({ "type": "string", "enum": ["yaml", "json"], "default": "yaml" }));

    let mut update = object_target_properties();
    update.insert("spec".into(), json!({ "type": "object", "description": "Merged recursively into the live spec" }));
    update.insert("labels".into(), string_map_schema());
    update.insert("annotations".into(), string_map_schema());
    update.insert("dryRun".into(), json!({ "type": "boolean", "default": true }));
    update.insert("force".into(), json!({ "type": "boolean", "default": false, "description": "Take ownership of fields managed by others" }));

    let mut delete = object_target_properties();
    delete.insert("dryRun".into(), json!({ "type": "boolean", "default": true }));

    let mut list = object_target_properties();
    list.remove("name");
    list.insert("labelSelector".into(), json!({ "type": "string" }));
    list.insert("fieldSelector".into(), json!({ "type": "string" }));
    list.insert("limit".into(), json!({ "type": "integer", "minimum": 1 }));
    list.insert("continue".into(), json!({ "type": "string", "description": "Token from the previous page, passed back verbatim" }));
    list.insert("format".into(), json!({ "type": "string", "enum": ["yaml", "names"], "default": "yaml" }));

    vec![
        ToolDefinition {
            name: "list_crds",
            description: "List CustomResourceDefinitions installed on the control plane.",
            input_schema: json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        },
        ToolDefinition {
            name: "get_crd",
            description: "Show one CustomResourceDefinition as YAML, JSON or a describe summary.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "CRD name, e.g. httpproxies.networking.datumapis.com" },
                    "mode": { "type": "string", "enum": ["yaml", "json", "describe"], "default": "yaml" }
                },
                "required": ["name"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "validate_yaml",
            description: "Validate a multi-document manifest with server-side dry-run creates. Stops at the first invalid document.",
            input_schema: json!({
                "type": "object",
                "properties": { "yaml": { "type": "string" } },
                "required": ["yaml"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "change_context",
            description: "Switch to another project or organization, or change the default namespace.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project": { "type": "string" },
                    "org": { "type": "string" },
                    "namespace": { "type": "string" }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "create_resource",
            description: "Create a resource of any served kind. Dry-run unless dryRun is false.",
            input_schema: json!({
                "type": "object",
                "properties": create,
                "required": ["kind"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "get_resource",
            description: "Fetch one resource.",
            input_schema: json!({
                "type": "object",
                "properties": get,
                "required": ["kind", "name"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "update_resource",
            description: "Merge spec, labels and annotations into a live resource and apply the result. Dry-run unless dryRun is false.",
            input_schema: json!({
                "type": "object",
                "properties": update,
                "required": ["kind", "name"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "delete_resource",
            description: "Delete a resource. Dry-run unless dryRun is false; deleting an absent object succeeds.",
            input_schema: json!({
                "type": "object",
                "properties": delete,
                "required": ["kind", "name"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "list_resources",
            description: "List resources of a kind, one page at a time.",
            input_schema: json!({
                "type": "object",
                "properties": list,
                "required": ["kind"],
                "additionalProperties": false
            }),
        },
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ObjectFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListFormat {
    #[default]
    Yaml,
    Names,
}

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    ListCrds,
    GetCrd { name: String, format: CrdFormat },
    ValidateYaml { yaml: String },
    ChangeContext(ContextChange),
    CreateResource(CreateRequest),
    GetResource { target: ObjectRef, format: ObjectFormat },
    UpdateResource(UpdateRequest),
    DeleteResource(DeleteRequest),
    ListResources { request: ListRequest, format: ListFormat },
}

impl ToolCall {
    /// Checks argument shape before anything touches the network.
    pub fn parse(name: &str, args: &Map<String, Value>) -> Result<Self, EngineError> {
        let tool = name.strip_prefix(LEGACY_TOOL_PREFIX).unwrap_or(name);
        Ok(match tool {
            "list_crds" => Self::ListCrds,
            "get_crd" => Self::GetCrd {
                name: required_string(args, "name")?,
                format: match arg_optional_string(args, "mode")? {
                    Some(mode) => mode.parse()?,
                    None => CrdFormat::default(),
                },
            },
            "validate_yaml" => Self::ValidateYaml {
                yaml: required_string(args, "yaml")?,
            },
            "change_context" => Self::ChangeContext(ContextChange {
                project: arg_optional_string(args, "project")?,
                organization: arg_optional_string(args, "org")?,
                namespace: arg_optional_string(args, "namespace")?,
            }),
            "create_resource" => {
                let name = arg_optional_string(args, "name")?;
                let generate_name = arg_optional_string(args, "generateName")?;
                match (&name, &generate_name) {
                    (Some(_), Some(_)) => {
                        return Err(EngineError::invalid_field(
                            "generateName",
                            "'name' and 'generateName' are mutually exclusive",
                        ));
                    }
                    (None, None) => {
                        return Err(EngineError::invalid_field(
                            "name",
                            "one of 'name' or 'generateName' is required",
                        ));
                    }
                    _ => {}
                }
                Self::CreateResource(CreateRequest {
                    kind: required_string(args, "kind")?,
                    api_version: arg_optional_string(args, "apiVersion")?,
                    name,
                    generate_name,
                    namespace: arg_optional_string(args, "namespace")?,
                    spec: arg_optional_object(args, "spec")?,
                    labels: arg_string_map(args, "labels")?,
                    annotations: arg_string_map(args, "annotations")?,
                    dry_run: arg_bool(args, "dryRun", true)?,
                })
            }
            "get_resource" => Self::GetResource {
                target: object_ref(args)?,
                format: match arg_optional_string(args, "format")?.as_deref() {
                    None | Some("yaml") => ObjectFormat::Yaml,
                    Some("json") => ObjectFormat::Json,
                    Some(other) => {
                        return Err(EngineError::invalid_field(
                            "format",
                            format!("unsupported format {other:?} (use yaml|json)"),
                        ));
                    }
                },
            },
            "update_resource" => Self::UpdateResource(UpdateRequest {
                target: object_ref(args)?,
                spec: arg_optional_object(args, "spec")?,
                labels: arg_string_map(args, "labels")?,
                annotations: arg_string_map(args, "annotations")?,
                dry_run: arg_bool(args, "dryRun", true)?,
                force: arg_bool(args, "force", false)?,
            }),
            "delete_resource" => Self::DeleteResource(DeleteRequest {
                target: object_ref(args)?,
                dry_run: arg_bool(args, "dryRun", true)?,
            }),
            "list_resources" => Self::ListResources {
                request: ListRequest {
                    kind: required_string(args, "kind")?,
                    api_version: arg_optional_string(args, "apiVersion")?,
                    namespace: arg_optional_string(args, "namespace")?,
                    query: ListQuery {
                        label_selector: arg_optional_string(args, "labelSelector")?,
                        field_selector: arg_optional_string(args, "fieldSelector")?,
                        limit: arg_optional_u64(args, "limit")?.filter(|limit| *limit > 0),
                        continue_token: arg_optional_string(args, "continue")?,
                    },
                },
                format: match arg_optional_string(args, "format")?.as_deref() {
                    None | Some("yaml") => ListFormat::Yaml,
                    Some("names") => ListFormat::Names,
                    Some(other) => {
                        return Err(EngineError::invalid_field(
                            "format",
                            format!("unsupported format {other:?} (use yaml|names)"),
                        ));
                    }
                },
            },
            _ => return Err(EngineError::UnknownTool(name.to_string())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ListCrds => "list_crds",
            Self::GetCrd { .. } => "get_crd",
            Self::ValidateYaml { .. } => "validate_yaml",
            Self::ChangeContext(_) => "change_context",
            Self::CreateResource(_) => "create_resource",
            Self::GetResource { .. } => "get_resource",
            Self::UpdateResource(_) => "update_resource",
            Self::DeleteResource(_) => "delete_resource",
            Self::ListResources { .. } => "list_resources",
        }
    }
}

fn payload<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Internal(format!("Failed to encode tool result: {e}")))
}

fn render_yaml(value: &Value) -> Result<String, EngineError> {
    serde_yaml::to_string(value)
        .map_err(|e| EngineError::Internal(format!("Failed to render YAML: {e}")))
}

/// Runs one tool against a session snapshot. `state` is only used by
/// `change_context`.
pub async fn execute(
    state: &SessionState,
    session: &Session,
    call: ToolCall,
) -> Result<Value, EngineError> {
    let engine = ResourceEngine::new(session);
    match call {
        ToolCall::ListCrds => Ok(json!({ "items": crd::list_crds(session).await? })),
        ToolCall::GetCrd { name, format } => {
            Ok(json!({ "text": crd::get_crd(session, &name, format).await? }))
        }
        ToolCall::ValidateYaml { yaml } => payload(&validate_manifest(session, &yaml).await?),
        ToolCall::ChangeContext(change) => payload(&state.change_context(change).await?),
        ToolCall::CreateResource(req) => payload(&engine.create(req).await?),
        ToolCall::GetResource { target, format } => {
            let mut object = engine.get(&target).await?;
            resource::strip_managed_fields(&mut object);
            let text = match format {
                ObjectFormat::Yaml => render_yaml(&object)?,
                ObjectFormat::Json => to_pretty_json(&object),
            };
            Ok(json!({ "text": text }))
        }
        ToolCall::UpdateResource(req) => payload(&engine.update(req).await?),
        ToolCall::DeleteResource(req) => payload(&engine.delete(req).await?),
        ToolCall::ListResources { request, format } => {
            let page = engine.list(&request).await?;
            let text = match format {
                ListFormat::Yaml => render_yaml(&page.list)?,
                ListFormat::Names => page.names(),
            };
            let mut result = json!({ "text": text });
            if let Some(token) = page.continue_token {
                result["continue"] = Value::String(token);
            }
            Ok(result)
        }
    }
}

fn object_ref(args: &Map<String, Value>) -> Result<ObjectRef, EngineError> {
    Ok(ObjectRef {
        kind: required_string(args, "kind")?,
        api_version: arg_optional_string(args, "apiVersion")?,
        name: required_string(args, "name")?,
        namespace: arg_optional_string(args, "namespace")?,
    })
}

fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool, EngineError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(v)) => Ok(*v),
        Some(_) => Err(EngineError::invalid_field(key, format!("'{key}' must be a boolean"))),
    }
}

fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, EngineError> {
    let value = args
        .get(key)
        .ok_or_else(|| EngineError::invalid_field(key, format!("Missing required field '{key}'")))?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.clone()),
        Value::String(_) => Err(EngineError::invalid_field(key, format!("'{key}' must not be empty"))),
        _ => Err(EngineError::invalid_field(key, format!("'{key}' must be a string"))),
    }
}

fn arg_optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>, EngineError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(_) => Err(EngineError::invalid_field(key, format!("'{key}' must be a string"))),
    }
}

fn arg_optional_u64(args: &Map<String, Value>, key: &str) -> Result<Option<u64>, EngineError> {
    let invalid = || EngineError::invalid_field(key, format!("'{key}' must be an unsigned integer"));
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(invalid).map(Some),
        Some(_) => Err(invalid()),
    }
}

fn arg_optional_object(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<Map<String, Value>>, EngineError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(EngineError::invalid_field(key, format!("'{key}' must be an object"))),
    }
}

fn arg_string_map(
    args: &Map<String, Value>,
    key: &str,
) -> Result<BTreeMap<String, String>, EngineError> {
    let Some(map) = arg_optional_object(args, key)? else {
        return Ok(BTreeMap::new());
    };
    map.into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k, s)),
            _ => Err(EngineError::invalid_field(
                key,
                format!("'{key}.{k}' must be a string"),
            )),
        })
        .collect()
}
