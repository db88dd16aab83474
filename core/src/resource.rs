//! Accessors, builders and merge helpers for untyped resource objects.
//!
//! Objects stay `serde_json::Value` trees end to end: the engine operates on
//! kinds installed at runtime, so there is no closed set of structs to decode
//! into.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

pub const DEFAULT_NAMESPACE: &str = "default";

pub fn api_version(object: &Value) -> Option<&str> {
    object.get("apiVersion").and_then(Value::as_str)
}

pub fn kind(object: &Value) -> Option<&str> {
    object.get("kind").and_then(Value::as_str)
}

pub fn metadata(object: &Value) -> Option<&Map<String, Value>> {
    object.get("metadata").and_then(Value::as_object)
}

fn metadata_str<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    metadata(object)?
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

pub fn name(object: &Value) -> Option<&str> {
    metadata_str(object, "name")
}

pub fn namespace(object: &Value) -> Option<&str> {
    metadata_str(object, "namespace")
}

pub fn resource_version(object: &Value) -> Option<&str> {
    metadata_str(object, "resourceVersion")
}

fn metadata_mut(object: &mut Value) -> Option<&mut Map<String, Value>> {
    let root = object.as_object_mut()?;
    let metadata = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    metadata.as_object_mut()
}

/// Sets `metadata.namespace`, creating `metadata` when absent. No-op on
/// non-object documents.
pub fn set_namespace(object: &mut Value, namespace: &str) {
    if let Some(metadata) = metadata_mut(object) {
        metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
    }
}

/// Removes `metadata.managedFields`; apply bodies must not carry it.
pub fn strip_managed_fields(object: &mut Value) {
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("managedFields");
    }
}

/// `namespace/name` for namespaced objects, bare `name` otherwise.
pub fn display_name(object: &Value) -> Option<String> {
    let name = name(object)?;
    Some(match namespace(object) {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    })
}

/// Fields of a new object as supplied by a create request.
#[derive(Debug, Clone, Default)]
pub struct NewObject {
    pub api_version: String,
    pub kind: String,
    pub name: Option<String>,
    pub generate_name: Option<String>,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub spec: Option<Value>,
}

impl NewObject {
    /// Builds the document. `name` wins over `generateName` when both are set.
    pub fn build(&self) -> Value {
        let mut metadata = Map::new();
        match (&self.name, &self.generate_name) {
            (Some(name), _) if !name.is_empty() => {
                metadata.insert("name".to_string(), json!(name));
            }
            (_, Some(prefix)) if !prefix.is_empty() => {
                metadata.insert("generateName".to_string(), json!(prefix));
            }
            _ => {}
        }
        if let Some(ns) = self.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            metadata.insert("namespace".to_string(), json!(ns));
        }
        if !self.labels.is_empty() {
            metadata.insert("labels".to_string(), json!(self.labels));
        }
        if !self.annotations.is_empty() {
            metadata.insert("annotations".to_string(), json!(self.annotations));
        }

        let mut object = Map::new();
        object.insert("apiVersion".to_string(), json!(self.api_version));
        object.insert("kind".to_string(), json!(self.kind));
        object.insert("metadata".to_string(), Value::Object(metadata));
        if let Some(spec) = &self.spec {
            object.insert("spec".to_string(), spec.clone());
        }
        Value::Object(object)
    }
}

/// Recursively merges `src` into `dst`. Where both sides hold a map the merge
/// descends; otherwise the `src` value replaces the `dst` one.
pub fn merge_maps(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (key, incoming) in src {
        match (dst.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            _ => {
                dst.insert(key.clone(), incoming.clone());
            }
        }
    }
}

fn merge_string_map(object: &mut Value, field: &str, entries: &BTreeMap<String, String>) {
    if entries.is_empty() {
        return;
    }
    let Some(metadata) = metadata_mut(object) else {
        return;
    };
    let target = metadata
        .entry(field)
        .or_insert_with(|| Value::Object(Map::new()));
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Some(target) = target.as_object_mut() {
        for (key, value) in entries {
            target.insert(key.clone(), Value::String(value.clone()));
        }
    }
}

/// Caller-supplied changes for an update.
#[derive(Debug, Clone, Default)]
pub struct ObjectPatch {
    pub spec: Option<Map<String, Value>>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl ObjectPatch {
    /// Produces the apply body from the live object: `spec` merged
    /// recursively, labels and annotations merged key by key, managed fields
    /// dropped. Everything else is carried over from `current`.
    pub fn merge_into(&self, current: &Value) -> Value {
        let mut merged = current.clone();
        strip_managed_fields(&mut merged);

        if let (Some(spec), Some(root)) = (&self.spec, merged.as_object_mut()) {
            match root.get_mut("spec") {
                Some(Value::Object(existing)) => merge_maps(existing, spec),
                _ => {
                    root.insert("spec".to_string(), Value::Object(spec.clone()));
                }
            }
        }
        merge_string_map(&mut merged, "labels", &self.labels);
        merge_string_map(&mut merged, "annotations", &self.annotations);
        merged
    }
}
