use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::resource;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("document {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("document {index}: expected a mapping, found {found}")]
    NotAnObject { index: usize, found: &'static str },
    #[error("document {index}: missing required field(s): {}", .fields.join(", "))]
    MissingFields {
        index: usize,
        fields: Vec<&'static str>,
    },
}

impl ManifestError {
    pub fn index(&self) -> usize {
        match self {
            Self::Decode { index, .. }
            | Self::NotAnObject { index, .. }
            | Self::MissingFields { index, .. } => *index,
        }
    }
}

/// One non-blank document of a multi-document manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// 1-based position among the non-blank documents
    pub index: usize,
    pub api_version: String,
    pub kind: String,
    pub object: Value,
}

/// Splits `text` on `---` boundaries and yields each non-blank document in
/// order. Decoding is lazy, so callers that stop at the first error never
/// touch the documents after it.
pub fn documents(text: &str) -> impl Iterator<Item = Result<Document, ManifestError>> + '_ {
    let mut index = 0;
    serde_yaml::Deserializer::from_str(text).filter_map(move |de| {
        let value = match Value::deserialize(de) {
            Ok(Value::Null) => return None,
            Ok(value) => value,
            Err(source) => {
                index += 1;
                return Some(Err(ManifestError::Decode { index, source }));
            }
        };
        if value.as_object().is_some_and(|map| map.is_empty()) {
            return None;
        }
        index += 1;
        Some(check_document(index, value))
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

fn check_document(index: usize, object: Value) -> Result<Document, ManifestError> {
    if !object.is_object() {
        return Err(ManifestError::NotAnObject {
            index,
            found: type_name(&object),
        });
    }
    let api_version = resource::api_version(&object).filter(|s| !s.is_empty());
    let kind = resource::kind(&object).filter(|s| !s.is_empty());
    match (api_version, kind) {
        (Some(api_version), Some(kind)) => Ok(Document {
            index,
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            object,
        }),
        (api_version, kind) => {
            let mut fields = Vec::new();
            if api_version.is_none() {
                fields.push("apiVersion");
            }
            if kind.is_none() {
                fields.push("kind");
            }
            Err(ManifestError::MissingFields { index, fields })
        }
    }
}
