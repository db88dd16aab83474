//! Server-side dry-run validation of multi-document manifests.

use datum_core::manifest::{self, Document};
use datum_core::resource;
use serde::Serialize;

use crate::error::EngineError;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub message: String,
    /// 1-based index of the failing document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<usize>,
}

impl ValidationReport {
    fn failed(document: usize, message: String) -> Self {
        Self {
            valid: false,
            message,
            document: Some(document),
        }
    }
}

/// Dry-run creates every document in order and stops at the first rejection.
///
/// Rejections of a single document produce a `valid: false` report. Failures
/// that say nothing about the manifest (transport, discovery) are returned as
/// errors instead.
pub async fn validate_manifest(session: &Session, text: &str) -> Result<ValidationReport, EngineError> {
    let mut validated = 0usize;
    // Parsed up front: the YAML document iterator is not Send.
    let documents: Vec<_> = manifest::documents(text).collect();
    for document in documents {
        let document = match document {
            Ok(document) => document,
            Err(err) => {
                tracing::info!(document = err.index(), error = %err, "manifest rejected");
                return Ok(ValidationReport::failed(err.index(), err.to_string()));
            }
        };
        if let Err(err) = dry_run_document(session, &document).await {
            if !err.is_document_failure() {
                return Err(err);
            }
            let label = match resource::name(&document.object) {
                Some(name) => format!("{} {name}", document.kind),
                None => document.kind.clone(),
            };
            tracing::info!(document = document.index, kind = %document.kind, error = %err, "manifest rejected");
            return Ok(ValidationReport::failed(
                document.index,
                format!("document {} ({label}): {err}", document.index),
            ));
        }
        validated += 1;
    }

    if validated == 0 {
        return Ok(ValidationReport {
            valid: false,
            message: "no documents found".to_string(),
            document: None,
        });
    }
    Ok(ValidationReport {
        valid: true,
        message: format!("validated {validated} object(s) (server-side dry-run)"),
        document: None,
    })
}

async fn dry_run_document(session: &Session, document: &Document) -> Result<(), EngineError> {
    let kind = session
        .resolve(&document.kind, Some(&document.api_version))
        .await?;
    let namespace = session.namespace_for(&kind, resource::namespace(&document.object));
    let mut object = document.object.clone();
    if let Some(ns) = namespace.as_deref() {
        resource::set_namespace(&mut object, ns);
    }
    session
        .control_plane()
        .create(&kind, namespace.as_deref(), &object, true)
        .await
        .map(|_| ())
}
