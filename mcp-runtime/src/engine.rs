//! Create, get, update, delete and list against kinds resolved at runtime.
//!
//! Every write defaults to a server-side dry run; nothing is persisted unless
//! the request carries `dry_run: false`.

use std::collections::BTreeMap;

use datum_core::kind::ResolvedKind;
use datum_core::resource::{self, NewObject, ObjectPatch};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::control_plane::{ApplyOptions, ListQuery};
use crate::error::EngineError;
use crate::session::Session;

/// Identifies one object by kind and name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectRef {
    pub kind: String,
    pub api_version: Option<String>,
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub kind: String,
    pub api_version: Option<String>,
    pub name: Option<String>,
    pub generate_name: Option<String>,
    pub namespace: Option<String>,
    pub spec: Option<Map<String, Value>>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub target: ObjectRef,
    pub spec: Option<Map<String, Value>>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub dry_run: bool,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub target: ObjectRef,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListRequest {
    pub kind: String,
    pub api_version: Option<String>,
    pub namespace: Option<String>,
    pub query: ListQuery,
}

/// Reply for create, update and delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_absent: bool,
}

impl WriteOutcome {
    /// Dry runs only report that the server accepted the request; the
    /// would-be object is never surfaced.
    fn validated() -> Self {
        Self {
            ok: true,
            dry_run: true,
            validated: true,
            ..Default::default()
        }
    }

    fn persisted(object: &Value) -> Self {
        Self {
            ok: true,
            name: resource::name(object).map(str::to_string),
            namespace: resource::namespace(object).map(str::to_string),
            resource_version: resource::resource_version(object).map(str::to_string),
            ..Default::default()
        }
    }
}

/// One page of a list call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    /// The list document as returned by the server
    pub list: Value,
    pub continue_token: Option<String>,
}

impl ListPage {
    fn from_list(list: Value) -> Self {
        let continue_token = list
            .get("metadata")
            .and_then(|m| m.get("continue"))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        Self {
            list,
            continue_token,
        }
    }

    pub fn items(&self) -> &[Value] {
        self.list
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// `namespace/name` or `name` per line, each newline-terminated.
    pub fn names(&self) -> String {
        self.items()
            .iter()
            .filter_map(resource::display_name)
            .map(|name| name + "\n")
            .collect()
    }
}

pub struct ResourceEngine<'a> {
    session: &'a Session,
}

impl<'a> ResourceEngine<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    async fn locate(
        &self,
        kind: &str,
        api_version: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<(ResolvedKind, Option<String>), EngineError> {
        let resolved = self.session.resolve(kind, api_version).await?;
        let namespace = self.session.namespace_for(&resolved, namespace);
        Ok((resolved, namespace))
    }

    pub async fn create(&self, req: CreateRequest) -> Result<WriteOutcome, EngineError> {
        let (resolved, namespace) = self
            .locate(&req.kind, req.api_version.as_deref(), req.namespace.as_deref())
            .await?;
        let object = NewObject {
            api_version: resolved.api_version(),
            kind: resolved.kind.clone(),
            name: req.name,
            generate_name: req.generate_name,
            namespace: namespace.clone(),
            labels: req.labels,
            annotations: req.annotations,
            spec: req.spec.map(Value::Object),
        }
        .build();

        let created = self
            .session
            .control_plane()
            .create(&resolved, namespace.as_deref(), &object, req.dry_run)
            .await?;
        tracing::info!(
            kind = %resolved.gvk(),
            namespace = namespace.as_deref().unwrap_or(""),
            dry_run = req.dry_run,
            "create accepted"
        );
        if req.dry_run {
            return Ok(WriteOutcome::validated());
        }
        Ok(WriteOutcome::persisted(&created))
    }

    pub async fn get(&self, target: &ObjectRef) -> Result<Value, EngineError> {
        let (resolved, namespace) = self
            .locate(&target.kind, target.api_version.as_deref(), target.namespace.as_deref())
            .await?;
        self.session
            .control_plane()
            .get(&resolved, namespace.as_deref(), &target.name)
            .await
    }

    /// Merge-then-apply. The live object is fetched at the resolved version,
    /// the caller's changes are merged into it and the result is sent back as
    /// a field-managed apply. A missing object is an error; update never
    /// creates.
    pub async fn update(&self, req: UpdateRequest) -> Result<WriteOutcome, EngineError> {
        let target = &req.target;
        let (resolved, namespace) = self
            .locate(&target.kind, target.api_version.as_deref(), target.namespace.as_deref())
            .await?;
        let control_plane = self.session.control_plane();

        let current = control_plane
            .get(&resolved, namespace.as_deref(), &target.name)
            .await
            .map_err(|err| match err {
                EngineError::NotFound(message) => {
                    EngineError::NotFound(format!("{message}; update never creates objects"))
                }
                other => other,
            })?;

        let patch = ObjectPatch {
            spec: req.spec,
            labels: req.labels,
            annotations: req.annotations,
        };
        let mut merged = patch.merge_into(&current);
        if let Some(root) = merged.as_object_mut() {
            root.insert("apiVersion".to_string(), Value::String(resolved.api_version()));
            root.insert("kind".to_string(), Value::String(resolved.kind.clone()));
        }

        let options = ApplyOptions::new(req.force, req.dry_run);
        let applied = control_plane
            .apply(&resolved, namespace.as_deref(), &target.name, &merged, &options)
            .await?;
        tracing::info!(
            kind = %resolved.gvk(),
            name = %target.name,
            dry_run = req.dry_run,
            force = req.force,
            "apply accepted"
        );
        if req.dry_run {
            return Ok(WriteOutcome::validated());
        }
        Ok(WriteOutcome::persisted(&applied))
    }

    /// Deleting an object that is already gone succeeds with
    /// `already_absent` set.
    pub async fn delete(&self, req: DeleteRequest) -> Result<WriteOutcome, EngineError> {
        let target = &req.target;
        let (resolved, namespace) = self
            .locate(&target.kind, target.api_version.as_deref(), target.namespace.as_deref())
            .await?;

        let mut outcome = if req.dry_run {
            WriteOutcome::validated()
        } else {
            WriteOutcome {
                ok: true,
                ..Default::default()
            }
        };
        match self
            .session
            .control_plane()
            .delete(&resolved, namespace.as_deref(), &target.name, req.dry_run)
            .await
        {
            Ok(()) => {
                tracing::info!(kind = %resolved.gvk(), name = %target.name, dry_run = req.dry_run, "delete accepted");
            }
            Err(EngineError::NotFound(message)) => {
                tracing::info!(kind = %resolved.gvk(), name = %target.name, %message, "delete target already absent");
                outcome.validated = false;
                outcome.already_absent = true;
            }
            Err(other) => return Err(other),
        }
        Ok(outcome)
    }

    pub async fn list(&self, req: &ListRequest) -> Result<ListPage, EngineError> {
        let (resolved, namespace) = self
            .locate(&req.kind, req.api_version.as_deref(), req.namespace.as_deref())
            .await?;
        let list = self
            .session
            .control_plane()
            .list(&resolved, namespace.as_deref(), &req.query)
            .await?;
        Ok(ListPage::from_list(list))
    }
}
