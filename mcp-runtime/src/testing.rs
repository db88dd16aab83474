//! In-memory control plane used by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use datum_core::kind::{ApiGroupResources, DiscoveredResource, ResolvedKind, VersionedResources};
use datum_core::resource;
use k8s_openapi::apimachinery::pkg::version::Info;
use serde_json::{Value, json};

use crate::control_plane::{ApplyOptions, Connector, ControlPlane, ListQuery, Scope};
use crate::error::{EngineError, FieldCause};
use crate::session::{Session, SessionState};

static NEXT_ENDPOINT: AtomicUsize = AtomicUsize::new(1);

type ObjectKey = (String, String, Option<String>, String);

fn discovered(plural: &str, kind: &str, namespaced: bool) -> DiscoveredResource {
    DiscoveredResource {
        plural: plural.to_string(),
        kind: kind.to_string(),
        namespaced,
        short_names: Vec::new(),
        verbs: ["create", "delete", "get", "list", "patch"]
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}

fn group(name: &str, versions: Vec<(&str, Vec<DiscoveredResource>)>) -> ApiGroupResources {
    ApiGroupResources {
        group: name.to_string(),
        preferred_version: versions.first().map(|(v, _)| v.to_string()),
        versions: versions
            .into_iter()
            .map(|(version, resources)| VersionedResources {
                version: version.to_string(),
                resources,
            })
            .collect(),
    }
}

fn default_groups() -> Vec<ApiGroupResources> {
    vec![
        group(
            "",
            vec![(
                "v1",
                vec![
                    discovered("configmaps", "ConfigMap", true),
                    discovered("namespaces", "Namespace", false),
                ],
            )],
        ),
        group(
            "apiextensions.k8s.io",
            vec![(
                "v1",
                vec![discovered("customresourcedefinitions", "CustomResourceDefinition", false)],
            )],
        ),
        group(
            "resourcemanager.miloapis.com",
            vec![("v1alpha1", vec![discovered("projects", "Project", false)])],
        ),
        group(
            "networking.datumapis.com",
            vec![
                (
                    "v1alpha",
                    vec![
                        discovered("httpproxies", "HTTPProxy", true),
                        discovered("gateways", "Gateway", true),
                    ],
                ),
                ("v1beta1", vec![discovered("gateways", "Gateway", true)]),
            ],
        ),
    ]
}

pub(crate) struct FakeControlPlane {
    endpoint: String,
    reachable: AtomicBool,
    discover_calls: AtomicUsize,
    next_version: AtomicUsize,
    groups: Mutex<Vec<ApiGroupResources>>,
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    rejections: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    applied: Mutex<Vec<(Value, ApplyOptions)>>,
}

impl FakeControlPlane {
    pub(crate) fn new() -> Self {
        Self {
            endpoint: format!(
                "fake://control-plane/{}",
                NEXT_ENDPOINT.fetch_add(1, Ordering::Relaxed)
            ),
            reachable: AtomicBool::new(true),
            discover_calls: AtomicUsize::new(0),
            next_version: AtomicUsize::new(1),
            groups: Mutex::new(default_groups()),
            objects: Mutex::new(BTreeMap::new()),
            rejections: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub(crate) fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    /// Serves a new kind from the next discovery call on.
    pub(crate) fn install_kind(
        &self,
        group_name: &str,
        version: &str,
        plural: &str,
        kind: &str,
        namespaced: bool,
    ) {
        let mut groups = self.groups.lock().expect("groups lock");
        let resource = discovered(plural, kind, namespaced);
        match groups.iter_mut().find(|g| g.group == group_name) {
            Some(existing) => match existing.versions.iter_mut().find(|v| v.version == version) {
                Some(versioned) => versioned.resources.push(resource),
                None => existing.versions.push(VersionedResources {
                    version: version.to_string(),
                    resources: vec![resource],
                }),
            },
            None => groups.push(group(group_name, vec![(version, vec![resource])])),
        }
    }

    /// Makes create and apply of `name` fail the way an admission webhook
    /// rejection does.
    pub(crate) fn reject(&self, name: &str, message: &str) {
        self.rejections
            .lock()
            .expect("rejections lock")
            .insert(name.to_string(), message.to_string());
    }

    pub(crate) fn insert_object(
        &self,
        api_version: &str,
        plural: &str,
        namespace: Option<&str>,
        object: Value,
    ) {
        let name = resource::name(&object).unwrap_or_default().to_string();
        self.objects.lock().expect("objects lock").insert(
            (
                api_version.to_string(),
                plural.to_string(),
                namespace.map(str::to_string),
                name,
            ),
            object,
        );
    }

    pub(crate) fn object_count(&self) -> usize {
        self.objects.lock().expect("objects lock").len()
    }

    /// Every write and read, e.g. `create ConfigMap a dry_run=true`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn last_applied(&self) -> Option<Value> {
        self.applied
            .lock()
            .expect("applied lock")
            .last()
            .map(|(body, _)| body.clone())
    }

    pub(crate) fn last_apply_options(&self) -> Option<ApplyOptions> {
        self.applied
            .lock()
            .expect("applied lock")
            .last()
            .map(|(_, options)| options.clone())
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn check_reachable(&self) -> Result<(), EngineError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Connectivity(format!(
                "Failed to reach control plane at {}: connection refused",
                self.endpoint
            )))
        }
    }

    fn check_rejection(&self, kind: &ResolvedKind, name: &str) -> Result<(), EngineError> {
        match self.rejections.lock().expect("rejections lock").get(name) {
            Some(message) => Err(EngineError::ValidationFailed {
                message: format!("{}.{} {name:?} is invalid", kind.kind, kind.group),
                causes: vec![FieldCause {
                    field: Some("spec".to_string()),
                    reason: Some("FieldValueInvalid".to_string()),
                    message: message.clone(),
                }],
            }),
            None => Ok(()),
        }
    }

    fn key(kind: &ResolvedKind, namespace: Option<&str>, name: &str) -> ObjectKey {
        (
            kind.api_version(),
            kind.plural.clone(),
            namespace.filter(|_| kind.namespaced).map(str::to_string),
            name.to_string(),
        )
    }

    fn not_found(kind: &ResolvedKind, name: &str) -> EngineError {
        EngineError::NotFound(format!("{} {name:?} not found", kind.plural))
    }

    fn stamp(&self, object: &mut Value) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("resourceVersion".to_string(), json!(version.to_string()));
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn server_version(&self) -> Result<Info, EngineError> {
        self.check_reachable()?;
        Ok(Info {
            git_version: "v1.32.0".to_string(),
            major: "1".to_string(),
            minor: "32".to_string(),
            ..Default::default()
        })
    }

    async fn discover(&self) -> Result<Vec<ApiGroupResources>, EngineError> {
        self.check_reachable()?;
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.groups.lock().expect("groups lock").clone())
    }

    async fn create(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        object: &Value,
        dry_run: bool,
    ) -> Result<Value, EngineError> {
        self.check_reachable()?;
        let mut object = object.clone();
        let name = match resource::name(&object) {
            Some(name) => name.to_string(),
            None => {
                let prefix = resource::metadata(&object)
                    .and_then(|m| m.get("generateName"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::ValidationFailed {
                        message: "metadata.name: Required value: name or generateName is required"
                            .to_string(),
                        causes: Vec::new(),
                    })?;
                let suffix = self.next_version.load(Ordering::SeqCst);
                let generated = format!("{prefix}{suffix:05}");
                if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
                    metadata.insert("name".to_string(), json!(generated));
                }
                generated
            }
        };
        self.record(format!("create {} {name} dry_run={dry_run}", kind.kind));
        self.check_rejection(kind, &name)?;

        let key = Self::key(kind, namespace, &name);
        let mut objects = self.objects.lock().expect("objects lock");
        if objects.contains_key(&key) {
            return Err(EngineError::Api {
                code: 409,
                reason: Some("AlreadyExists".to_string()),
                message: format!("{} {name:?} already exists", kind.plural),
            });
        }
        if let Some(ns) = key.2.as_deref() {
            resource::set_namespace(&mut object, ns);
        }
        self.stamp(&mut object);
        if !dry_run {
            objects.insert(key, object.clone());
        }
        Ok(object)
    }

    async fn get(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, EngineError> {
        self.check_reachable()?;
        self.record(format!("get {} {name}", kind.kind));
        let mut object = self
            .objects
            .lock()
            .expect("objects lock")
            .get(&Self::key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| Self::not_found(kind, name))?;
        if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert(
                "managedFields".to_string(),
                json!([{"manager": "kubectl", "operation": "Update"}]),
            );
        }
        Ok(object)
    }

    async fn apply(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
        options: &ApplyOptions,
    ) -> Result<Value, EngineError> {
        self.check_reachable()?;
        self.record(format!("apply {} {name} dry_run={}", kind.kind, options.dry_run));
        self.applied
            .lock()
            .expect("applied lock")
            .push((object.clone(), options.clone()));
        self.check_rejection(kind, name)?;

        let mut stored = object.clone();
        self.stamp(&mut stored);
        if !options.dry_run {
            self.objects
                .lock()
                .expect("objects lock")
                .insert(Self::key(kind, namespace, name), stored.clone());
        }
        Ok(stored)
    }

    async fn delete(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        name: &str,
        dry_run: bool,
    ) -> Result<(), EngineError> {
        self.check_reachable()?;
        self.record(format!("delete {} {name} dry_run={dry_run}", kind.kind));
        let key = Self::key(kind, namespace, name);
        let mut objects = self.objects.lock().expect("objects lock");
        if !objects.contains_key(&key) {
            return Err(Self::not_found(kind, name));
        }
        if !dry_run {
            objects.remove(&key);
        }
        Ok(())
    }

    async fn list(
        &self,
        kind: &ResolvedKind,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Value, EngineError> {
        self.check_reachable()?;
        self.record(format!("list {}", kind.kind));
        let api_version = kind.api_version();
        let namespace = namespace.filter(|_| kind.namespaced);
        let matching: Vec<Value> = self
            .objects
            .lock()
            .expect("objects lock")
            .iter()
            .filter(|((av, plural, ns, _), _)| {
                *av == api_version
                    && *plural == kind.plural
                    && namespace.is_none_or(|wanted| ns.as_deref() == Some(wanted))
            })
            .map(|(_, object)| object.clone())
            .collect();

        let offset = query
            .continue_token
            .as_deref()
            .and_then(|token| token.parse::<usize>().ok())
            .unwrap_or(0);
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let items: Vec<Value> = matching.iter().skip(offset).take(limit).cloned().collect();
        let next = offset + items.len();

        let mut metadata = json!({"resourceVersion": "100"});
        if next < matching.len() {
            metadata["continue"] = json!(next.to_string());
        }
        Ok(json!({
            "apiVersion": api_version,
            "kind": format!("{}List", kind.kind),
            "metadata": metadata,
            "items": items,
        }))
    }
}

/// Hands out pre-registered fakes per scope. Unknown scopes get an
/// unreachable control plane.
pub(crate) struct FakeConnector {
    planes: Mutex<HashMap<Scope, Arc<FakeControlPlane>>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self {
            planes: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, scope: Scope, plane: FakeControlPlane) -> Arc<FakeControlPlane> {
        let plane = Arc::new(plane);
        self.planes
            .lock()
            .expect("planes lock")
            .insert(scope, Arc::clone(&plane));
        plane
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, scope: &Scope) -> Result<Arc<dyn ControlPlane>, EngineError> {
        let plane = self.planes.lock().expect("planes lock").get(scope).cloned();
        Ok(match plane {
            Some(plane) => plane,
            None => {
                let unreachable = FakeControlPlane::new();
                unreachable.set_reachable(false);
                Arc::new(unreachable)
            }
        })
    }
}

/// Session on project `p1`, namespace `default`, backed by `plane`.
pub(crate) fn state_with(plane: FakeControlPlane) -> (Arc<SessionState>, Arc<FakeControlPlane>) {
    let plane = Arc::new(plane);
    let session = Session::new(
        Scope::Project("p1".to_string()),
        "default",
        Arc::clone(&plane) as Arc<dyn ControlPlane>,
    );
    let state = SessionState::new(session, Arc::new(FakeConnector::new()));
    (Arc::new(state), plane)
}

/// A minimal CustomResourceDefinition document.
pub(crate) fn crd(group: &str, kind: &str, plural: &str, versions: &[(&str, bool)]) -> Value {
    let versions: Vec<Value> = versions
        .iter()
        .enumerate()
        .map(|(i, (name, served))| {
            json!({
                "name": name,
                "served": served,
                "storage": i == 0,
                "additionalPrinterColumns": [
                    {"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}
                ]
            })
        })
        .collect();
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": format!("{plural}.{group}")},
        "spec": {
            "group": group,
            "names": {"kind": kind, "plural": plural, "listKind": format!("{kind}List"), "singular": kind.to_lowercase()},
            "scope": "Namespaced",
            "versions": versions
        }
    })
}
