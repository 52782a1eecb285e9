// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Resource kind handlers and their reference rules
//!
//! Every kind the engine understands is described by a [`KindHandler`]. The
//! handler declares where the kind lives in the Kubernetes API and which
//! fields of its content name other resources. [`KindRegistry::builtin`]
//! covers the core workload, config and RBAC kinds plus Kustomization;
//! callers can register more.

use crate::codec::{scalar_to_string, string_map};
use crate::error::EngineError;
use crate::types::{PathSegment, Resource};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Reference rules
// =============================================================================

/// How a reference value picks its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMatcher {
    /// Value is a resource name
    Name,
    /// Value is a label selector matched against target labels
    LabelSelector,
    /// Value is a file or directory path relative to the source file
    FilePath,
}

/// When an unresolved reference is acceptable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optionality {
    /// Always required
    Never,
    /// Always optional
    Always,
    /// Optional when the value's mapping has `optional: true`
    WhenFlagged,
}

/// A rule reading reference values out of one field of a kind's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefMapper {
    /// Rule name, recorded on every reference it produces
    pub ref_type: String,
    /// Dotted path to the value; `*` visits every sequence element
    pub source_path: String,
    /// Kinds the value may point at; `*` accepts any kind
    pub target_kinds: Vec<String>,
    /// How targets are matched
    pub matcher: TargetMatcher,
    /// Whether a dangling reference is an issue
    pub optional: Optionality,
    /// Only apply when a sibling key of the value has this value
    pub sibling_equals: Option<(String, String)>,
}

impl RefMapper {
    /// Name reference rule
    #[must_use]
    pub fn name(ref_type: &str, source_path: &str, target_kinds: &[&str], optional: Optionality) -> Self {
        Self {
            ref_type: ref_type.to_string(),
            source_path: source_path.to_string(),
            target_kinds: target_kinds.iter().map(|k| (*k).to_string()).collect(),
            matcher: TargetMatcher::Name,
            optional,
            sibling_equals: None,
        }
    }

    /// Label selector rule
    #[must_use]
    pub fn selector(ref_type: &str, source_path: &str, target_kinds: &[&str]) -> Self {
        Self {
            matcher: TargetMatcher::LabelSelector,
            ..Self::name(ref_type, source_path, target_kinds, Optionality::Always)
        }
    }

    /// File path rule
    #[must_use]
    pub fn file(ref_type: &str, source_path: &str) -> Self {
        Self {
            matcher: TargetMatcher::FilePath,
            ..Self::name(ref_type, source_path, &["*"], Optionality::Never)
        }
    }

    /// Restrict the rule to values whose sibling `key` equals `value`
    #[must_use]
    pub fn when_sibling(mut self, key: &str, value: &str) -> Self {
        self.sibling_equals = Some((key.to_string(), value.to_string()));
        self
    }

    /// Does this rule accept targets of `kind`?
    #[must_use]
    pub fn targets(&self, kind: &str) -> bool {
        self.target_kinds.iter().any(|k| k == "*" || k == kind)
    }

    /// Read every candidate this rule yields for a resource
    pub fn candidates(&self, resource: &Resource) -> Result<Vec<RefCandidate>, EngineError> {
        let segments: Vec<&str> = self.source_path.split('.').collect();
        let mut fields = Vec::new();
        collect_fields(&resource.content, None, &segments, &mut Vec::new(), &mut fields);

        let mut out = Vec::new();
        for field in fields {
            if let Some((key, expected)) = &self.sibling_equals {
                let actual = field.parent.and_then(|p| p.get(key.as_str())).and_then(Value::as_str);
                if actual != Some(expected.as_str()) {
                    continue;
                }
            }
            let Some(value) = self.read_value(field.value)? else {
                continue;
            };
            let optional = match self.optional {
                Optionality::Never => false,
                Optionality::Always => true,
                Optionality::WhenFlagged => field
                    .parent
                    .and_then(|p| p.get("optional"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            };
            let namespace = field
                .parent
                .and_then(|p| p.get("namespace"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| resource.namespace.clone());
            out.push(RefCandidate {
                ref_type: self.ref_type.clone(),
                target_kinds: self.target_kinds.clone(),
                value,
                namespace,
                optional,
                field_path: field.path,
            });
        }
        Ok(out)
    }

    fn read_value(&self, value: &Value) -> Result<Option<RefValue>, EngineError> {
        let malformed = |expected: &str| EngineError::Rule {
            rule: self.ref_type.clone(),
            message: format!("{} is not {expected}", self.source_path),
        };
        match self.matcher {
            TargetMatcher::Name | TargetMatcher::FilePath => match value {
                Value::Null => Ok(None),
                Value::Mapping(_) | Value::Sequence(_) | Value::Tagged(_) => Err(malformed("a scalar")),
                scalar => {
                    let text = scalar_to_string(scalar).unwrap_or_default();
                    if text.is_empty() {
                        Ok(None)
                    } else if self.matcher == TargetMatcher::Name {
                        Ok(Some(RefValue::Name(text)))
                    } else {
                        Ok(Some(RefValue::File(text)))
                    }
                }
            },
            TargetMatcher::LabelSelector => match value {
                Value::Null => Ok(None),
                other => {
                    let labels = string_map(other).ok_or_else(|| malformed("a map of labels"))?;
                    Ok((!labels.is_empty()).then_some(RefValue::Selector(labels)))
                }
            },
        }
    }
}

struct FieldMatch<'a> {
    path: Vec<PathSegment>,
    value: &'a Value,
    parent: Option<&'a Mapping>,
}

fn collect_fields<'a>(
    node: &'a Value,
    parent: Option<&'a Mapping>,
    segments: &[&str],
    path: &mut Vec<PathSegment>,
    out: &mut Vec<FieldMatch<'a>>,
) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(FieldMatch {
            path: path.clone(),
            value: node,
            parent,
        });
        return;
    };
    if *head == "*" {
        if let Value::Sequence(items) = node {
            for (i, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(i));
                collect_fields(item, parent, rest, path, out);
                path.pop();
            }
        }
    } else if let Value::Mapping(map) = node {
        if let Some(child) = map.get(*head) {
            path.push(PathSegment::Key((*head).to_string()));
            collect_fields(child, Some(map), rest, path, out);
            path.pop();
        }
    }
}

/// A value read by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    /// Resource name
    Name(String),
    /// Label selector
    Selector(BTreeMap<String, String>),
    /// Path relative to the source file's directory
    File(String),
}

impl fmt::Display for RefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) | Self::File(name) => f.write_str(name),
            Self::Selector(labels) => {
                let parts: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

/// One reference a resource's content asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCandidate {
    /// Rule name
    pub ref_type: String,
    /// Kinds that may satisfy it
    pub target_kinds: Vec<String>,
    /// Value read from the content
    pub value: RefValue,
    /// Namespace targets must live in
    pub namespace: Option<String>,
    /// Whether a dangling reference is acceptable
    pub optional: bool,
    /// Where the value was read
    pub field_path: Vec<PathSegment>,
}

/// Candidates produced for one resource, with the rules that failed
#[derive(Debug, Default)]
pub struct Extraction {
    /// Candidates of every rule that succeeded
    pub candidates: Vec<RefCandidate>,
    /// Rules that could not read the content
    pub failures: Vec<EngineError>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Capabilities the engine needs for one resource kind
pub trait KindHandler: Send + Sync + fmt::Debug {
    /// Kind string, e.g. `Deployment`
    fn kind(&self) -> &str;

    /// Preferred apiVersion
    fn api_version(&self) -> &str;

    /// Whether objects of this kind live in a namespace
    fn is_namespaced(&self) -> bool {
        true
    }

    /// Reference rules
    fn ref_mappers(&self) -> &[RefMapper];

    /// Where pod labels live for selector matching
    fn labels_path(&self) -> &[&'static str] {
        &["metadata", "labels"]
    }

    /// REST collection path, or `None` when the kind is not served by the API
    fn api_path(&self, namespace: Option<&str>) -> Option<String>;

    /// Read reference candidates; a failing rule only drops its own candidates
    fn extract_ref_candidates(&self, resource: &Resource) -> Extraction {
        let mut extraction = Extraction::default();
        for mapper in self.ref_mappers() {
            match mapper.candidates(resource) {
                Ok(candidates) => extraction.candidates.extend(candidates),
                Err(err) => extraction.failures.push(err),
            }
        }
        extraction
    }
}

/// Handler for kinds described entirely by a rule table
#[derive(Debug, Clone)]
pub struct BuiltinKind {
    kind: String,
    api_version: String,
    plural: String,
    namespaced: bool,
    labels_path: &'static [&'static str],
    mappers: Vec<RefMapper>,
}

impl BuiltinKind {
    /// Describe a namespaced kind
    #[must_use]
    pub fn new(kind: &str, api_version: &str, plural: &str) -> Self {
        Self {
            kind: kind.to_string(),
            api_version: api_version.to_string(),
            plural: plural.to_string(),
            namespaced: true,
            labels_path: &["metadata", "labels"],
            mappers: Vec::new(),
        }
    }

    /// Mark the kind cluster-scoped
    #[must_use]
    pub fn cluster_scoped(mut self) -> Self {
        self.namespaced = false;
        self
    }

    /// Pod labels live under the pod template
    #[must_use]
    pub fn with_template_labels(mut self) -> Self {
        self.labels_path = &["spec", "template", "metadata", "labels"];
        self
    }

    /// Add reference rules
    #[must_use]
    pub fn with_mappers(mut self, mappers: impl IntoIterator<Item = RefMapper>) -> Self {
        self.mappers.extend(mappers);
        self
    }
}

impl KindHandler for BuiltinKind {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn is_namespaced(&self) -> bool {
        self.namespaced
    }

    fn ref_mappers(&self) -> &[RefMapper] {
        &self.mappers
    }

    fn labels_path(&self) -> &[&'static str] {
        self.labels_path
    }

    fn api_path(&self, namespace: Option<&str>) -> Option<String> {
        let base = if self.api_version == "v1" {
            "/api/v1".to_string()
        } else {
            format!("/apis/{}", self.api_version)
        };
        Some(match namespace {
            Some(ns) if self.namespaced => format!("{base}/namespaces/{ns}/{}", self.plural),
            _ => format!("{base}/{}", self.plural),
        })
    }
}

/// Kustomization files reference other files and directories
#[derive(Debug, Clone)]
pub struct KustomizationKind {
    mappers: Vec<RefMapper>,
}

impl Default for KustomizationKind {
    fn default() -> Self {
        Self {
            mappers: vec![
                RefMapper::file("kustomizationResource", "resources.*"),
                RefMapper::file("kustomizationBase", "bases.*"),
                RefMapper::file("kustomizationComponent", "components.*"),
                RefMapper::file("kustomizationPatch", "patchesStrategicMerge.*"),
                RefMapper::file("kustomizationPatch", "patches.*.path"),
                RefMapper::file("kustomizationPatch", "patchesJson6902.*.path"),
            ],
        }
    }
}

impl KindHandler for KustomizationKind {
    fn kind(&self) -> &str {
        "Kustomization"
    }

    fn api_version(&self) -> &str {
        "kustomize.config.k8s.io/v1beta1"
    }

    fn ref_mappers(&self) -> &[RefMapper] {
        &self.mappers
    }

    fn api_path(&self, _namespace: Option<&str>) -> Option<String> {
        None
    }

    /// File values are rewritten relative to the project root; remote bases are dropped
    fn extract_ref_candidates(&self, resource: &Resource) -> Extraction {
        let dir = parent_dir(&resource.file_path);
        let mut extraction = Extraction::default();
        for mapper in &self.mappers {
            match mapper.candidates(resource) {
                Ok(candidates) => {
                    for mut candidate in candidates {
                        if let RefValue::File(path) = &candidate.value {
                            if path.contains("://") || path.starts_with("github.com/") {
                                continue;
                            }
                            candidate.value = RefValue::File(join_relative(dir, path));
                        }
                        candidate.namespace = None;
                        extraction.candidates.push(candidate);
                    }
                }
                Err(err) => extraction.failures.push(err),
            }
        }
        extraction
    }
}

/// Directory part of a `/`-separated relative path ("" for the root)
#[must_use]
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

/// Join and normalize `.`/`..` segments of a relative path
#[must_use]
pub fn join_relative(dir: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for part in rel.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn pod_spec_mappers(prefix: &str) -> Vec<RefMapper> {
    let p = |suffix: &str| format!("{prefix}.{suffix}");
    let mut mappers = Vec::new();
    for containers in ["containers", "initContainers"] {
        mappers.push(RefMapper::name(
            "configMapRef",
            &p(&format!("{containers}.*.envFrom.*.configMapRef.name")),
            &["ConfigMap"],
            Optionality::WhenFlagged,
        ));
        mappers.push(RefMapper::name(
            "configMapKeyRef",
            &p(&format!("{containers}.*.env.*.valueFrom.configMapKeyRef.name")),
            &["ConfigMap"],
            Optionality::WhenFlagged,
        ));
        mappers.push(RefMapper::name(
            "secretRef",
            &p(&format!("{containers}.*.envFrom.*.secretRef.name")),
            &["Secret"],
            Optionality::WhenFlagged,
        ));
        mappers.push(RefMapper::name(
            "secretKeyRef",
            &p(&format!("{containers}.*.env.*.valueFrom.secretKeyRef.name")),
            &["Secret"],
            Optionality::WhenFlagged,
        ));
    }
    mappers.extend([
        RefMapper::name("volumeConfigMap", &p("volumes.*.configMap.name"), &["ConfigMap"], Optionality::WhenFlagged),
        RefMapper::name("volumeSecret", &p("volumes.*.secret.secretName"), &["Secret"], Optionality::WhenFlagged),
        RefMapper::name(
            "projectedConfigMap",
            &p("volumes.*.projected.sources.*.configMap.name"),
            &["ConfigMap"],
            Optionality::WhenFlagged,
        ),
        RefMapper::name(
            "projectedSecret",
            &p("volumes.*.projected.sources.*.secret.name"),
            &["Secret"],
            Optionality::WhenFlagged,
        ),
        RefMapper::name(
            "persistentVolumeClaim",
            &p("volumes.*.persistentVolumeClaim.claimName"),
            &["PersistentVolumeClaim"],
            Optionality::Never,
        ),
        RefMapper::name("imagePullSecret", &p("imagePullSecrets.*.name"), &["Secret"], Optionality::Always),
        RefMapper::name("serviceAccount", &p("serviceAccountName"), &["ServiceAccount"], Optionality::Always),
    ]);
    mappers
}

const SELECTABLE_WORKLOADS: &[&str] = &["Pod", "Deployment", "StatefulSet", "DaemonSet", "ReplicaSet", "Job"];

fn builtin_handlers() -> Vec<Arc<dyn KindHandler>> {
    let workload = |kind: &str, api: &str, plural: &str| {
        BuiltinKind::new(kind, api, plural)
            .with_template_labels()
            .with_mappers(pod_spec_mappers("spec.template.spec"))
    };
    let role_ref = |targets: &[&str]| RefMapper::name("roleRef", "roleRef.name", targets, Optionality::Never);
    let subjects = RefMapper::name("subject", "subjects.*.name", &["ServiceAccount"], Optionality::Always)
        .when_sibling("kind", "ServiceAccount");

    vec![
        Arc::new(BuiltinKind::new("ConfigMap", "v1", "configmaps")),
        Arc::new(BuiltinKind::new("Secret", "v1", "secrets")),
        Arc::new(BuiltinKind::new("ServiceAccount", "v1", "serviceaccounts")),
        Arc::new(BuiltinKind::new("PersistentVolumeClaim", "v1", "persistentvolumeclaims").with_mappers([
            RefMapper::name("persistentVolume", "spec.volumeName", &["PersistentVolume"], Optionality::Always),
        ])),
        Arc::new(BuiltinKind::new("PersistentVolume", "v1", "persistentvolumes").cluster_scoped()),
        Arc::new(BuiltinKind::new("Namespace", "v1", "namespaces").cluster_scoped()),
        Arc::new(BuiltinKind::new("Pod", "v1", "pods").with_mappers(pod_spec_mappers("spec"))),
        Arc::new(workload("Deployment", "apps/v1", "deployments")),
        Arc::new(workload("StatefulSet", "apps/v1", "statefulsets")),
        Arc::new(workload("DaemonSet", "apps/v1", "daemonsets")),
        Arc::new(workload("ReplicaSet", "apps/v1", "replicasets")),
        Arc::new(workload("Job", "batch/v1", "jobs")),
        Arc::new(
            BuiltinKind::new("CronJob", "batch/v1", "cronjobs")
                .with_mappers(pod_spec_mappers("spec.jobTemplate.spec.template.spec")),
        ),
        Arc::new(
            BuiltinKind::new("Service", "v1", "services")
                .with_mappers([RefMapper::selector("selector", "spec.selector", SELECTABLE_WORKLOADS)]),
        ),
        Arc::new(BuiltinKind::new("Ingress", "networking.k8s.io/v1", "ingresses").with_mappers([
            RefMapper::name(
                "ingressBackend",
                "spec.rules.*.http.paths.*.backend.service.name",
                &["Service"],
                Optionality::Never,
            ),
            RefMapper::name("ingressBackend", "spec.defaultBackend.service.name", &["Service"], Optionality::Never),
            RefMapper::name("ingressTls", "spec.tls.*.secretName", &["Secret"], Optionality::Never),
        ])),
        Arc::new(BuiltinKind::new("Role", "rbac.authorization.k8s.io/v1", "roles")),
        Arc::new(BuiltinKind::new("ClusterRole", "rbac.authorization.k8s.io/v1", "clusterroles").cluster_scoped()),
        Arc::new(
            BuiltinKind::new("RoleBinding", "rbac.authorization.k8s.io/v1", "rolebindings")
                .with_mappers([role_ref(&["Role", "ClusterRole"]), subjects.clone()]),
        ),
        Arc::new(
            BuiltinKind::new("ClusterRoleBinding", "rbac.authorization.k8s.io/v1", "clusterrolebindings")
                .cluster_scoped()
                .with_mappers([role_ref(&["ClusterRole"]), subjects]),
        ),
        Arc::new(KustomizationKind::default()),
    ]
}

// =============================================================================
// Registry
// =============================================================================

/// Kind string to handler mapping
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    handlers: BTreeMap<String, Arc<dyn KindHandler>>,
}

impl KindRegistry {
    /// Registry with every built-in kind
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for handler in builtin_handlers() {
            registry.register(handler);
        }
        registry
    }

    /// Add or replace a handler
    pub fn register(&mut self, handler: Arc<dyn KindHandler>) {
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    /// Handler for a kind
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&Arc<dyn KindHandler>> {
        self.handlers.get(kind)
    }

    /// Every registered kind
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Every registered handler
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn KindHandler>> {
        self.handlers.values()
    }

    /// Unknown kinds are treated as namespaced
    #[must_use]
    pub fn is_namespaced(&self, kind: &str) -> bool {
        self.get(kind).map_or(true, |h| h.is_namespaced())
    }

    /// Labels path used when `kind` is the target of a selector
    #[must_use]
    pub fn labels_path(&self, kind: &str) -> Vec<&'static str> {
        self.get(kind)
            .map_or_else(|| vec!["metadata", "labels"], |h| h.labels_path().to_vec())
    }

    /// Namespace used for identity and matching: `Some("")` for cluster-scoped kinds
    #[must_use]
    pub fn scope_namespace<'a>(&self, kind: &str, namespace: Option<&'a str>) -> Option<&'a str> {
        if self.is_namespaced(kind) {
            namespace
        } else {
            Some("")
        }
    }

    /// Kinds that have a rule able to point at `kind`
    #[must_use]
    pub fn source_kinds_targeting(&self, kind: &str) -> BTreeSet<String> {
        self.handlers
            .values()
            .filter(|h| h.ref_mappers().iter().any(|m| m.targets(kind)))
            .map(|h| h.kind().to_string())
            .collect()
    }

    /// Kinds with at least one rule whose references can be optional
    #[must_use]
    pub fn kinds_with_optional_refs(&self) -> BTreeSet<String> {
        self.handlers
            .values()
            .filter(|h| h.ref_mappers().iter().any(|m| m.optional != Optionality::Never))
            .map(|h| h.kind().to_string())
            .collect()
    }
}
