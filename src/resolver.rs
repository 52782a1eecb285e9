// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Reference resolution over the active resource map
//!
//! Edges are never patched. Every resource in the recompute set loses its
//! outgoing references and the incoming references it created on others,
//! and both are rebuilt from the kind's rules against the resources that
//! are visible in the current [`View`].

use crate::graph::ReferenceGraph;
use crate::kinds::{parent_dir, KindRegistry, RefCandidate, RefValue};
use crate::types::{
    Diagnostic, ProcessingOptions, RefDirection, RefStatus, Resource, ResourceMap, ResourceRef,
    DEFAULT_NAMESPACE,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Which part of the resource map is visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// File-backed and unsaved resources
    #[default]
    Local,
    /// Resources installed by the active preview
    Preview,
    /// Resources loaded for the cluster diff
    ClusterDiff,
    /// Everything
    All,
}

impl View {
    /// Is the resource visible in this view?
    #[must_use]
    pub fn contains(self, resource: &Resource) -> bool {
        match self {
            Self::Local => resource.is_local(),
            Self::Preview => resource.is_preview(),
            Self::ClusterDiff => resource.is_cluster_diff(),
            Self::All => true,
        }
    }
}

/// Which resources to recompute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveScope {
    /// Every resource in the view
    Full,
    /// The listed resources plus every resource of the listed kinds
    Partial {
        /// Resource ids
        resource_ids: BTreeSet<String>,
        /// Kinds whose resources are recomputed as well
        kinds: BTreeSet<String>,
    },
}

impl ResolveScope {
    /// Scope covering exactly the given resources
    #[must_use]
    pub fn ids(resource_ids: impl IntoIterator<Item = String>) -> Self {
        Self::Partial {
            resource_ids: resource_ids.into_iter().collect(),
            kinds: BTreeSet::new(),
        }
    }
}

/// A required reference that found no target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Source resource id
    pub resource_id: String,
    /// Source resource kind
    pub kind: String,
    /// Source resource name
    pub name: String,
    /// The dangling reference
    pub reference: ResourceRef,
}

/// Recompute references for the resources selected by `scope`
///
/// Rule failures do not stop resolution; each is returned as a diagnostic.
pub fn resolve(
    map: &mut ResourceMap,
    view: View,
    registry: &KindRegistry,
    scope: &ResolveScope,
    options: ProcessingOptions,
) -> Vec<Diagnostic> {
    let recompute: BTreeSet<String> = map
        .values()
        .filter(|r| view.contains(r))
        .filter(|r| match scope {
            ResolveScope::Full => true,
            ResolveScope::Partial {
                resource_ids,
                kinds,
            } => resource_ids.contains(&r.id) || kinds.contains(&r.kind),
        })
        .map(|r| r.id.clone())
        .collect();

    debug!(count = recompute.len(), ?view, "resolving references");

    for resource in map.values_mut() {
        if recompute.contains(&resource.id) {
            resource.refs.retain(|r| r.direction == RefDirection::Incoming);
        }
        resource.refs.retain(|r| {
            r.direction == RefDirection::Outgoing
                || !r.target_id.as_ref().is_some_and(|t| recompute.contains(t))
        });
    }

    let mut diagnostics = Vec::new();
    let mut outgoing: BTreeMap<String, Vec<ResourceRef>> = BTreeMap::new();
    let mut incoming: BTreeMap<String, Vec<ResourceRef>> = BTreeMap::new();

    {
        let visible: Vec<&Resource> = map.values().filter(|r| view.contains(r)).collect();
        for id in &recompute {
            let Some(source) = map.get(id) else { continue };
            let Some(handler) = registry.get(&source.kind) else {
                continue;
            };
            let extraction = handler.extract_ref_candidates(source);
            for failure in extraction.failures {
                warn!(resource = %source.id, kind = %source.kind, "{failure}");
                diagnostics.push(Diagnostic::resource_warning(&source.id, failure.to_string()));
            }

            let refs = outgoing.entry(source.id.clone()).or_default();
            for candidate in extraction.candidates {
                let targets: Vec<&Resource> = visible
                    .iter()
                    .copied()
                    .filter(|t| t.id != source.id && matches_target(&candidate, t, registry))
                    .collect();

                if targets.is_empty() {
                    if candidate.optional && options.ignore_optional_unsatisfied_refs {
                        continue;
                    }
                    refs.push(unsatisfied_ref(&candidate));
                    continue;
                }
                for target in targets {
                    refs.push(ResourceRef {
                        direction: RefDirection::Outgoing,
                        status: RefStatus::Satisfied,
                        ref_type: candidate.ref_type.clone(),
                        target_kind: target.kind.clone(),
                        name: candidate.value.to_string(),
                        target_id: Some(target.id.clone()),
                        optional: candidate.optional,
                        by_name: matches!(candidate.value, RefValue::Name(_)),
                        field_path: candidate.field_path.clone(),
                    });
                    incoming.entry(target.id.clone()).or_default().push(ResourceRef {
                        direction: RefDirection::Incoming,
                        status: RefStatus::Satisfied,
                        ref_type: candidate.ref_type.clone(),
                        target_kind: source.kind.clone(),
                        name: source.name.clone(),
                        target_id: Some(source.id.clone()),
                        optional: candidate.optional,
                        by_name: matches!(candidate.value, RefValue::Name(_)),
                        field_path: candidate.field_path.clone(),
                    });
                }
            }
        }
    }

    for (id, refs) in outgoing.into_iter().chain(incoming) {
        if let Some(resource) = map.get_mut(&id) {
            resource.refs.extend(refs);
        }
    }

    diagnostics
}

fn unsatisfied_ref(candidate: &RefCandidate) -> ResourceRef {
    let target_kind = match candidate.value {
        RefValue::File(_) => "File".to_string(),
        _ => candidate.target_kinds.join("|"),
    };
    ResourceRef {
        direction: RefDirection::Outgoing,
        status: if candidate.optional {
            RefStatus::UnsatisfiedOptional
        } else {
            RefStatus::UnsatisfiedRequired
        },
        ref_type: candidate.ref_type.clone(),
        target_kind,
        name: candidate.value.to_string(),
        target_id: None,
        optional: candidate.optional,
        by_name: matches!(candidate.value, RefValue::Name(_)),
        field_path: candidate.field_path.clone(),
    }
}

fn matches_target(candidate: &RefCandidate, target: &Resource, registry: &KindRegistry) -> bool {
    match &candidate.value {
        RefValue::File(path) => {
            target.file_path == *path
                || (target.kind == "Kustomization" && parent_dir(&target.file_path) == path.as_str())
        }
        RefValue::Name(name) => {
            accepts_kind(candidate, &target.kind)
                && target.name == *name
                && same_namespace(candidate, target, registry)
        }
        RefValue::Selector(selector) => {
            if !accepts_kind(candidate, &target.kind) || !same_namespace(candidate, target, registry) {
                return false;
            }
            let labels = target.labels_at(&registry.labels_path(&target.kind));
            selector.iter().all(|(k, v)| labels.get(k) == Some(v))
        }
    }
}

fn accepts_kind(candidate: &RefCandidate, kind: &str) -> bool {
    candidate.target_kinds.iter().any(|k| k == "*" || k == kind)
}

fn same_namespace(candidate: &RefCandidate, target: &Resource, registry: &KindRegistry) -> bool {
    if !registry.is_namespaced(&target.kind) {
        return true;
    }
    let wanted = candidate.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
    target.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE) == wanted
}

/// Resources connected to `start` through references in either direction
#[must_use]
pub fn affected_resources(map: &ResourceMap, start: &str) -> BTreeSet<String> {
    ReferenceGraph::from_resources(map.values()).connected(start)
}

/// Detach a resource that is about to leave the map
///
/// References other resources hold to it become unsatisfied, unless another
/// target still satisfies the same field or the reference is an optional one
/// that would be ignored. Incoming references it created on its targets are
/// dropped.
pub fn mark_refs_unsatisfied_on_delete(
    map: &mut ResourceMap,
    deleted: &Resource,
    options: ProcessingOptions,
) {
    let sources: BTreeSet<&String> = deleted
        .incoming_refs()
        .filter_map(|r| r.target_id.as_ref())
        .collect();

    for source_id in sources {
        let Some(source) = map.get_mut(source_id) else {
            continue;
        };
        let before = source.refs.clone();
        let mut rewritten = Vec::with_capacity(before.len());
        for r in &before {
            let points_at_deleted = r.direction == RefDirection::Outgoing
                && r.target_id.as_deref() == Some(deleted.id.as_str());
            if !points_at_deleted {
                rewritten.push(r.clone());
                continue;
            }
            let still_covered = before.iter().any(|other| {
                other.direction == RefDirection::Outgoing
                    && other.is_satisfied()
                    && other.ref_type == r.ref_type
                    && other.field_path == r.field_path
                    && other.target_id.as_deref() != Some(deleted.id.as_str())
            });
            if still_covered || (r.optional && options.ignore_optional_unsatisfied_refs) {
                continue;
            }
            rewritten.push(ResourceRef {
                status: if r.optional {
                    RefStatus::UnsatisfiedOptional
                } else {
                    RefStatus::UnsatisfiedRequired
                },
                target_id: None,
                ..r.clone()
            });
        }
        source.refs = rewritten;
    }

    for resource in map.values_mut() {
        resource.refs.retain(|r| {
            r.direction == RefDirection::Outgoing || r.target_id.as_deref() != Some(deleted.id.as_str())
        });
    }
}

/// Unsatisfied required references of every visible resource
#[must_use]
pub fn validation_issues(map: &ResourceMap, view: View) -> Vec<ValidationIssue> {
    map.values()
        .filter(|r| view.contains(r))
        .flat_map(|resource| {
            resource
                .outgoing_refs()
                .filter(|r| r.status == RefStatus::UnsatisfiedRequired)
                .map(|r| ValidationIssue {
                    resource_id: resource.id.clone(),
                    kind: resource.kind.clone(),
                    name: resource.name.clone(),
                    reference: r.clone(),
                })
        })
        .collect()
}
