// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Preview and cluster-diff overlay state
//!
//! Every request for external work takes a fresh number from one
//! monotonically increasing generation counter. A result is only accepted
//! while its generation is still the one the state machine is waiting for.

use crate::codec::identifier_for;
use crate::kinds::KindRegistry;
use crate::resolver::View;
use crate::types::{PreviewKind, Resource};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// A preview request stamped with its generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewTicket {
    /// Generation the result must carry
    pub generation: u64,
    /// What is previewed
    pub kind: PreviewKind,
    /// Kustomization id, values file path or cluster context
    pub target: String,
}

/// Preview state machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PreviewState {
    /// No preview
    #[default]
    Inactive,
    /// Waiting for a renderer or the cluster
    Loading(PreviewTicket),
    /// Preview resources are installed
    Active(PreviewTicket),
}

/// Cluster diff lifecycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClusterDiffStatus {
    /// Not open
    #[default]
    Closed,
    /// Waiting for cluster objects
    Loading {
        /// Generation the result must carry
        generation: u64,
    },
    /// Matches computed
    Loaded,
    /// The fetch failed
    Failed {
        /// Reason
        message: String,
    },
}

/// One row of the cluster diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterMatch {
    /// Identity key shared by both sides
    pub id: String,
    /// Kind
    pub kind: String,
    /// Name
    pub name: String,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Local resources with this key
    pub local_ids: Vec<String>,
    /// Cluster resource with this key
    pub cluster_id: Option<String>,
}

impl ClusterMatch {
    /// Only present in the cluster
    #[must_use]
    pub fn is_cluster_only(&self) -> bool {
        self.local_ids.is_empty()
    }

    /// Only present locally
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.cluster_id.is_none()
    }
}

/// Cluster diff state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterDiffState {
    /// Lifecycle
    pub status: ClusterDiffStatus,
    /// Every match record
    pub matches: Vec<ClusterMatch>,
    /// Leave cluster-only records out of [`OverlayManager::visible_matches`]
    pub hide_cluster_only: bool,
    /// Selected match ids
    pub selected: BTreeSet<String>,
}

/// Preview and cluster diff overlays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverlayManager {
    generation: u64,
    preview: PreviewState,
    cluster_diff: ClusterDiffState,
}

impl OverlayManager {
    /// Manager with both overlays closed
    #[must_use]
    pub fn new(hide_cluster_only: bool) -> Self {
        Self {
            cluster_diff: ClusterDiffState {
                hide_cluster_only,
                ..ClusterDiffState::default()
            },
            ..Self::default()
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Last generation handed out
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // =========================================================================
    // Preview
    // =========================================================================

    /// Current preview state
    #[must_use]
    pub fn preview(&self) -> &PreviewState {
        &self.preview
    }

    /// Installed preview, if any
    #[must_use]
    pub fn active_preview(&self) -> Option<&PreviewTicket> {
        match &self.preview {
            PreviewState::Active(ticket) => Some(ticket),
            _ => None,
        }
    }

    /// View the rest of the engine reads through
    #[must_use]
    pub fn view(&self) -> View {
        if self.active_preview().is_some() {
            View::Preview
        } else {
            View::Local
        }
    }

    /// Begin loading a preview; any earlier request becomes stale
    pub fn start_preview(&mut self, kind: PreviewKind, target: impl Into<String>) -> PreviewTicket {
        let ticket = PreviewTicket {
            generation: self.next_generation(),
            kind,
            target: target.into(),
        };
        info!(generation = ticket.generation, "Starting {} preview of {}", kind, ticket.target);
        self.preview = PreviewState::Loading(ticket.clone());
        ticket
    }

    /// Is `generation` the preview being waited for?
    #[must_use]
    pub fn is_current_preview(&self, generation: u64) -> bool {
        matches!(&self.preview, PreviewState::Loading(t) if t.generation == generation)
    }

    /// Accept a rendered preview; `None` when the result is stale
    pub fn complete_preview(&mut self, generation: u64) -> Option<PreviewTicket> {
        if !self.is_current_preview(generation) {
            debug!(generation, "Discarding stale preview result");
            return None;
        }
        let PreviewState::Loading(ticket) = std::mem::take(&mut self.preview) else {
            return None;
        };
        self.preview = PreviewState::Active(ticket.clone());
        Some(ticket)
    }

    /// Drop a failed preview; `None` when the failure is stale
    pub fn fail_preview(&mut self, generation: u64) -> Option<PreviewTicket> {
        if !self.is_current_preview(generation) {
            debug!(generation, "Discarding stale preview failure");
            return None;
        }
        match std::mem::take(&mut self.preview) {
            PreviewState::Loading(ticket) => Some(ticket),
            _ => None,
        }
    }

    /// Leave preview mode; in-flight results become stale
    pub fn stop_preview(&mut self) -> PreviewState {
        self.next_generation();
        std::mem::take(&mut self.preview)
    }

    // =========================================================================
    // Cluster diff
    // =========================================================================

    /// Cluster diff state
    #[must_use]
    pub fn cluster_diff(&self) -> &ClusterDiffState {
        &self.cluster_diff
    }

    /// Begin fetching cluster objects, dropping previous matches
    pub fn begin_cluster_diff(&mut self) -> u64 {
        let generation = self.next_generation();
        self.cluster_diff.status = ClusterDiffStatus::Loading { generation };
        self.cluster_diff.matches.clear();
        self.cluster_diff.selected.clear();
        generation
    }

    /// Is `generation` the cluster fetch being waited for?
    #[must_use]
    pub fn is_current_cluster_diff(&self, generation: u64) -> bool {
        self.cluster_diff.status == ClusterDiffStatus::Loading { generation }
    }

    /// Accept computed matches; false when the result is stale
    pub fn complete_cluster_diff(&mut self, generation: u64, matches: Vec<ClusterMatch>) -> bool {
        if !self.is_current_cluster_diff(generation) {
            debug!(generation, "Discarding stale cluster diff");
            return false;
        }
        info!("Cluster diff loaded with {} matches", matches.len());
        self.cluster_diff.status = ClusterDiffStatus::Loaded;
        self.cluster_diff.matches = matches;
        true
    }

    /// Record a failed fetch; false when the failure is stale
    pub fn fail_cluster_diff(&mut self, generation: u64, message: impl Into<String>) -> bool {
        if !self.is_current_cluster_diff(generation) {
            return false;
        }
        self.cluster_diff.status = ClusterDiffStatus::Failed {
            message: message.into(),
        };
        true
    }

    /// Close the diff; in-flight results become stale
    pub fn close_cluster_diff(&mut self) {
        self.next_generation();
        self.cluster_diff.status = ClusterDiffStatus::Closed;
        self.cluster_diff.matches.clear();
        self.cluster_diff.selected.clear();
    }

    /// Flip the cluster-only filter, returning the new value
    pub fn toggle_cluster_only(&mut self) -> bool {
        self.cluster_diff.hide_cluster_only = !self.cluster_diff.hide_cluster_only;
        self.cluster_diff.hide_cluster_only
    }

    /// Recompute matches in place, keeping selections that still exist
    pub fn refresh_matches(&mut self, matches: Vec<ClusterMatch>) {
        let ids: BTreeSet<&String> = matches.iter().map(|m| &m.id).collect();
        self.cluster_diff.selected.retain(|s| ids.contains(s));
        self.cluster_diff.matches = matches;
    }

    /// Match records after the cluster-only filter
    pub fn visible_matches(&self) -> impl Iterator<Item = &ClusterMatch> {
        let hide = self.cluster_diff.hide_cluster_only;
        self.cluster_diff
            .matches
            .iter()
            .filter(move |m| !(hide && m.is_cluster_only()))
    }

    /// Select a match; false when no such match exists
    pub fn select_match(&mut self, id: &str) -> bool {
        if self.cluster_diff.matches.iter().any(|m| m.id == id) {
            self.cluster_diff.selected.insert(id.to_string());
            true
        } else {
            false
        }
    }

    /// Unselect a match
    pub fn unselect_match(&mut self, id: &str) -> bool {
        self.cluster_diff.selected.remove(id)
    }

    /// Select every visible match
    pub fn select_matches(&mut self) {
        let ids: Vec<String> = self.visible_matches().map(|m| m.id.clone()).collect();
        self.cluster_diff.selected.extend(ids);
    }

    /// Clear the match selection
    pub fn clear_matches(&mut self) {
        self.cluster_diff.selected.clear();
    }
}

/// Pair local resources with cluster resources by identity key
///
/// Kustomization resources are left out of the local side. Every cluster
/// resource yields one record, carrying the local ids with the same key;
/// every local key with no cluster counterpart yields a local-only record.
#[must_use]
pub fn compute_matches<'a>(
    local: impl IntoIterator<Item = &'a Resource>,
    cluster: impl IntoIterator<Item = &'a Resource>,
    registry: &KindRegistry,
) -> Vec<ClusterMatch> {
    let key = |r: &Resource| {
        identifier_for(
            &r.kind,
            &r.name,
            registry.scope_namespace(&r.kind, r.namespace.as_deref()),
        )
    };

    let mut locals: BTreeMap<String, Vec<&Resource>> = BTreeMap::new();
    for resource in local.into_iter().filter(|r| r.kind != "Kustomization") {
        locals.entry(key(resource)).or_default().push(resource);
    }

    let mut records = Vec::new();
    let mut matched = BTreeSet::new();
    for resource in cluster {
        let id = key(resource);
        let local_ids = locals
            .get(&id)
            .map(|rs| rs.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default();
        matched.insert(id.clone());
        records.push(ClusterMatch {
            id,
            kind: resource.kind.clone(),
            name: resource.name.clone(),
            namespace: match_namespace(registry, resource),
            local_ids,
            cluster_id: Some(resource.id.clone()),
        });
    }
    for (id, resources) in locals {
        if matched.contains(&id) {
            continue;
        }
        let first = resources[0];
        records.push(ClusterMatch {
            kind: first.kind.clone(),
            name: first.name.clone(),
            namespace: match_namespace(registry, first),
            local_ids: resources.iter().map(|r| r.id.clone()).collect(),
            cluster_id: None,
            id,
        });
    }
    records.sort_by(|a, b| a.id.cmp(&b.id));
    records
}

fn match_namespace(registry: &KindRegistry, resource: &Resource) -> Option<String> {
    registry.is_namespaced(&resource.kind).then(|| {
        resource
            .namespace
            .clone()
            .unwrap_or_else(|| crate::types::DEFAULT_NAMESPACE.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::extract_resources;
    use crate::types::CLUSTER_DIFF_PREFIX;

    fn resources(text: &str, path: &str) -> Vec<Resource> {
        extract_resources(text, path).0
    }

    #[test]
    fn test_stale_preview_is_discarded() {
        let mut overlay = OverlayManager::new(true);
        let ticket = overlay.start_preview(PreviewKind::Cluster, "kind-dev");
        overlay.stop_preview();

        assert!(overlay.complete_preview(ticket.generation).is_none());
        assert_eq!(overlay.preview(), &PreviewState::Inactive);
        assert_eq!(overlay.view(), View::Local);
    }

    #[test]
    fn test_newer_preview_supersedes_older() {
        let mut overlay = OverlayManager::new(true);
        let first = overlay.start_preview(PreviewKind::Helm, "chart/values.yaml");
        let second = overlay.start_preview(PreviewKind::Kustomization, "res:1");

        assert!(overlay.complete_preview(first.generation).is_none());
        assert_eq!(overlay.complete_preview(second.generation), Some(second));
        assert_eq!(overlay.view(), View::Preview);
    }

    #[test]
    fn test_cluster_diff_generation() {
        let mut overlay = OverlayManager::new(true);
        let stale = overlay.begin_cluster_diff();
        let fresh = overlay.begin_cluster_diff();

        assert!(!overlay.complete_cluster_diff(stale, Vec::new()));
        assert!(overlay.complete_cluster_diff(fresh, Vec::new()));
        assert_eq!(overlay.cluster_diff().status, ClusterDiffStatus::Loaded);
        overlay.close_cluster_diff();
        assert_eq!(overlay.cluster_diff().status, ClusterDiffStatus::Closed);
    }

    #[test]
    fn test_matching_groups_by_identity() {
        let local = resources(
            "kind: ConfigMap\nmetadata:\n  name: shared\n---\nkind: ConfigMap\nmetadata:\n  name: local-only\n---\nkind: Kustomization\nmetadata:\n  name: k\n---\nkind: Namespace\nmetadata:\n  name: apps\n  namespace: stray\n",
            "local.yaml",
        );
        let mut cluster = resources(
            "kind: ConfigMap\nmetadata:\n  name: shared\n  namespace: default\n---\nkind: ConfigMap\nmetadata:\n  name: remote-only\n---\nkind: Namespace\nmetadata:\n  name: apps\n",
            &format!("{CLUSTER_DIFF_PREFIX}ctx"),
        );
        for r in &mut cluster {
            r.id = format!("{CLUSTER_DIFF_PREFIX}{}", r.id);
        }
        let registry = KindRegistry::builtin();

        let matches = compute_matches(&local, &cluster, &registry);

        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["apps#Namespace#", "local-only#ConfigMap#default", "remote-only#ConfigMap#default", "shared#ConfigMap#default"]
        );
        assert_eq!(matches[0].local_ids.len(), 1);
        assert!(matches[0].namespace.is_none());
        assert!(matches[1].is_local_only());
        assert!(matches[2].is_cluster_only());
        assert!(!matches[3].is_cluster_only() && !matches[3].is_local_only());

        let mut overlay = OverlayManager::new(true);
        let generation = overlay.begin_cluster_diff();
        overlay.complete_cluster_diff(generation, matches);
        assert_eq!(overlay.visible_matches().count(), 3);
        overlay.toggle_cluster_only();
        assert_eq!(overlay.visible_matches().count(), 4);
        assert!(overlay.select_match("shared#ConfigMap#default"));
        assert!(!overlay.select_match("nope"));
    }
}
