// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! The engine: owned state, a closed command set and one dispatcher
//!
//! [`Engine::dispatch`] snapshots the state, applies one [`Command`] and
//! restores the snapshot when the command fails, so no mutation is ever left
//! half-applied. Work that must happen outside the engine (rendering,
//! talking to a cluster) is returned as an [`ExternalRequest`]; its result
//! comes back as another command stamped with the request's generation.

use crate::cluster::ClusterClient;
use crate::codec::extract_resources;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::filter::ResourceFilter;
use crate::fs::FileSystem;
use crate::graph::ReferenceGraph;
use crate::history::{Direction, SelectionEntry, SelectionHistory};
use crate::kinds::{parent_dir, KindRegistry};
use crate::overlay::{compute_matches, ClusterDiffState, ClusterDiffStatus, ClusterMatch, OverlayManager, PreviewState};
use crate::resolver::{validation_issues, ValidationIssue, View};
use crate::store::{normalize_path, parent_key, ProjectStore, StoreContext};
use crate::types::{
    Diagnostic, FileMap, PreviewKind, ProcessingOptions, Resource, CLUSTER_DIFF_PREFIX,
    PREVIEW_PREFIX, ROOT_FILE_ENTRY,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Commands and outcomes
// =============================================================================

/// Every intent the engine accepts
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Paths appeared under the root
    AddPaths(Vec<String>),
    /// Files changed on disk
    FilesChanged(Vec<String>),
    /// Paths disappeared
    PathsRemoved(Vec<String>),
    /// Overwrite a file and reload it
    UpdateFileEntry {
        /// Relative path
        path: String,
        /// New content
        content: String,
    },
    /// Replace one resource's text
    UpdateResource {
        /// Resource id
        id: String,
        /// New document text
        text: String,
    },
    /// Replace several resources' text
    UpdateManyResources(Vec<(String, String)>),
    /// Create an unsaved resource
    AddResource {
        /// Document text
        text: String,
    },
    /// Delete a resource
    RemoveResource {
        /// Resource id
        id: String,
    },
    /// Write an unsaved resource to a file
    SaveUnsavedResource {
        /// Resource id
        id: String,
        /// Relative destination path
        path: String,
    },
    /// Rename a resource
    RenameResource {
        /// Resource id
        id: String,
        /// New `metadata.name`
        new_name: String,
        /// Also rewrite name references to it
        update_refs: bool,
    },
    /// Begin a preview
    StartPreview {
        /// What to preview
        kind: PreviewKind,
        /// Kustomization id, values file path or cluster context
        target: String,
    },
    /// Rendered output of a preview request
    PreviewLoaded {
        /// Generation of the request
        generation: u64,
        /// Multi-document YAML, or the failure message
        result: std::result::Result<String, String>,
    },
    /// Leave preview mode
    StopPreview,
    /// Compare the local set with a cluster
    LoadClusterDiff {
        /// Cluster context
        context: String,
    },
    /// Cluster objects for a diff request
    ClusterDiffLoaded {
        /// Generation of the request
        generation: u64,
        /// Cluster context
        context: String,
        /// Multi-document YAML, or the failure message
        result: std::result::Result<String, String>,
    },
    /// Close the cluster diff
    CloseClusterDiff,
    /// Show or hide cluster-only match records
    ToggleClusterOnlyResources,
    /// Select a match record
    SelectClusterDiffMatch(String),
    /// Unselect a match record
    UnselectClusterDiffMatch(String),
    /// Select every visible match record
    SelectAllClusterDiffMatches,
    /// Clear the match selection
    UnselectAllClusterDiffMatches,
    /// Select a resource
    SelectResource {
        /// Resource id
        id: String,
        /// Display-only selection that is not recorded in history
        virtual_selection: bool,
    },
    /// Select a file or directory
    SelectFile {
        /// Relative path
        path: String,
        /// Display-only selection that is not recorded in history
        virtual_selection: bool,
    },
    /// Clear the selection
    ClearSelection,
    /// Move through selection history
    NavigateHistory(Direction),
    /// Change the optional-reference option and reprocess
    SetIgnoreOptionalUnsatisfiedRefs(bool),
    /// Re-resolve every resource
    ReprocessAll,
    /// Replace the resource filter
    SetResourceFilter(ResourceFilter),
    /// Merge into the resource filter
    ExtendResourceFilter(ResourceFilter),
    /// Clear the resource filter
    ResetResourceFilter,
}

impl Command {
    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddPaths(_) => "add-paths",
            Self::FilesChanged(_) => "files-changed",
            Self::PathsRemoved(_) => "paths-removed",
            Self::UpdateFileEntry { .. } => "update-file-entry",
            Self::UpdateResource { .. } => "update-resource",
            Self::UpdateManyResources(_) => "update-many-resources",
            Self::AddResource { .. } => "add-resource",
            Self::RemoveResource { .. } => "remove-resource",
            Self::SaveUnsavedResource { .. } => "save-unsaved-resource",
            Self::RenameResource { .. } => "rename-resource",
            Self::StartPreview { .. } => "start-preview",
            Self::PreviewLoaded { .. } => "preview-loaded",
            Self::StopPreview => "stop-preview",
            Self::LoadClusterDiff { .. } => "load-cluster-diff",
            Self::ClusterDiffLoaded { .. } => "cluster-diff-loaded",
            Self::CloseClusterDiff => "close-cluster-diff",
            Self::ToggleClusterOnlyResources => "toggle-cluster-only",
            Self::SelectClusterDiffMatch(_) => "select-cluster-diff-match",
            Self::UnselectClusterDiffMatch(_) => "unselect-cluster-diff-match",
            Self::SelectAllClusterDiffMatches => "select-all-cluster-diff-matches",
            Self::UnselectAllClusterDiffMatches => "unselect-all-cluster-diff-matches",
            Self::SelectResource { .. } => "select-resource",
            Self::SelectFile { .. } => "select-file",
            Self::ClearSelection => "clear-selection",
            Self::NavigateHistory(_) => "navigate-history",
            Self::SetIgnoreOptionalUnsatisfiedRefs(_) => "set-ignore-optional-unsatisfied-refs",
            Self::ReprocessAll => "reprocess-all",
            Self::SetResourceFilter(_) => "set-resource-filter",
            Self::ExtendResourceFilter(_) => "extend-resource-filter",
            Self::ResetResourceFilter => "reset-resource-filter",
        }
    }
}

/// Why the cluster is being fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPurpose {
    /// For a cluster preview
    Preview,
    /// For a cluster diff
    Diff,
}

/// Work the engine needs done outside its own thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "work", rename_all = "snake_case")]
pub enum ExternalWork {
    /// `kustomize build` of a directory
    RenderKustomization {
        /// Absolute directory
        dir: PathBuf,
    },
    /// `helm template` of a chart with a values file
    RenderHelm {
        /// Absolute chart directory
        chart_dir: PathBuf,
        /// Absolute values file
        values_file: PathBuf,
    },
    /// List cluster objects
    FetchCluster {
        /// Cluster context
        context: String,
        /// What the objects are for
        purpose: FetchPurpose,
    },
}

/// External work stamped with the generation its result must carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalRequest {
    /// Generation
    pub generation: u64,
    /// What to do
    pub work: ExternalWork,
}

/// What a successful command produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// Problems that did not abort the command
    pub diagnostics: Vec<Diagnostic>,
    /// External work to start
    pub request: Option<ExternalRequest>,
    /// Id of a resource the command created
    pub created: Option<String>,
}

impl Outcome {
    fn with_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            diagnostics,
            ..Self::default()
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Current selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// Selected resource
    pub resource_id: Option<String>,
    /// Selected file or directory
    pub path: Option<String>,
    /// Resources related to the selection
    pub highlighted: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct EngineState {
    store: ProjectStore,
    overlay: OverlayManager,
    selection: Selection,
    history: SelectionHistory,
    filter: ResourceFilter,
    options: ProcessingOptions,
}

/// Resource graph engine of one open project
pub struct Engine {
    state: EngineState,
    registry: KindRegistry,
    fs: Box<dyn FileSystem>,
    cluster: Option<Arc<dyn ClusterClient>>,
}

impl Engine {
    /// Engine over an already loaded store
    #[must_use]
    pub fn new(store: ProjectStore, registry: KindRegistry, fs: Box<dyn FileSystem>, config: &Config) -> Self {
        Self {
            state: EngineState {
                store,
                overlay: OverlayManager::new(config.cluster_diff.hide_cluster_only_resources),
                selection: Selection::default(),
                history: SelectionHistory::new(config.history.capacity),
                filter: ResourceFilter::default(),
                options: config.processing,
            },
            registry,
            fs,
            cluster: None,
        }
    }

    /// Scan a project folder with the built-in kinds
    pub fn open(root: impl Into<PathBuf>, config: &Config, fs: Box<dyn FileSystem>) -> Result<(Self, Vec<Diagnostic>)> {
        Self::open_with_registry(root, config, fs, KindRegistry::builtin())
    }

    /// Scan a project folder with a custom kind registry
    pub fn open_with_registry(
        root: impl Into<PathBuf>,
        config: &Config,
        fs: Box<dyn FileSystem>,
        registry: KindRegistry,
    ) -> Result<(Self, Vec<Diagnostic>)> {
        let ctx = StoreContext {
            fs: fs.as_ref(),
            registry: &registry,
            options: config.processing,
        };
        let (store, diagnostics) = ProjectStore::open(root, &config.scan, &ctx)?;
        Ok((Self::new(store, registry, fs, config), diagnostics))
    }

    /// Attach a cluster client
    #[must_use]
    pub fn with_cluster_client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(client);
        self
    }

    /// Cluster client, if any
    #[must_use]
    pub fn cluster_client(&self) -> Option<Arc<dyn ClusterClient>> {
        self.cluster.clone()
    }

    /// Kind registry
    #[must_use]
    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Apply one command; on error the state is exactly as before
    pub fn dispatch(&mut self, command: Command) -> Result<Outcome> {
        let name = command.name();
        debug!("Dispatching {name}");
        let snapshot = self.state.clone();
        match self.apply(command) {
            Ok(outcome) => {
                self.refresh_derived();
                Ok(outcome)
            }
            Err(err) => {
                warn!("{name} failed, state restored: {err}");
                self.state = snapshot;
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn apply(&mut self, command: Command) -> Result<Outcome> {
        let state = &mut self.state;
        let registry = &self.registry;
        let cluster = self.cluster.as_deref();
        let ctx = StoreContext {
            fs: self.fs.as_ref(),
            registry,
            options: state.options,
        };

        match command {
            Command::AddPaths(paths) => Ok(for_each_path(state, &paths, |store, path| store.add_path(path, &ctx))),
            Command::FilesChanged(paths) => Ok(for_each_path(state, &paths, |store, path| {
                if store.files.get(path).is_some_and(|e| !e.is_dir()) {
                    store.reload_from_disk(path, &ctx)
                } else {
                    store.add_path(path, &ctx)
                }
            })),
            Command::PathsRemoved(paths) => Ok(for_each_path(state, &paths, |store, path| {
                if store.files.contains_key(path) {
                    store.remove_path(path, &ctx)
                } else {
                    debug!("Ignoring removal of unknown path {path}");
                    Ok(Vec::new())
                }
            })),
            Command::UpdateFileEntry { path, content } => {
                let path = state.store.relative(Path::new(&path))?;
                Ok(Outcome::with_diagnostics(state.store.update_file_entry(&path, &content, &ctx)?))
            }
            Command::UpdateResource { id, text } => {
                let view = view_of(state, &id)?;
                Ok(Outcome::with_diagnostics(
                    state.store.update_resource_content(&id, &text, view, &ctx)?,
                ))
            }
            Command::UpdateManyResources(edits) => {
                // Each edit resolves in the view its resource lives in
                let mut groups: Vec<(View, Vec<(String, String)>)> = Vec::new();
                for (id, text) in edits {
                    let view = view_of(state, &id)?;
                    match groups.iter_mut().find(|(v, _)| *v == view) {
                        Some((_, group)) => group.push((id, text)),
                        None => groups.push((view, vec![(id, text)])),
                    }
                }
                let mut diagnostics = Vec::new();
                for (view, group) in groups {
                    diagnostics.extend(state.store.update_many_resources(&group, view, &ctx)?);
                }
                Ok(Outcome::with_diagnostics(diagnostics))
            }
            Command::AddResource { text } => {
                let (id, diagnostics) = state.store.add_unsaved_resource(&text, View::Local, &ctx)?;
                Ok(Outcome {
                    diagnostics,
                    created: Some(id),
                    ..Outcome::default()
                })
            }
            Command::RemoveResource { id } => {
                remove_resource(state, cluster, registry, &id, &ctx)?;
                Ok(Outcome::default())
            }
            Command::SaveUnsavedResource { id, path } => {
                let path = state.store.relative(Path::new(&path))?;
                let (saved, diagnostics) = state.store.save_unsaved_resource(&id, &path, &ctx)?;
                if state.selection.resource_id.as_deref() == Some(id.as_str()) {
                    state.selection.resource_id = Some(saved.clone());
                }
                Ok(Outcome {
                    diagnostics,
                    created: Some(saved),
                    ..Outcome::default()
                })
            }
            Command::RenameResource {
                id,
                new_name,
                update_refs,
            } => {
                let view = view_of(state, &id)?;
                Ok(Outcome::with_diagnostics(
                    state.store.rename_resource(&id, &new_name, update_refs, view, &ctx)?,
                ))
            }
            Command::StartPreview { kind, target } => start_preview(state, cluster.is_some(), kind, target),
            Command::PreviewLoaded { generation, result } => Ok(preview_loaded(state, generation, result, &ctx)),
            Command::StopPreview => {
                let previous = state.overlay.stop_preview();
                let removed = state.store.clear_transient(PREVIEW_PREFIX);
                if previous != PreviewState::Inactive {
                    info!("Stopped preview, removed {removed} resources");
                    state.selection = Selection::default();
                    state.history.reset(None);
                }
                Ok(Outcome::default())
            }
            Command::LoadClusterDiff { context } => {
                if cluster.is_none() {
                    return Err(EngineError::Cluster("no cluster client configured".into()));
                }
                state.store.clear_transient(CLUSTER_DIFF_PREFIX);
                let generation = state.overlay.begin_cluster_diff();
                Ok(Outcome {
                    request: Some(ExternalRequest {
                        generation,
                        work: ExternalWork::FetchCluster {
                            context,
                            purpose: FetchPurpose::Diff,
                        },
                    }),
                    ..Outcome::default()
                })
            }
            Command::ClusterDiffLoaded {
                generation,
                context,
                result,
            } => Ok(cluster_diff_loaded(state, generation, &context, result, &ctx)),
            Command::CloseClusterDiff => {
                state.overlay.close_cluster_diff();
                let removed = state.store.clear_transient(CLUSTER_DIFF_PREFIX);
                info!("Closed cluster diff, removed {removed} resources");
                Ok(Outcome::default())
            }
            Command::ToggleClusterOnlyResources => {
                state.overlay.toggle_cluster_only();
                Ok(Outcome::default())
            }
            Command::SelectClusterDiffMatch(id) => {
                if state.overlay.select_match(&id) {
                    Ok(Outcome::default())
                } else {
                    Err(EngineError::UnknownResource(id))
                }
            }
            Command::UnselectClusterDiffMatch(id) => {
                state.overlay.unselect_match(&id);
                Ok(Outcome::default())
            }
            Command::SelectAllClusterDiffMatches => {
                state.overlay.select_matches();
                Ok(Outcome::default())
            }
            Command::UnselectAllClusterDiffMatches => {
                state.overlay.clear_matches();
                Ok(Outcome::default())
            }
            Command::SelectResource { id, virtual_selection } => {
                select_resource(state, &id)?;
                if !virtual_selection {
                    state.history.push(SelectionEntry::Resource(id));
                }
                Ok(Outcome::default())
            }
            Command::SelectFile { path, virtual_selection } => {
                let path = normalize_path(&path);
                select_path(state, &path)?;
                if !virtual_selection {
                    state.history.push(SelectionEntry::Path(path));
                }
                Ok(Outcome::default())
            }
            Command::ClearSelection => {
                state.selection = Selection::default();
                Ok(Outcome::default())
            }
            Command::NavigateHistory(direction) => {
                navigate(state, direction);
                Ok(Outcome::default())
            }
            Command::SetIgnoreOptionalUnsatisfiedRefs(ignore) => {
                state.options.ignore_optional_unsatisfied_refs = ignore;
                let ctx = StoreContext {
                    options: state.options,
                    ..ctx
                };
                let kinds = registry.kinds_with_optional_refs();
                let mut diagnostics = Vec::new();
                for view in [View::Local, View::Preview, View::ClusterDiff] {
                    diagnostics.extend(state.store.reprocess_kinds(kinds.clone(), view, &ctx));
                }
                info!("ignore_optional_unsatisfied_refs = {ignore}");
                Ok(Outcome::with_diagnostics(diagnostics))
            }
            Command::ReprocessAll => {
                let mut diagnostics = Vec::new();
                for view in [View::Local, View::Preview, View::ClusterDiff] {
                    diagnostics.extend(state.store.reprocess_all(view, &ctx));
                }
                Ok(Outcome::with_diagnostics(diagnostics))
            }
            Command::SetResourceFilter(filter) => {
                state.filter = filter;
                Ok(Outcome::default())
            }
            Command::ExtendResourceFilter(filter) => {
                state.filter.extend(filter);
                Ok(Outcome::default())
            }
            Command::ResetResourceFilter => {
                state.filter = ResourceFilter::default();
                Ok(Outcome::default())
            }
        }
    }

    /// Drop selection and history entries that point at vanished targets and refresh diff matches
    fn refresh_derived(&mut self) {
        let state = &mut self.state;
        let store = &state.store;
        if let Some(id) = &state.selection.resource_id {
            if !store.resources.contains_key(id) {
                state.selection = Selection::default();
            }
        }
        if let Some(path) = &state.selection.path {
            if !store.files.contains_key(path) {
                state.selection = Selection::default();
            }
        }
        state
            .selection
            .highlighted
            .retain(|id| store.resources.contains_key(id));
        state.history.retain(|entry| match entry {
            SelectionEntry::Resource(id) => store.resources.contains_key(id),
            SelectionEntry::Path(path) => store.files.contains_key(path),
        });

        if state.overlay.cluster_diff().status == ClusterDiffStatus::Loaded {
            let view = state.overlay.view();
            let matches = compute_matches(
                store.resources.values().filter(|r| view.contains(r)),
                store.resources.values().filter(|r| r.is_cluster_diff()),
                &self.registry,
            );
            state.overlay.refresh_matches(matches);
        }
    }

    // =========================================================================
    // Read projections
    // =========================================================================

    /// View the active resources are read through
    #[must_use]
    pub fn active_view(&self) -> View {
        self.state.overlay.view()
    }

    /// Resources visible in the current overlay state
    pub fn active_resources(&self) -> impl Iterator<Item = &Resource> {
        let view = self.active_view();
        self.state.store.resources.values().filter(move |r| view.contains(r))
    }

    /// Local resources, regardless of overlays
    pub fn local_resources(&self) -> impl Iterator<Item = &Resource> {
        self.state.store.resources.values().filter(|r| r.is_local())
    }

    /// Every resource in the map, overlays included
    pub fn all_resources(&self) -> impl Iterator<Item = &Resource> {
        self.state.store.resources.values()
    }

    /// Active resources passing the resource filter
    #[must_use]
    pub fn filtered_resources(&self) -> Vec<&Resource> {
        self.active_resources()
            .filter(|r| self.state.filter.matches(r))
            .collect()
    }

    /// File tree
    #[must_use]
    pub fn file_tree(&self) -> &FileMap {
        &self.state.store.files
    }

    /// Project root
    #[must_use]
    pub fn root(&self) -> &Path {
        self.state.store.root()
    }

    /// One resource
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.state.store.resources.get(id)
    }

    /// Dangling required references among the active resources
    #[must_use]
    pub fn validation_issues(&self) -> Vec<ValidationIssue> {
        validation_issues(&self.state.store.resources, self.active_view())
    }

    /// Reference graph of the active resources
    #[must_use]
    pub fn graph(&self) -> ReferenceGraph {
        ReferenceGraph::from_resources(self.active_resources())
    }

    /// Preview state
    #[must_use]
    pub fn preview(&self) -> &PreviewState {
        self.state.overlay.preview()
    }

    /// Cluster diff state
    #[must_use]
    pub fn cluster_diff(&self) -> &ClusterDiffState {
        self.state.overlay.cluster_diff()
    }

    /// Cluster diff match records after the cluster-only filter
    #[must_use]
    pub fn cluster_diff_matches(&self) -> Vec<&ClusterMatch> {
        self.state.overlay.visible_matches().collect()
    }

    /// Current selection
    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.state.selection
    }

    /// Selection history
    #[must_use]
    pub fn history(&self) -> &SelectionHistory {
        &self.state.history
    }

    /// Resource filter
    #[must_use]
    pub fn filter(&self) -> &ResourceFilter {
        &self.state.filter
    }

    /// Processing options
    #[must_use]
    pub fn options(&self) -> ProcessingOptions {
        self.state.options
    }
}

// =============================================================================
// Command handlers
// =============================================================================

fn for_each_path(
    state: &mut EngineState,
    paths: &[String],
    mut op: impl FnMut(&mut ProjectStore, &str) -> Result<Vec<Diagnostic>>,
) -> Outcome {
    let mut outcome = Outcome::default();
    for raw in paths {
        let path = match state.store.relative(Path::new(raw)) {
            Ok(path) => path,
            Err(err) => {
                outcome.diagnostics.push(Diagnostic::file_warning(raw, err.to_string()));
                continue;
            }
        };
        let snapshot = state.store.clone();
        match op(&mut state.store, &path) {
            Ok(diagnostics) => outcome.diagnostics.extend(diagnostics),
            Err(err) => {
                error!("{path}: {err}");
                state.store = snapshot;
                outcome.diagnostics.push(Diagnostic {
                    file_path: Some(path),
                    ..Diagnostic::error(err.to_string())
                });
            }
        }
    }
    outcome
}

fn view_of(state: &EngineState, id: &str) -> Result<View> {
    let resource = state
        .store
        .resources
        .get(id)
        .ok_or_else(|| EngineError::UnknownResource(id.to_string()))?;
    Ok(if resource.is_preview() {
        View::Preview
    } else if resource.is_cluster_diff() {
        View::ClusterDiff
    } else {
        View::Local
    })
}

fn remove_resource(
    state: &mut EngineState,
    cluster: Option<&dyn ClusterClient>,
    registry: &KindRegistry,
    id: &str,
    ctx: &StoreContext<'_>,
) -> Result<()> {
    let resource = state
        .store
        .resources
        .get(id)
        .ok_or_else(|| EngineError::UnknownResource(id.to_string()))?;

    let remote_context = if resource.is_cluster_diff() {
        resource.file_path.strip_prefix(CLUSTER_DIFF_PREFIX).map(str::to_string)
    } else {
        match state.overlay.active_preview() {
            Some(ticket) if resource.is_preview() && ticket.kind == PreviewKind::Cluster => Some(ticket.target.clone()),
            _ => None,
        }
    };

    if let Some(context) = remote_context {
        let client = cluster.ok_or_else(|| EngineError::Cluster("no cluster client configured".into()))?;
        let handler = registry
            .get(&resource.kind)
            .ok_or_else(|| EngineError::Cluster(format!("unknown kind {}", resource.kind)))?;
        if let Err(err) = client.delete_resource(&context, resource, handler.as_ref()) {
            error!("Failed to delete {} {} from {context}: {err}", resource.kind, resource.name);
            return Err(err);
        }
    }

    state.store.remove_resource(id, ctx)?;
    if state.selection.resource_id.as_deref() == Some(id) {
        state.selection = Selection::default();
    }
    Ok(())
}

fn start_preview(state: &mut EngineState, has_cluster: bool, kind: PreviewKind, target: String) -> Result<Outcome> {
    let unknown = || EngineError::UnknownPreviewTarget {
        kind,
        target: target.clone(),
    };
    let work = match kind {
        PreviewKind::Kustomization => {
            let resource = state
                .store
                .resources
                .get(&target)
                .filter(|r| r.kind == "Kustomization" && r.is_file_backed())
                .ok_or_else(unknown)?;
            ExternalWork::RenderKustomization {
                dir: state.store.absolute(parent_dir(&resource.file_path)),
            }
        }
        PreviewKind::Helm => {
            let values = normalize_path(&target);
            if !state.store.files.get(&values).is_some_and(|e| !e.is_dir()) {
                return Err(unknown());
            }
            let chart = chart_dir_of(&state.store.files, &values).ok_or_else(unknown)?;
            ExternalWork::RenderHelm {
                chart_dir: state.store.absolute(&chart),
                values_file: state.store.absolute(&values),
            }
        }
        PreviewKind::Cluster => {
            if !has_cluster {
                return Err(unknown());
            }
            ExternalWork::FetchCluster {
                context: target.clone(),
                purpose: FetchPurpose::Preview,
            }
        }
    };

    state.store.clear_transient(PREVIEW_PREFIX);
    let ticket = state.overlay.start_preview(kind, target);
    Ok(Outcome {
        request: Some(ExternalRequest {
            generation: ticket.generation,
            work,
        }),
        ..Outcome::default()
    })
}

/// Closest directory at or above the values file that holds a `Chart.yaml`
fn chart_dir_of(files: &FileMap, values: &str) -> Option<String> {
    let mut dir = parent_key(values);
    loop {
        let has_chart = files
            .get(&dir)
            .and_then(|e| e.children.as_ref())
            .is_some_and(|c| c.iter().any(|n| n == "Chart.yaml"));
        if has_chart {
            return Some(if dir == ROOT_FILE_ENTRY { String::new() } else { dir });
        }
        if dir == ROOT_FILE_ENTRY {
            return None;
        }
        dir = parent_key(&dir);
    }
}

fn preview_loaded(
    state: &mut EngineState,
    generation: u64,
    result: std::result::Result<String, String>,
    ctx: &StoreContext<'_>,
) -> Outcome {
    if !state.overlay.is_current_preview(generation) {
        debug!(generation, "Discarding stale preview result");
        return Outcome::default();
    }
    let text = match result {
        Ok(text) => text,
        Err(message) => {
            if let Some(ticket) = state.overlay.fail_preview(generation) {
                error!("{} preview of {} failed: {message}", ticket.kind, ticket.target);
            }
            state.store.clear_transient(PREVIEW_PREFIX);
            return Outcome::with_diagnostics(vec![Diagnostic::error(message)]);
        }
    };
    let Some(ticket) = state.overlay.complete_preview(generation) else {
        return Outcome::default();
    };

    let file_path = format!("{PREVIEW_PREFIX}{}", ticket.target);
    let (resources, failures) = extract_resources(&text, &file_path);
    let mut diagnostics: Vec<Diagnostic> = failures
        .into_iter()
        .map(|f| Diagnostic::file_warning(&file_path, format!("document {}: {}", f.index, f.message)))
        .collect();
    info!("Installing {} preview resources for {}", resources.len(), ticket.target);
    diagnostics.extend(state.store.install_overlay(PREVIEW_PREFIX, View::Preview, resources, ctx));

    let anchor = match ticket.kind {
        PreviewKind::Kustomization => Some(SelectionEntry::Resource(ticket.target.clone())),
        PreviewKind::Helm => Some(SelectionEntry::Path(normalize_path(&ticket.target))),
        PreviewKind::Cluster => None,
    };
    state.selection = Selection::default();
    match &anchor {
        Some(SelectionEntry::Resource(id)) => state.selection.resource_id = Some(id.clone()),
        Some(SelectionEntry::Path(path)) => state.selection.path = Some(path.clone()),
        None => {}
    }
    state.history.reset(anchor);
    Outcome::with_diagnostics(diagnostics)
}

fn cluster_diff_loaded(
    state: &mut EngineState,
    generation: u64,
    context: &str,
    result: std::result::Result<String, String>,
    ctx: &StoreContext<'_>,
) -> Outcome {
    if !state.overlay.is_current_cluster_diff(generation) {
        debug!(generation, "Discarding stale cluster diff");
        return Outcome::default();
    }
    let text = match result {
        Ok(text) => text,
        Err(message) => {
            error!("Cluster diff against {context} failed: {message}");
            state.overlay.fail_cluster_diff(generation, message.clone());
            return Outcome::with_diagnostics(vec![Diagnostic::error(message)]);
        }
    };

    let file_path = format!("{CLUSTER_DIFF_PREFIX}{context}");
    let (mut resources, failures) = extract_resources(&text, &file_path);
    for resource in &mut resources {
        resource.id = format!("{CLUSTER_DIFF_PREFIX}{}", resource.id);
    }
    let mut diagnostics: Vec<Diagnostic> = failures
        .into_iter()
        .map(|f| Diagnostic::file_warning(&file_path, format!("document {}: {}", f.index, f.message)))
        .collect();
    diagnostics.extend(state.store.install_overlay(CLUSTER_DIFF_PREFIX, View::ClusterDiff, resources, ctx));

    let view = state.overlay.view();
    let resources = &state.store.resources;
    let matches = compute_matches(
        resources.values().filter(|r| view.contains(r)),
        resources.values().filter(|r| r.is_cluster_diff()),
        ctx.registry,
    );
    state.overlay.complete_cluster_diff(generation, matches);
    Outcome::with_diagnostics(diagnostics)
}

fn select_resource(state: &mut EngineState, id: &str) -> Result<()> {
    let resource = state
        .store
        .resources
        .get(id)
        .ok_or_else(|| EngineError::UnknownResource(id.to_string()))?;
    state.selection = Selection {
        resource_id: Some(id.to_string()),
        path: None,
        highlighted: resource.refs.iter().filter_map(|r| r.target_id.clone()).collect(),
    };
    Ok(())
}

fn select_path(state: &mut EngineState, path: &str) -> Result<()> {
    if !state.store.files.contains_key(path) {
        return Err(EngineError::UnknownPath(path.to_string()));
    }
    let prefix = format!("{path}/");
    state.selection = Selection {
        resource_id: None,
        path: Some(path.to_string()),
        highlighted: state
            .store
            .resources
            .values()
            .filter(|r| r.file_path == path || r.file_path.starts_with(&prefix))
            .map(|r| r.id.clone())
            .collect(),
    };
    Ok(())
}

/// Move through history, skipping entries whose target has vanished
fn navigate(state: &mut EngineState, direction: Direction) {
    while let Some(entry) = state.history.navigate(direction).cloned() {
        let restored = match &entry {
            SelectionEntry::Resource(id) => select_resource(state, id),
            SelectionEntry::Path(path) => select_path(state, path),
        };
        if restored.is_ok() {
            return;
        }
        debug!("Skipping vanished history entry {entry:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFs;
    use std::fs;
    use tempfile::TempDir;

    fn open(temp: &TempDir) -> Engine {
        Engine::open(temp.path(), &Config::default(), Box::new(LocalFs))
            .unwrap()
            .0
    }

    #[test]
    fn test_unknown_preview_target_changes_nothing() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("cm.yaml"), "kind: ConfigMap\nmetadata:\n  name: cfg\n").unwrap();
        let mut engine = open(&temp);
        let generation = engine.state.overlay.generation();

        let err = engine
            .dispatch(Command::StartPreview {
                kind: PreviewKind::Kustomization,
                target: "res:nope".into(),
            })
            .unwrap_err();

        assert!(matches!(err, EngineError::UnknownPreviewTarget { .. }));
        assert_eq!(engine.preview(), &PreviewState::Inactive);
        assert_eq!(engine.state.overlay.generation(), generation);
    }

    #[test]
    fn test_helm_target_needs_chart() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("chart/env")).unwrap();
        fs::write(temp.path().join("chart/Chart.yaml"), "name: demo\n").unwrap();
        fs::write(temp.path().join("chart/env/values.yaml"), "replicas: 1\n").unwrap();
        fs::write(temp.path().join("values.yaml"), "replicas: 1\n").unwrap();
        let mut engine = open(&temp);

        let outcome = engine
            .dispatch(Command::StartPreview {
                kind: PreviewKind::Helm,
                target: "chart/env/values.yaml".into(),
            })
            .unwrap();
        let Some(ExternalRequest {
            work: ExternalWork::RenderHelm { chart_dir, .. },
            ..
        }) = outcome.request
        else {
            panic!("expected a helm render request");
        };
        assert_eq!(chart_dir, temp.path().join("chart"));

        assert!(engine
            .dispatch(Command::StartPreview {
                kind: PreviewKind::Helm,
                target: "values.yaml".into(),
            })
            .is_err());
    }

    #[test]
    fn test_preview_failure_is_reported_not_raised() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("kustomization.yaml"),
            "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources: []\n",
        )
        .unwrap();
        let mut engine = open(&temp);
        let id = engine.all_resources().next().unwrap().id.clone();

        let request = engine
            .dispatch(Command::StartPreview {
                kind: PreviewKind::Kustomization,
                target: id,
            })
            .unwrap()
            .request
            .unwrap();
        let outcome = engine
            .dispatch(Command::PreviewLoaded {
                generation: request.generation,
                result: Err("kustomize exploded".into()),
            })
            .unwrap();

        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(engine.preview(), &PreviewState::Inactive);
    }

    #[test]
    fn test_history_back_restores_file_selection() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.yaml"), "kind: ConfigMap\nmetadata:\n  name: a\n").unwrap();
        fs::write(temp.path().join("b.yaml"), "kind: ConfigMap\nmetadata:\n  name: b\n").unwrap();
        let mut engine = open(&temp);
        let ids: Vec<String> = engine.all_resources().map(|r| r.id.clone()).collect();

        for path in ["a.yaml", "b.yaml"] {
            engine
                .dispatch(Command::SelectFile {
                    path: path.into(),
                    virtual_selection: false,
                })
                .unwrap();
        }
        engine
            .dispatch(Command::SelectResource {
                id: ids[0].clone(),
                virtual_selection: true,
            })
            .unwrap();
        assert_eq!(engine.history().len(), 2);

        engine.dispatch(Command::NavigateHistory(Direction::Back)).unwrap();
        assert_eq!(engine.selection().path.as_deref(), Some("a.yaml"));
        assert_eq!(engine.selection().highlighted.len(), 1);
        fs::remove_file(temp.path().join("a.yaml")).unwrap();
        engine.dispatch(Command::PathsRemoved(vec!["a.yaml".into()])).unwrap();
        assert_eq!(engine.history().len(), 1);
        assert!(engine.selection().path.is_none());
    }
}
