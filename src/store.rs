// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! File and resource graph store
//!
//! [`ProjectStore`] owns two parallel maps: file entries keyed by relative
//! path and resources keyed by id. Every mutation keeps them consistent and
//! re-runs the resolver on the smallest set of resources whose references
//! may have changed.

use crate::codec::{
    append_document, extract_resources, normalize_document_text, parse_single, removal_span,
    replace_range, resource_from_content, serialize, set_at_path,
};
use crate::error::{EngineError, Result};
use crate::fs::{absolute, FileSystem};
use crate::kinds::KindRegistry;
use crate::resolver::{self, affected_resources, mark_refs_unsatisfied_on_delete, ResolveScope, View};
use crate::scanner::{relative_key, scan_project, PathMatcher, ScanConfig};
use crate::types::{
    content_hash, Diagnostic, FileEntry, FileMap, ProcessingOptions, Resource,
    ResourceMap, TextRange, ROOT_FILE_ENTRY, UNSAVED_PREFIX,
};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Collaborators and options a store operation runs with
#[derive(Clone, Copy)]
pub struct StoreContext<'a> {
    /// Disk access
    pub fs: &'a dyn FileSystem,
    /// Kind handlers
    pub registry: &'a KindRegistry,
    /// Reference processing options
    pub options: ProcessingOptions,
}

/// File map and resource map of one open project
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
    /// File entries by relative path, plus the root entry
    pub files: FileMap,
    /// Every resource: local, unsaved, preview and cluster diff
    pub resources: ResourceMap,
    matcher: PathMatcher,
    unsaved_seq: u64,
}

/// Accumulates what a batch of mutations needs re-resolved
#[derive(Debug, Default)]
struct Affected {
    ids: BTreeSet<String>,
    kinds: BTreeSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl Affected {
    fn scope(&self) -> ResolveScope {
        ResolveScope::Partial {
            resource_ids: self.ids.clone(),
            kinds: self.kinds.clone(),
        }
    }

    fn target_kind(&mut self, registry: &KindRegistry, kind: &str) {
        self.kinds.extend(registry.source_kinds_targeting(kind));
    }
}

/// Normalize a relative path to its `/`-separated key
#[must_use]
pub fn normalize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Key of the entry containing `path`
#[must_use]
pub fn parent_key(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..i].to_string(),
        None => ROOT_FILE_ENTRY.to_string(),
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn shifted(start: usize, old_len: usize, new_len: usize) -> usize {
    if new_len >= old_len {
        start + (new_len - old_len)
    } else {
        start.saturating_sub(old_len - new_len)
    }
}

/// A stored range must still fit the file text on disk at char boundaries
fn check_range(file_path: &str, file_text: &str, range: TextRange) -> Result<()> {
    if range.end() > file_text.len() || !file_text.is_char_boundary(range.start) || !file_text.is_char_boundary(range.end()) {
        return Err(EngineError::InvalidEdit(format!(
            "{file_path} changed on disk; reload before editing"
        )));
    }
    Ok(())
}

impl ProjectStore {
    /// Empty store rooted at `root`
    pub fn new(root: impl Into<PathBuf>, scan: &ScanConfig) -> Result<Self> {
        let root = root.into();
        let mut files = FileMap::new();
        files.insert(
            ROOT_FILE_ENTRY.to_string(),
            FileEntry::directory(root.display().to_string()),
        );
        Ok(Self {
            root,
            files,
            resources: ResourceMap::new(),
            matcher: PathMatcher::new(scan)?,
            unsaved_seq: 0,
        })
    }

    /// Scan a project folder, load every supported file and resolve all references
    pub fn open(root: impl Into<PathBuf>, scan: &ScanConfig, ctx: &StoreContext<'_>) -> Result<(Self, Vec<Diagnostic>)> {
        let mut store = Self::new(root, scan)?;
        let found = scan_project(&store.root, scan)?;
        let mut affected = Affected::default();

        for dir in &found.directories {
            store.ensure_parent(dir);
            let mut entry = FileEntry::directory(dir.clone());
            entry.is_excluded = store.matcher.is_excluded(dir);
            entry.timestamp = ctx.fs.modified(&store.absolute(dir)).ok();
            store.files.insert(dir.clone(), entry);
            store.link(dir);
        }
        for file in &found.files {
            store.insert_file(file, ctx, &mut affected);
        }

        let mut diagnostics = affected.diagnostics;
        diagnostics.extend(store.resolve(View::Local, &ResolveScope::Full, ctx));
        info!(
            "Opened {} with {} files and {} resources",
            store.root.display(),
            found.files.len(),
            store.resources.len()
        );
        Ok((store, diagnostics))
    }

    /// Absolute project root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a relative key
    #[must_use]
    pub fn absolute(&self, relative: &str) -> PathBuf {
        absolute(&self.root, relative)
    }

    /// Relative key of a path given either relative to the root or absolute under it
    pub fn relative(&self, path: &Path) -> Result<String> {
        if path.is_absolute() {
            path.strip_prefix(&self.root)
                .map(relative_key)
                .map_err(|_| EngineError::UnknownPath(path.display().to_string()))
        } else {
            Ok(normalize_path(&relative_key(path)))
        }
    }

    /// Resources owned by a file
    pub fn resources_in_file<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources.values().filter(move |r| r.file_path == path)
    }

    /// Run the resolver over one view
    pub fn resolve(&mut self, view: View, scope: &ResolveScope, ctx: &StoreContext<'_>) -> Vec<Diagnostic> {
        resolver::resolve(&mut self.resources, view, ctx.registry, scope, ctx.options)
    }

    // =========================================================================
    // File tree bookkeeping
    // =========================================================================

    fn link(&mut self, path: &str) {
        let name = file_name(path).to_string();
        if let Some(children) = self
            .files
            .get_mut(&parent_key(path))
            .and_then(|p| p.children.as_mut())
        {
            if let Err(pos) = children.binary_search(&name) {
                children.insert(pos, name);
            }
        }
    }

    fn unlink(&mut self, path: &str) {
        let name = file_name(path);
        if let Some(children) = self
            .files
            .get_mut(&parent_key(path))
            .and_then(|p| p.children.as_mut())
        {
            children.retain(|c| c != name);
        }
    }

    /// Create directory entries for every missing ancestor of `path`
    fn ensure_parent(&mut self, path: &str) {
        let parent = parent_key(path);
        if parent == ROOT_FILE_ENTRY || self.files.contains_key(&parent) {
            return;
        }
        self.ensure_parent(&parent);
        let mut entry = FileEntry::directory(parent.clone());
        entry.is_excluded = self.matcher.is_excluded(&parent);
        self.files.insert(parent.clone(), entry);
        self.link(&parent);
    }

    fn insert_file(&mut self, path: &str, ctx: &StoreContext<'_>, affected: &mut Affected) {
        self.ensure_parent(path);
        let abs = self.absolute(path);
        let mut entry = FileEntry::file(path);
        entry.is_excluded = self.matcher.is_excluded(path);
        entry.is_supported = self.matcher.is_supported(path);
        entry.timestamp = ctx.fs.modified(&abs).ok();
        if entry.is_supported {
            match ctx.fs.read_to_string(&abs) {
                Ok(text) => {
                    entry.content_hash = Some(content_hash(&text));
                    self.load_text(path, &text, ctx.registry, affected);
                }
                Err(err) => {
                    warn!(file = path, "{err}");
                    affected.diagnostics.push(Diagnostic::file_warning(path, err.to_string()));
                }
            }
        }
        self.files.insert(path.to_string(), entry);
        self.link(path);
    }

    fn load_text(&mut self, path: &str, text: &str, registry: &KindRegistry, affected: &mut Affected) {
        let (resources, failures) = extract_resources(text, path);
        for failure in failures {
            warn!(file = path, index = failure.index, "{}", failure.message);
            affected.diagnostics.push(Diagnostic::file_warning(
                path,
                format!("document {}: {}", failure.index, failure.message),
            ));
        }
        for resource in resources {
            affected.ids.insert(resource.id.clone());
            affected.target_kind(registry, &resource.kind);
            self.resources.insert(resource.id.clone(), resource);
        }
    }

    fn drop_resource(&mut self, id: &str, options: ProcessingOptions) -> Option<Resource> {
        let resource = self.resources.remove(id)?;
        mark_refs_unsatisfied_on_delete(&mut self.resources, &resource, options);
        Some(resource)
    }

    // =========================================================================
    // Path operations
    // =========================================================================

    /// Add a file or directory that appeared under the root
    ///
    /// Directories are added recursively. An already known file is reloaded
    /// from disk.
    pub fn add_path(&mut self, path: &str, ctx: &StoreContext<'_>) -> Result<Vec<Diagnostic>> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(EngineError::InvalidEdit("cannot add the project root".into()));
        }
        if self.files.get(&path).is_some_and(|e| !e.is_dir()) {
            return self.reload_from_disk(&path, ctx);
        }

        info!("Adding path: {path}");
        let mut affected = Affected::default();
        self.add_path_inner(&path, ctx, &mut affected)?;
        let mut diagnostics = affected.diagnostics.split_off(0);
        diagnostics.extend(self.resolve(View::Local, &affected.scope(), ctx));
        Ok(diagnostics)
    }

    fn add_path_inner(&mut self, path: &str, ctx: &StoreContext<'_>, affected: &mut Affected) -> Result<()> {
        let abs = self.absolute(path);
        if !ctx.fs.is_dir(&abs) {
            if !self.files.contains_key(path) {
                self.insert_file(path, ctx, affected);
            }
            return Ok(());
        }
        if !self.files.contains_key(path) {
            self.ensure_parent(path);
            let mut entry = FileEntry::directory(path);
            entry.is_excluded = self.matcher.is_excluded(path);
            entry.timestamp = ctx.fs.modified(&abs).ok();
            self.files.insert(path.to_string(), entry);
            self.link(path);
        }
        for child in ctx.fs.list_dir(&abs)? {
            if child == ".git" {
                continue;
            }
            self.add_path_inner(&format!("{path}/{child}"), ctx, affected)?;
        }
        Ok(())
    }

    /// Replace a file's resources with those extracted from `content`
    ///
    /// Content identical to the last load is a no-op.
    pub fn reload_file(&mut self, path: &str, content: &str, ctx: &StoreContext<'_>) -> Result<Vec<Diagnostic>> {
        let path = normalize_path(path);
        let entry = self
            .files
            .get(&path)
            .ok_or_else(|| EngineError::UnknownPath(path.clone()))?;
        if entry.is_dir() {
            return Err(EngineError::InvalidEdit(format!("{path} is a directory")));
        }
        let hash = content_hash(content);
        if entry.content_hash.as_deref() == Some(hash.as_str()) {
            debug!("Skipping reload of unchanged {path}");
            return Ok(Vec::new());
        }
        let supported = entry.is_supported;
        let timestamp = ctx.fs.modified(&self.absolute(&path)).ok();
        if let Some(entry) = self.files.get_mut(&path) {
            entry.content_hash = Some(hash);
            entry.timestamp = timestamp.or(entry.timestamp);
        }
        if !supported {
            return Ok(Vec::new());
        }

        info!("Reloading {path}");
        let mut affected = Affected::default();
        let old: Vec<String> = self.resources_in_file(&path).map(|r| r.id.clone()).collect();
        for id in old {
            if let Some(resource) = self.drop_resource(&id, ctx.options) {
                affected.target_kind(ctx.registry, &resource.kind);
            }
        }
        self.load_text(&path, content, ctx.registry, &mut affected);
        affected.ids.extend(
            self.resources
                .values()
                .filter(|r| r.is_local() && !r.refs.is_empty())
                .map(|r| r.id.clone()),
        );

        let mut diagnostics = affected.diagnostics.split_off(0);
        diagnostics.extend(self.resolve(View::Local, &affected.scope(), ctx));
        Ok(diagnostics)
    }

    /// Reload a file from its current content on disk
    pub fn reload_from_disk(&mut self, path: &str, ctx: &StoreContext<'_>) -> Result<Vec<Diagnostic>> {
        let text = ctx.fs.read_to_string(&self.absolute(path))?;
        self.reload_file(path, &text, ctx)
    }

    /// Write new content for a file, then reload it
    pub fn update_file_entry(&mut self, path: &str, content: &str, ctx: &StoreContext<'_>) -> Result<Vec<Diagnostic>> {
        let path = normalize_path(path);
        if !self.files.get(&path).is_some_and(|e| !e.is_dir()) {
            return Err(EngineError::UnknownPath(path));
        }
        ctx.fs.write(&self.absolute(&path), content)?;
        self.reload_file(&path, content, ctx)
    }

    /// Remove a path and everything below it
    pub fn remove_path(&mut self, path: &str, ctx: &StoreContext<'_>) -> Result<Vec<Diagnostic>> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(EngineError::InvalidEdit("cannot remove the project root".into()));
        }
        if !self.files.contains_key(&path) {
            return Err(EngineError::UnknownPath(path));
        }

        info!("Removing path: {path}");
        let prefix = format!("{path}/");
        let doomed: Vec<String> = self
            .files
            .keys()
            .filter(|k| **k == path || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &doomed {
            let owned: Vec<String> = self.resources_in_file(key).map(|r| r.id.clone()).collect();
            for id in owned {
                self.drop_resource(&id, ctx.options);
            }
            self.files.remove(key);
        }
        self.unlink(&path);
        Ok(Vec::new())
    }

    // =========================================================================
    // Resource operations
    // =========================================================================

    /// Replace one resource's text and re-resolve everything it touches
    pub fn update_resource_content(&mut self, id: &str, text: &str, view: View, ctx: &StoreContext<'_>) -> Result<Vec<Diagnostic>> {
        self.update_many_resources(&[(id.to_string(), text.to_string())], view, ctx)
    }

    /// Apply several edits, resolving once at the end
    ///
    /// Edits are applied in order; a failing edit aborts the batch.
    pub fn update_many_resources(
        &mut self,
        edits: &[(String, String)],
        view: View,
        ctx: &StoreContext<'_>,
    ) -> Result<Vec<Diagnostic>> {
        let mut affected = Affected::default();
        for (id, text) in edits {
            self.apply_edit(id, text, ctx, &mut affected)?;
        }
        Ok(self.resolve(view, &affected.scope(), ctx))
    }

    fn apply_edit(&mut self, id: &str, text: &str, ctx: &StoreContext<'_>, affected: &mut Affected) -> Result<()> {
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| EngineError::UnknownResource(id.to_string()))?;
        let content = parse_single(text, &format!("edit of {id}"))?;
        let text = normalize_document_text(text);
        let updated = resource_from_content(
            content,
            text.clone(),
            &resource.file_path,
            0,
            resource.range,
        )?;

        affected.ids.extend(affected_resources(&self.resources, id));
        affected.ids.insert(id.to_string());
        affected.target_kind(ctx.registry, &resource.kind);
        affected.target_kind(ctx.registry, &updated.kind);

        let file_path = resource.file_path.clone();
        let mut new_range = resource.range;
        if let (true, Some(range)) = (resource.is_file_backed(), resource.range) {
            let abs = self.absolute(&file_path);
            let file_text = ctx.fs.read_to_string(&abs)?;
            check_range(&file_path, &file_text, range)?;
            let new_file = replace_range(&file_text, range, &text);
            ctx.fs.write(&abs, &new_file)?;
            debug!("Wrote {} bytes to {file_path}", new_file.len());

            for sibling in self.resources.values_mut() {
                if sibling.file_path != file_path || sibling.id == id {
                    continue;
                }
                if let Some(r) = sibling.range.as_mut() {
                    if r.start > range.start {
                        r.start = shifted(r.start, range.length, text.len());
                    }
                }
            }
            new_range = Some(TextRange {
                start: range.start,
                length: text.len(),
            });
            let timestamp = ctx.fs.modified(&abs).ok();
            if let Some(entry) = self.files.get_mut(&file_path) {
                entry.content_hash = Some(content_hash(&new_file));
                entry.timestamp = timestamp.or(entry.timestamp);
            }
        }

        if let Some(resource) = self.resources.get_mut(id) {
            resource.kind = updated.kind;
            resource.api_version = updated.api_version;
            resource.name = updated.name;
            resource.namespace = updated.namespace;
            resource.text = updated.text;
            resource.content = updated.content;
            resource.range = new_range;
        }
        info!("Updated resource {id}");
        Ok(())
    }

    /// Delete a resource, removing its document from its file when file-backed
    ///
    /// The file entry stays even when the file ends up empty.
    pub fn remove_resource(&mut self, id: &str, ctx: &StoreContext<'_>) -> Result<Resource> {
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| EngineError::UnknownResource(id.to_string()))?;

        if let (true, Some(range)) = (resource.is_file_backed(), resource.range) {
            let file_path = resource.file_path.clone();
            let abs = self.absolute(&file_path);
            let file_text = ctx.fs.read_to_string(&abs)?;
            check_range(&file_path, &file_text, range)?;
            let span = removal_span(&file_text, range);
            let mut new_file = file_text[..span.start].to_string();
            new_file.push_str(&file_text[span.end..]);
            ctx.fs.write(&abs, &new_file)?;

            let removed = span.end - span.start;
            for sibling in self.resources.values_mut() {
                if sibling.file_path != file_path || sibling.id == id {
                    continue;
                }
                if let Some(r) = sibling.range.as_mut() {
                    if r.start > range.start {
                        r.start -= removed;
                    }
                }
            }
            let timestamp = ctx.fs.modified(&abs).ok();
            if let Some(entry) = self.files.get_mut(&file_path) {
                entry.content_hash = Some(content_hash(&new_file));
                entry.timestamp = timestamp.or(entry.timestamp);
            }
        }

        info!("Removing resource {id}");
        self.drop_resource(id, ctx.options)
            .ok_or_else(|| EngineError::UnknownResource(id.to_string()))
    }

    /// Create a resource that has no file yet
    pub fn add_unsaved_resource(&mut self, text: &str, view: View, ctx: &StoreContext<'_>) -> Result<(String, Vec<Diagnostic>)> {
        let content = parse_single(text, "new resource")?;
        self.unsaved_seq += 1;
        let file_path = format!("{UNSAVED_PREFIX}{}", self.unsaved_seq);
        let resource = resource_from_content(content, normalize_document_text(text), &file_path, 0, None)?;
        let id = resource.id.clone();

        let mut affected = Affected::default();
        affected.ids.insert(id.clone());
        affected.target_kind(ctx.registry, &resource.kind);
        self.resources.insert(id.clone(), resource);
        info!("Added unsaved resource {id}");
        Ok((id, self.resolve(view, &affected.scope(), ctx)))
    }

    /// Write an unsaved resource to `path`, appending when the file exists
    ///
    /// Returns the id of the saved resource.
    pub fn save_unsaved_resource(&mut self, id: &str, path: &str, ctx: &StoreContext<'_>) -> Result<(String, Vec<Diagnostic>)> {
        let path = normalize_path(path);
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| EngineError::UnknownResource(id.to_string()))?;
        if !resource.is_unsaved() {
            return Err(EngineError::InvalidEdit(format!("{id} is already saved")));
        }
        if !self.matcher.is_supported(&path) {
            return Err(EngineError::InvalidEdit(format!("{path} is not a supported file")));
        }
        let doc = resource.text.clone();
        let abs = self.absolute(&path);

        let (new_text, range) = match self.files.get(&path) {
            Some(entry) if entry.is_dir() => {
                return Err(EngineError::InvalidEdit(format!("{path} is a directory")));
            }
            Some(_) => append_document(&ctx.fs.read_to_string(&abs)?, &doc),
            // Untracked files (ignored or excluded) may still exist on disk
            None if ctx.fs.is_dir(&abs) => {
                return Err(EngineError::InvalidEdit(format!("{path} is a directory")));
            }
            None => match ctx.fs.read_to_string(&abs) {
                Ok(existing) => append_document(&existing, &doc),
                Err(EngineError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    append_document("", &doc)
                }
                Err(err) => {
                    return Err(EngineError::InvalidEdit(format!("{path} exists but cannot be read: {err}")));
                }
            },
        };
        ctx.fs.write(&abs, &new_text)?;

        if !self.files.contains_key(&path) {
            self.ensure_parent(&path);
            let mut entry = FileEntry::file(path.clone());
            entry.is_supported = true;
            self.files.insert(path.clone(), entry);
            self.link(&path);
        }
        self.drop_resource(id, ctx.options);
        let mut diagnostics = self.reload_file(&path, &new_text, ctx)?;

        let saved = self
            .resources_in_file(&path)
            .find(|r| r.range == Some(range))
            .map(|r| r.id.clone())
            .ok_or_else(|| EngineError::Parse {
                context: path.clone(),
                message: "saved document could not be read back".into(),
            })?;
        diagnostics.extend(self.resolve(View::Local, &ResolveScope::ids([saved.clone()]), ctx));
        info!("Saved {id} to {path} as {saved}");
        Ok((saved, diagnostics))
    }

    /// Rename a resource and, optionally, every name reference to it
    pub fn rename_resource(
        &mut self,
        id: &str,
        new_name: &str,
        update_refs: bool,
        view: View,
        ctx: &StoreContext<'_>,
    ) -> Result<Vec<Diagnostic>> {
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| EngineError::UnknownResource(id.to_string()))?;

        let mut pending: BTreeMap<String, Value> = BTreeMap::new();
        let mut content = resource.content.clone();
        set_name(&mut content, new_name)?;
        pending.insert(id.to_string(), content);

        if update_refs {
            for r in resource.incoming_refs().filter(|r| r.is_satisfied() && r.by_name) {
                let Some(source_id) = r.target_id.as_ref() else {
                    continue;
                };
                let Some(source) = self.resources.get(source_id) else {
                    continue;
                };
                let content = pending
                    .entry(source_id.clone())
                    .or_insert_with(|| source.content.clone());
                if !set_at_path(content, &r.field_path, Value::String(new_name.to_string())) {
                    warn!(
                        source = %source_id,
                        "field {} vanished; reference left unchanged",
                        crate::types::format_field_path(&r.field_path)
                    );
                }
            }
        }

        let edits = pending
            .iter()
            .map(|(id, content)| -> Result<(String, String)> { Ok((id.clone(), serialize(content)?)) })
            .collect::<Result<Vec<_>>>()?;
        info!("Renaming {id} to {new_name} ({} documents)", edits.len());
        self.update_many_resources(&edits, view, ctx)
    }

    // =========================================================================
    // Overlays and reprocessing
    // =========================================================================

    /// Remove every resource whose file path starts with `prefix`
    pub fn clear_transient(&mut self, prefix: &str) -> usize {
        let before = self.resources.len();
        self.resources.retain(|_, r| !r.file_path.starts_with(prefix));
        for resource in self.resources.values_mut() {
            resource
                .refs
                .retain(|r| !r.target_id.as_ref().is_some_and(|t| t.starts_with(prefix)));
        }
        before - self.resources.len()
    }

    /// Replace the resources of an overlay and resolve them among themselves
    pub fn install_overlay(
        &mut self,
        prefix: &str,
        view: View,
        resources: Vec<Resource>,
        ctx: &StoreContext<'_>,
    ) -> Vec<Diagnostic> {
        self.clear_transient(prefix);
        for resource in resources {
            self.resources.insert(resource.id.clone(), resource);
        }
        self.resolve(view, &ResolveScope::Full, ctx)
    }

    /// Resolve every resource in the view
    pub fn reprocess_all(&mut self, view: View, ctx: &StoreContext<'_>) -> Vec<Diagnostic> {
        self.resolve(view, &ResolveScope::Full, ctx)
    }

    /// Resolve every resource of the given kinds
    pub fn reprocess_kinds(&mut self, kinds: BTreeSet<String>, view: View, ctx: &StoreContext<'_>) -> Vec<Diagnostic> {
        self.resolve(
            view,
            &ResolveScope::Partial {
                resource_ids: BTreeSet::new(),
                kinds,
            },
            ctx,
        )
    }
}

fn set_name(content: &mut Value, new_name: &str) -> Result<()> {
    let Some(root) = content.as_mapping_mut() else {
        return Err(EngineError::InvalidEdit("resource content is not a mapping".into()));
    };
    let metadata = root
        .entry(Value::String("metadata".into()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if metadata.is_null() {
        *metadata = Value::Mapping(Mapping::new());
    }
    let Some(metadata) = metadata.as_mapping_mut() else {
        return Err(EngineError::InvalidEdit("metadata is not a mapping".into()));
    };
    metadata.insert(Value::String("name".into()), Value::String(new_name.to_string()));
    Ok(())
}
