// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Project scanning
//!
//! Walks a project folder with the `ignore` walker and classifies every
//! path against the supported and excluded glob sets.

use crate::error::{EngineError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Scan configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// File name globs the engine parses
    pub supported: Vec<String>,
    /// Path globs kept out of parsing
    pub exclude: Vec<String>,
    /// Skip paths ignored by `.gitignore`
    pub respect_gitignore: bool,
    /// Follow symbolic links
    pub follow_symlinks: bool,
    /// Maximum depth (0 = unlimited)
    pub max_depth: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            supported: vec!["*.yaml".into(), "*.yml".into()],
            exclude: vec!["**/node_modules/**".into(), "**/.git/**".into()],
            respect_gitignore: true,
            follow_symlinks: false,
            max_depth: 0,
        }
    }
}

fn build_set(globs: &[String]) -> Result<GlobSet> {
    globs
        .iter()
        .map(|g| Glob::new(g))
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .fold(&mut GlobSetBuilder::new(), |builder, glob| builder.add(glob))
        .build()
        .map_err(EngineError::from)
}

/// Classifies project-relative paths
#[derive(Debug, Clone)]
pub struct PathMatcher {
    supported: GlobSet,
    excluded: GlobSet,
}

impl Default for PathMatcher {
    fn default() -> Self {
        Self {
            supported: GlobSet::empty(),
            excluded: GlobSet::empty(),
        }
    }
}

impl PathMatcher {
    /// Compile the globs of a scan configuration
    pub fn new(config: &ScanConfig) -> Result<Self> {
        Ok(Self {
            supported: build_set(&config.supported)?,
            excluded: build_set(&config.exclude)?,
        })
    }

    /// Does the path match an exclude glob?
    #[must_use]
    pub fn is_excluded(&self, relative: &str) -> bool {
        self.excluded.is_match(relative)
    }

    /// Is the path a file the engine parses?
    #[must_use]
    pub fn is_supported(&self, relative: &str) -> bool {
        let name = relative.rsplit('/').next().unwrap_or(relative);
        self.supported.is_match(name) && !self.is_excluded(relative)
    }
}

/// Paths found by a scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Directories, relative and sorted
    pub directories: Vec<String>,
    /// Files, relative and sorted
    pub files: Vec<String>,
}

/// Walk a project root
pub fn scan_project(root: &Path, config: &ScanConfig) -> Result<ScanResult> {
    info!("Scanning: {}", root.display());
    if !root.is_dir() {
        return Err(EngineError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "project root is not a directory"),
        ));
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(config.respect_gitignore)
        .git_global(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .require_git(false)
        .follow_links(config.follow_symlinks)
        .filter_entry(|entry| entry.file_name() != ".git");
    if config.max_depth > 0 {
        builder.max_depth(Some(config.max_depth));
    }

    let mut result = ScanResult::default();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Failed to read entry: {err}");
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative_key(relative);
        if relative.is_empty() {
            continue;
        }
        match entry.file_type() {
            Some(t) if t.is_dir() => result.directories.push(relative),
            Some(_) => result.files.push(relative),
            None => debug!("Skipping {relative}: unknown file type"),
        }
    }

    result.directories.sort();
    result.files.sort();
    info!(
        "Found {} files in {} directories",
        result.files.len(),
        result.directories.len()
    );
    Ok(result)
}

/// `/`-separated key of a relative path
#[must_use]
pub fn relative_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
