// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Kubeyard library - resource graph engine for folders of Kubernetes manifests
//!
//! This crate ingests a project folder of YAML files, parses them into
//! Kubernetes resources, tracks the references between them, and layers
//! preview and cluster-diff resource sets over the local set.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cluster;
pub mod codec;
/// CLI subcommands used by the `kubeyard` binary
#[doc(hidden)]
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod fs;
pub mod graph;
pub mod history;
pub mod kinds;
pub mod overlay;
pub mod render;
pub mod resolver;
pub mod runtime;
pub mod scanner;
pub mod store;

/// Core data types shared by every engine component
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use sha2::{Digest, Sha256};
    use std::collections::BTreeMap;
    use std::fmt;

    // =========================================================================
    // Path prefixes
    // =========================================================================

    /// Key of the synthetic file entry representing the project root
    pub const ROOT_FILE_ENTRY: &str = "<root>";

    /// File path prefix of resources rendered by a preview
    pub const PREVIEW_PREFIX: &str = "**PREVIEW**";

    /// File path (and id) prefix of resources loaded for a cluster diff
    pub const CLUSTER_DIFF_PREFIX: &str = "**CLUSTER_DIFF**";

    /// File path prefix of resources that have not been saved to disk yet
    pub const UNSAVED_PREFIX: &str = "**UNSAVED**";

    /// Namespace assumed for namespaced objects that omit one
    pub const DEFAULT_NAMESPACE: &str = "default";

    /// Whether a resource file path marks a resource with no backing file
    #[must_use]
    pub fn is_transient_path(path: &str) -> bool {
        path.starts_with(PREVIEW_PREFIX)
            || path.starts_with(CLUSTER_DIFF_PREFIX)
            || path.starts_with(UNSAVED_PREFIX)
    }

    // =========================================================================
    // File Entries
    // =========================================================================

    /// One file-system path under the project root
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FileEntry {
        /// Path relative to the project root, `/`-separated
        pub file_path: String,
        /// Last known modification time
        pub timestamp: Option<DateTime<Utc>>,
        /// Sorted child names; `Some` for directories
        pub children: Option<Vec<String>>,
        /// Whether the engine extracts resources from this file
        pub is_supported: bool,
        /// Whether the path matched an exclude pattern
        pub is_excluded: bool,
        /// SHA-256 of the last loaded content
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub content_hash: Option<String>,
    }

    impl FileEntry {
        /// Create a file entry
        #[must_use]
        pub fn file(file_path: impl Into<String>) -> Self {
            Self {
                file_path: file_path.into(),
                timestamp: None,
                children: None,
                is_supported: false,
                is_excluded: false,
                content_hash: None,
            }
        }

        /// Create a directory entry with no children yet
        #[must_use]
        pub fn directory(file_path: impl Into<String>) -> Self {
            Self {
                children: Some(Vec::new()),
                ..Self::file(file_path)
            }
        }

        /// Is this entry a directory?
        #[must_use]
        pub fn is_dir(&self) -> bool {
            self.children.is_some()
        }
    }

    /// Hash file content for change detection
    #[must_use]
    pub fn content_hash(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Byte range of a document inside its owning file
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TextRange {
        /// Offset of the first byte
        pub start: usize,
        /// Length in bytes
        pub length: usize,
    }

    impl TextRange {
        /// Offset one past the last byte
        #[must_use]
        pub fn end(&self) -> usize {
            self.start + self.length
        }
    }

    /// Which side of an edge a reference describes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RefDirection {
        /// Held by the resource whose content names the target
        Outgoing,
        /// Held by the target, pointing back at the source
        Incoming,
    }

    /// Resolution status of a reference
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum RefStatus {
        /// The target was found
        Satisfied,
        /// No target found and the rule requires one
        UnsatisfiedRequired,
        /// No target found and the rule allows that
        UnsatisfiedOptional,
    }

    /// One step in a path through parsed YAML content
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum PathSegment {
        /// Mapping key
        Key(String),
        /// Sequence index
        Index(usize),
    }

    impl fmt::Display for PathSegment {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Key(k) => write!(f, "{k}"),
                Self::Index(i) => write!(f, "[{i}]"),
            }
        }
    }

    /// Render a field path as `spec.containers[0].name`
    #[must_use]
    pub fn format_field_path(path: &[PathSegment]) -> String {
        let mut out = String::new();
        for segment in path {
            if matches!(segment, PathSegment::Key(_)) && !out.is_empty() {
                out.push('.');
            }
            out.push_str(&segment.to_string());
        }
        out
    }

    /// A directed reference between two resources, stored on both ends
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ResourceRef {
        /// Outgoing (on the source) or incoming (on the target)
        pub direction: RefDirection,
        /// Resolution status
        pub status: RefStatus,
        /// Name of the rule that produced the reference, e.g. `configMapRef`
        pub ref_type: String,
        /// Kind of the referenced resource
        pub target_kind: String,
        /// Referenced name, selector text or file path
        pub name: String,
        /// The resource on the other end, when there is one
        pub target_id: Option<String>,
        /// Whether the rule marks the reference as optional
        pub optional: bool,
        /// Whether the value is a plain name (rename rewrites these)
        #[serde(default)]
        pub by_name: bool,
        /// Location of the value inside the source resource's content
        pub field_path: Vec<PathSegment>,
    }

    impl ResourceRef {
        /// Is the reference resolved to a resource?
        #[must_use]
        pub fn is_satisfied(&self) -> bool {
            self.status == RefStatus::Satisfied
        }

        /// Is this an unresolved reference?
        #[must_use]
        pub fn is_unsatisfied(&self) -> bool {
            !self.is_satisfied()
        }
    }

    /// One parsed Kubernetes object tracked by the engine
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Resource {
        /// Derived identifier, unique within the active map
        pub id: String,
        /// Object kind
        pub kind: String,
        /// Object apiVersion
        pub api_version: String,
        /// `metadata.name`, or the file name when absent
        pub name: String,
        /// `metadata.namespace`
        pub namespace: Option<String>,
        /// Owning file, or a transient prefixed path
        pub file_path: String,
        /// Raw text of the document
        pub text: String,
        /// Parsed content
        pub content: serde_yaml::Value,
        /// Byte range of the document in its owning file
        pub range: Option<TextRange>,
        /// Outgoing and incoming references
        #[serde(default)]
        pub refs: Vec<ResourceRef>,
    }

    impl Resource {
        /// Generate a deterministic id from the resource's location and identity
        #[must_use]
        pub fn generate_id(
            file_path: &str,
            index: usize,
            kind: &str,
            name: &str,
            namespace: Option<&str>,
        ) -> String {
            let mut hasher = Sha256::new();
            hasher.update(file_path.as_bytes());
            hasher.update(index.to_le_bytes());
            hasher.update(kind.as_bytes());
            hasher.update(name.as_bytes());
            if let Some(ns) = namespace {
                hasher.update(ns.as_bytes());
            }
            let hash = hex::encode(hasher.finalize());
            format!("res:{}", &hash[..16])
        }

        /// Rendered by a preview
        #[must_use]
        pub fn is_preview(&self) -> bool {
            self.file_path.starts_with(PREVIEW_PREFIX)
        }

        /// Loaded for a cluster diff
        #[must_use]
        pub fn is_cluster_diff(&self) -> bool {
            self.file_path.starts_with(CLUSTER_DIFF_PREFIX)
        }

        /// Created but never saved
        #[must_use]
        pub fn is_unsaved(&self) -> bool {
            self.file_path.starts_with(UNSAVED_PREFIX)
        }

        /// Backed by a file under the project root
        #[must_use]
        pub fn is_file_backed(&self) -> bool {
            !is_transient_path(&self.file_path)
        }

        /// Belongs to the local (non-preview, non-cluster-diff) set
        #[must_use]
        pub fn is_local(&self) -> bool {
            !self.is_preview() && !self.is_cluster_diff()
        }

        /// Outgoing references
        pub fn outgoing_refs(&self) -> impl Iterator<Item = &ResourceRef> {
            self.refs
                .iter()
                .filter(|r| r.direction == RefDirection::Outgoing)
        }

        /// Incoming references
        pub fn incoming_refs(&self) -> impl Iterator<Item = &ResourceRef> {
            self.refs
                .iter()
                .filter(|r| r.direction == RefDirection::Incoming)
        }

        /// Labels found at the given path, stringified
        #[must_use]
        pub fn labels_at(&self, path: &[&str]) -> BTreeMap<String, String> {
            let mut node = &self.content;
            for key in path {
                match node.get(*key) {
                    Some(next) => node = next,
                    None => return BTreeMap::new(),
                }
            }
            crate::codec::string_map(node).unwrap_or_default()
        }
    }

    /// Resources keyed by id
    pub type ResourceMap = BTreeMap<String, Resource>;

    /// File entries keyed by relative path
    pub type FileMap = BTreeMap<String, FileEntry>;

    // =========================================================================
    // Overlay and options
    // =========================================================================

    /// Kind of preview overlay
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum PreviewKind {
        /// Output of `kustomize build` for a Kustomization
        Kustomization,
        /// Output of `helm template` for a values file
        Helm,
        /// Live objects of a cluster context
        Cluster,
    }

    impl fmt::Display for PreviewKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Self::Kustomization => "kustomization",
                Self::Helm => "helm",
                Self::Cluster => "cluster",
            })
        }
    }

    /// Options that change how references are processed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ProcessingOptions {
        /// Drop unsatisfied optional references instead of recording them
        pub ignore_optional_unsatisfied_refs: bool,
    }

    impl Default for ProcessingOptions {
        fn default() -> Self {
            Self {
                ignore_optional_unsatisfied_refs: true,
            }
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Severity of a diagnostic
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DiagnosticLevel {
        /// Informational
        Info,
        /// Something was skipped
        Warning,
        /// An operation did not complete
        Error,
    }

    /// A problem reported by an engine operation without aborting it
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Diagnostic {
        /// Severity
        pub level: DiagnosticLevel,
        /// Message
        pub message: String,
        /// File the problem belongs to
        pub file_path: Option<String>,
        /// Resource the problem belongs to
        pub resource_id: Option<String>,
    }

    impl Diagnostic {
        /// Warning about a file
        #[must_use]
        pub fn file_warning(file_path: &str, message: impl Into<String>) -> Self {
            Self {
                level: DiagnosticLevel::Warning,
                message: message.into(),
                file_path: Some(file_path.to_string()),
                resource_id: None,
            }
        }

        /// Warning about a resource
        #[must_use]
        pub fn resource_warning(resource_id: &str, message: impl Into<String>) -> Self {
            Self {
                level: DiagnosticLevel::Warning,
                message: message.into(),
                file_path: None,
                resource_id: Some(resource_id.to_string()),
            }
        }

        /// Error not tied to a file or resource
        #[must_use]
        pub fn error(message: impl Into<String>) -> Self {
            Self {
                level: DiagnosticLevel::Error,
                message: message.into(),
                file_path: None,
                resource_id: None,
            }
        }
    }
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{Command, Engine, Outcome};
    pub use crate::error::{EngineError, Result};
    pub use crate::types::*;
}
