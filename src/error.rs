// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Engine error taxonomy

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Errors returned by engine operations
///
/// Every mutation that fails with one of these leaves the engine state as it
/// was before the command was dispatched.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Reading or writing a file failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Text could not be parsed as a Kubernetes object
    #[error("failed to parse {context}: {message}")]
    Parse {
        /// What was being parsed
        context: String,
        /// Parser message
        message: String,
    },

    /// Content could not be serialized
    #[error("failed to serialize resource: {0}")]
    Serialize(#[from] serde_yaml::Error),

    /// No resource with this id in the active map
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// No file entry for this path
    #[error("unknown path: {0}")]
    UnknownPath(String),

    /// A preview was requested for a target the engine does not know
    #[error("unknown {kind} preview target: {target}")]
    UnknownPreviewTarget {
        /// Preview kind
        kind: crate::types::PreviewKind,
        /// Requested target
        target: String,
    },

    /// An edit was rejected
    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    /// A reference rule could not read the resource content
    #[error("reference rule {rule} failed: {message}")]
    Rule {
        /// Rule name
        rule: String,
        /// What went wrong
        message: String,
    },

    /// Talking to the cluster failed
    #[error("cluster error: {0}")]
    Cluster(String),

    /// A preview renderer failed
    #[error("render error: {0}")]
    Render(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine service is no longer running
    #[error("engine service stopped")]
    ServiceStopped,
}

impl EngineError {
    /// Attach a path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<globset::Error> for EngineError {
    fn from(err: globset::Error) -> Self {
        Self::Config(err.to_string())
    }
}
