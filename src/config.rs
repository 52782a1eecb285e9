// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Configuration management
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `KUBEYARD__SECTION__KEY` environment variables.

use crate::error::{EngineError, Result};
use crate::scanner::ScanConfig;
use crate::types::ProcessingOptions;
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Project scanning
    pub scan: ScanConfig,
    /// Reference processing
    pub processing: ProcessingOptions,
    /// Selection history
    pub history: HistoryConfig,
    /// Cluster diff
    pub cluster_diff: ClusterDiffConfig,
    /// Cluster connections
    pub cluster: ClusterConfig,
    /// External renderer binaries
    pub renderers: RendererConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            scan: ScanConfig::default(),
            processing: ProcessingOptions::default(),
            history: HistoryConfig::default(),
            cluster_diff: ClusterDiffConfig::default(),
            cluster: ClusterConfig::default(),
            renderers: RendererConfig::default(),
        }
    }
}

/// Selection history settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Entries kept before the oldest is dropped
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Cluster diff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDiffConfig {
    /// Start with cluster-only match records hidden
    pub hide_cluster_only_resources: bool,
}

impl Default for ClusterDiffConfig {
    fn default() -> Self {
        Self {
            hide_cluster_only_resources: true,
        }
    }
}

/// Kubernetes API contexts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Context used when none is named
    pub default_context: Option<String>,
    /// Contexts by name
    pub contexts: BTreeMap<String, ClusterContext>,
}

/// One API server and its credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterContext {
    /// API server URL, e.g. `https://127.0.0.1:6443`
    pub server: String,
    /// Bearer token
    pub token: Option<String>,
    /// Restrict listing to one namespace
    pub namespace: Option<String>,
    /// Accept invalid TLS certificates
    pub insecure: bool,
}

/// External renderer binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// `kubectl` binary used for `kubectl kustomize`
    pub kubectl: PathBuf,
    /// `helm` binary used for `helm template`
    pub helm: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            kubectl: PathBuf::from("kubectl"),
            helm: PathBuf::from("helm"),
        }
    }
}

/// Default configuration file location
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "hyperpolymath", "kubeyard")
        .map(|d| d.config_dir().join("config.toml"))
}

fn environment() -> Environment {
    Environment::with_prefix("KUBEYARD")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn build(path: Option<&Path>, env: Environment) -> Result<Config> {
    let defaults = toml::to_string(&Config::default()).map_err(|e| EngineError::Config(e.to_string()))?;
    let mut builder = config::Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml));
    match path {
        Some(path) => builder = builder.add_source(File::from(path).format(FileFormat::Toml)),
        None => {
            if let Some(path) = default_path() {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
            }
        }
    }
    let config = builder.add_source(env).build()?.try_deserialize()?;
    Ok(config)
}

/// Load configuration from an explicit file or the default location
pub fn load(path: Option<&Path>) -> Result<Config> {
    build(path, environment())
}

impl Config {
    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> Environment {
        let source: config::Map<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        environment().source(Some(source))
    }

    #[test]
    fn test_defaults_without_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "").unwrap();

        let config = build(Some(&path), env_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.history.capacity, 100);
        assert!(config.processing.ignore_optional_unsatisfied_refs);
    }

    #[test]
    fn test_environment_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "log_level = \"debug\"\n\n[history]\ncapacity = 10\n\n[cluster.contexts.kind]\nserver = \"https://127.0.0.1:6443\"\n",
        )
        .unwrap();

        let config = build(Some(&path), env_from(&[("KUBEYARD__HISTORY__CAPACITY", "5")])).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.history.capacity, 5);
        assert_eq!(config.cluster.contexts["kind"].server, "https://127.0.0.1:6443");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp = TempDir::new().unwrap();
        let result = build(Some(&temp.path().join("absent.toml")), env_from(&[]));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_to_toml_round_trips() {
        let text = Config::default().to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
