// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Command implementations

pub mod completions;
pub mod config;
pub mod diff;
pub mod graph;
pub mod preview;
pub mod refs;
pub mod scan;
pub mod validate;

use crate::cluster::KubeApiClient;
use crate::config::Config;
use crate::engine::Engine;
use crate::fs::LocalFs;
use crate::types::{Diagnostic, DiagnosticLevel};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Open a project folder, printing load diagnostics to stderr
pub fn open_engine(path: &Path, config: &Config) -> Result<Engine> {
    info!("Opening project: {}", path.display());
    let root = path
        .canonicalize()
        .with_context(|| format!("Project folder not found: {}", path.display()))?;
    let (engine, diagnostics) = Engine::open(&root, config, Box::new(LocalFs))
        .with_context(|| format!("Failed to open {}", root.display()))?;
    print_diagnostics(&diagnostics);
    Ok(engine.with_cluster_client(Arc::new(KubeApiClient::new(config.cluster.contexts.clone()))))
}

/// Print diagnostics to stderr
pub fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let location = diagnostic
            .file_path
            .as_deref()
            .or(diagnostic.resource_id.as_deref())
            .unwrap_or("-");
        match diagnostic.level {
            DiagnosticLevel::Error => {
                eprintln!("  {} {location}: {}", "error".red(), diagnostic.message);
            }
            DiagnosticLevel::Warning => {
                eprintln!("  {} {location}: {}", "warning".yellow(), diagnostic.message);
            }
            DiagnosticLevel::Info => {
                eprintln!("  {} {location}: {}", "info".dimmed(), diagnostic.message);
            }
        }
    }
}
