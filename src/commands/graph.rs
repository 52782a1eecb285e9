// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Graph command - exports the reference graph

use super::open_engine;
use crate::config::Config;
use crate::graph::ReferenceGraph;
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Graphviz DOT format
    Dot,
    /// JSON format
    Json,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dot" | "graphviz" => Ok(Self::Dot),
            "json" => Ok(Self::Json),
            _ => anyhow::bail!("Unknown export format: {s}. Supported: dot, json"),
        }
    }
}

/// Run the graph command
pub fn run(path: &Path, config: &Config, format: ExportFormat, output: Option<PathBuf>, focus: Option<String>) -> Result<()> {
    info!("Exporting graph as {format:?}");
    let engine = open_engine(path, config)?;

    let graph = match &focus {
        Some(id) => {
            let graph = engine.graph();
            let keep = graph.connected(id);
            ReferenceGraph::from_resources(engine.active_resources().filter(|r| keep.contains(&r.id)))
        }
        None => engine.graph(),
    };
    if graph.is_empty() {
        eprintln!("Warning: graph is empty");
    }

    let content = match format {
        ExportFormat::Dot => graph.to_dot(),
        ExportFormat::Json => graph.to_json()?,
    };

    match output {
        Some(path) => {
            fs::write(&path, &content).with_context(|| format!("Failed to write to {}", path.display()))?;
            println!("Exported to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(content.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
