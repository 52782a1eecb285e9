// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Scan command - loads a project folder and lists its resources

use super::open_engine;
use crate::config::Config;
use crate::types::Resource;
use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Serialize)]
struct ResourceSummary<'a> {
    id: &'a str,
    kind: &'a str,
    name: &'a str,
    namespace: Option<&'a str>,
    file: &'a str,
    refs: usize,
}

impl<'a> From<&'a Resource> for ResourceSummary<'a> {
    fn from(r: &'a Resource) -> Self {
        Self {
            id: &r.id,
            kind: &r.kind,
            name: &r.name,
            namespace: r.namespace.as_deref(),
            file: &r.file_path,
            refs: r.outgoing_refs().count(),
        }
    }
}

/// Run the scan command
pub fn run(path: &Path, config: &Config, json: bool) -> Result<()> {
    let engine = open_engine(path, config)?;
    let resources: Vec<&Resource> = engine.local_resources().collect();
    info!("Loaded {} resources", resources.len());

    if json {
        let summaries: Vec<ResourceSummary<'_>> = resources.iter().map(|r| ResourceSummary::from(*r)).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    let files = engine.file_tree().values().filter(|e| !e.is_dir()).count();
    if resources.is_empty() {
        println!("No Kubernetes resources found in {}", path.display());
        return Ok(());
    }

    let mut by_file: BTreeMap<&str, Vec<&Resource>> = BTreeMap::new();
    for resource in &resources {
        by_file.entry(resource.file_path.as_str()).or_default().push(resource);
    }

    println!("Found {} resources in {files} files:", resources.len());
    println!();
    for (file, resources) in by_file {
        println!("  {}", file.bold());
        for r in resources {
            let ns = r.namespace.as_deref().map(|n| format!(" ({n})")).unwrap_or_default();
            println!("    {} {}{}", r.kind.cyan(), r.name, ns.dimmed());
        }
    }

    let issues = engine.validation_issues();
    if !issues.is_empty() {
        println!();
        println!("{} unsatisfied references (run `kubeyard validate` for details)", issues.len().yellow());
    }
    Ok(())
}
