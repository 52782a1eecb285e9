// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Refs command - shows the references of matching resources

use super::open_engine;
use crate::config::Config;
use crate::engine::Command;
use crate::filter::ResourceFilter;
use crate::types::{format_field_path, RefStatus, ResourceRef};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

fn status_label(r: &ResourceRef) -> String {
    match r.status {
        RefStatus::Satisfied => "ok".green().to_string(),
        RefStatus::UnsatisfiedRequired => "missing".red().to_string(),
        RefStatus::UnsatisfiedOptional => "missing (optional)".yellow().to_string(),
    }
}

/// Run the refs command
pub fn run(path: &Path, config: &Config, filter: ResourceFilter, json: bool) -> Result<()> {
    let mut engine = open_engine(path, config)?;
    engine
        .dispatch(Command::SetResourceFilter(filter))
        .context("Failed to apply filter")?;
    let resources = engine.filtered_resources();

    if json {
        let out: Vec<_> = resources
            .iter()
            .map(|r| serde_json::json!({ "id": r.id, "kind": r.kind, "name": r.name, "refs": r.refs }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if resources.is_empty() {
        println!("No matching resources");
        return Ok(());
    }

    for resource in resources {
        println!("{} {} [{}]", resource.kind.cyan(), resource.name.bold(), resource.file_path.dimmed());
        for r in resource.outgoing_refs() {
            println!(
                "  -> {} {} via {} at {} ({})",
                r.target_kind,
                r.name,
                r.ref_type,
                format_field_path(&r.field_path),
                status_label(r)
            );
        }
        for r in resource.incoming_refs() {
            let source = r
                .target_id
                .as_deref()
                .and_then(|id| engine.resource(id))
                .map_or_else(|| "?".to_string(), |s| format!("{} {}", s.kind, s.name));
            println!("  <- {source} via {}", r.ref_type);
        }
    }
    Ok(())
}
