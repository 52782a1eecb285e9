// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Validate command - reports required references with no target

use super::open_engine;
use crate::config::Config;
use anyhow::{bail, Result};
use owo_colors::OwoColorize;
use std::path::Path;

/// Run the validate command; fails when any required reference is dangling
pub fn run(path: &Path, config: &Config, json: bool) -> Result<()> {
    let engine = open_engine(path, config)?;
    let issues = engine.validation_issues();

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else if issues.is_empty() {
        println!("{} all required references are satisfied", "ok".green());
    } else {
        for issue in &issues {
            println!(
                "{} {} {}: {} {} not found ({})",
                "missing".red(),
                issue.kind,
                issue.name.bold(),
                issue.reference.target_kind,
                issue.reference.name,
                issue.reference.ref_type
            );
        }
    }

    if !issues.is_empty() {
        bail!("{} unsatisfied required references", issues.len());
    }
    Ok(())
}
