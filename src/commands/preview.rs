// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Preview command - renders a kustomization, chart or cluster and lists the result

use super::{open_engine, print_diagnostics};
use crate::config::Config;
use crate::engine::{Command, Engine};
use crate::overlay::PreviewState;
use crate::render::CommandRenderer;
use crate::runtime::EngineService;
use crate::store::normalize_path;
use crate::types::PreviewKind;
use anyhow::{anyhow, bail, Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;

/// Resolve a user-supplied kustomization file to its resource id
fn kustomization_id(engine: &Engine, target: &str) -> Result<String> {
    if engine.resource(target).is_some() {
        return Ok(target.to_string());
    }
    let file = normalize_path(target);
    let file = if file.ends_with(".yaml") || file.ends_with(".yml") {
        file
    } else if file.is_empty() {
        "kustomization.yaml".to_string()
    } else {
        format!("{file}/kustomization.yaml")
    };
    engine
        .local_resources()
        .find(|r| r.kind == "Kustomization" && r.file_path == file)
        .map(|r| r.id.clone())
        .ok_or_else(|| anyhow!("No Kustomization found at {file}"))
}

/// Run the preview command
pub fn run(path: &Path, config: &Config, kind: PreviewKind, target: String, output_yaml: bool) -> Result<()> {
    let engine = open_engine(path, config)?;
    let target = match kind {
        PreviewKind::Kustomization => kustomization_id(&engine, &target)?,
        PreviewKind::Helm | PreviewKind::Cluster => target,
    };
    let renderer = Arc::new(CommandRenderer::new(&config.renderers));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let service = EngineService::spawn(engine, renderer);
        let handle = service.handle();
        let outcome = handle
            .dispatch_and_settle(Command::StartPreview { kind, target })
            .await
            .context("Failed to start preview")?;
        print_diagnostics(&outcome.diagnostics);

        drop(handle);
        let engine = service.shutdown().await?;
        let PreviewState::Active(ticket) = engine.preview() else {
            bail!("Preview did not produce any resources");
        };

        let resources: Vec<_> = engine.active_resources().collect();
        if output_yaml {
            let docs: Vec<&str> = resources.iter().map(|r| r.text.as_str()).collect();
            print!("{}", docs.join("---\n"));
        } else {
            println!("{} preview of {}: {} resources", ticket.kind, ticket.target.bold(), resources.len());
            for r in &resources {
                println!("  {} {}", r.kind.cyan(), r.name);
            }
            let issues = engine.validation_issues();
            if !issues.is_empty() {
                println!("{} unsatisfied references in the preview", issues.len().yellow());
            }
        }
        Ok::<_, anyhow::Error>(())
    })
}
