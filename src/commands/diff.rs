// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Diff command - compares local resources with a cluster

use super::{open_engine, print_diagnostics};
use crate::config::Config;
use crate::engine::Command;
use crate::overlay::{ClusterDiffStatus, ClusterMatch};
use crate::render::CommandRenderer;
use crate::runtime::{EngineHandle, EngineService};
use anyhow::{anyhow, bail, Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn describe(m: &ClusterMatch) -> String {
    let ns = m.namespace.as_deref().map(|n| format!(" ({n})")).unwrap_or_default();
    format!("{} {}{}", m.kind, m.name, ns)
}

/// Run the diff command
pub fn run(path: &Path, config: &Config, context: Option<String>, show_cluster_only: bool, json: bool) -> Result<()> {
    let context = context
        .or_else(|| config.cluster.default_context.clone())
        .ok_or_else(|| anyhow!("No cluster context given and none configured"))?;
    info!("Diffing against cluster context {context}");

    let engine = open_engine(path, config)?;
    let renderer = Arc::new(CommandRenderer::new(&config.renderers));
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    runtime.block_on(async move {
        let service = EngineService::spawn(engine, renderer);
        let handle = service.handle();
        let outcome = handle
            .dispatch_and_settle(Command::LoadClusterDiff { context: context.clone() })
            .await
            .context("Failed to load cluster diff")?;
        print_diagnostics(&outcome.diagnostics);
        if show_cluster_only == config_hides(&handle).await? {
            handle.dispatch(Command::ToggleClusterOnlyResources).await?;
        }
        drop(handle);
        let engine = service.shutdown().await?;

        if let ClusterDiffStatus::Failed { message } = &engine.cluster_diff().status {
            bail!("Cluster diff against {context} failed: {message}");
        }
        let matches = engine.cluster_diff_matches();

        if json {
            println!("{}", serde_json::to_string_pretty(&matches)?);
            return Ok(());
        }

        println!("Cluster diff against {}: {} records", context.bold(), matches.len());
        for m in matches {
            if m.is_local_only() {
                println!("  {} {}", "local only  ".yellow(), describe(m));
            } else if m.is_cluster_only() {
                println!("  {} {}", "cluster only".cyan(), describe(m));
            } else {
                println!("  {} {} ({} local)", "in both     ".green(), describe(m), m.local_ids.len());
            }
        }
        Ok::<_, anyhow::Error>(())
    })
}

async fn config_hides(handle: &EngineHandle) -> Result<bool> {
    Ok(handle.query(|engine| engine.cluster_diff().hide_cluster_only).await?)
}
