// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Kustomize and Helm preview renderers

use crate::config::RendererConfig;
use crate::error::{EngineError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Produces rendered manifests for previews
pub trait PreviewRenderer: Send + Sync {
    /// Output of `kustomize build` for a directory
    fn render_kustomization(&self, dir: &Path) -> Result<String>;

    /// Output of `helm template` for a chart and values file
    fn render_helm(&self, chart_dir: &Path, values_file: &Path) -> Result<String>;
}

/// Renders by running `kubectl kustomize` and `helm template`
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    kubectl: PathBuf,
    helm: PathBuf,
}

impl CommandRenderer {
    /// Renderer using the configured binaries
    #[must_use]
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            kubectl: config.kubectl.clone(),
            helm: config.helm.clone(),
        }
    }

    fn run(program: &Path, args: &[&OsStr], cwd: &Path) -> Result<String> {
        debug!("Running {} {:?}", program.display(), args);
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| EngineError::Render(format!("failed to run {}: {e}", program.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Render(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| EngineError::Render(format!("{} produced invalid UTF-8: {e}", program.display())))
    }
}

impl PreviewRenderer for CommandRenderer {
    fn render_kustomization(&self, dir: &Path) -> Result<String> {
        info!("Rendering kustomization in {}", dir.display());
        Self::run(&self.kubectl, &[OsStr::new("kustomize"), dir.as_os_str()], dir)
    }

    fn render_helm(&self, chart_dir: &Path, values_file: &Path) -> Result<String> {
        info!("Rendering chart {} with {}", chart_dir.display(), values_file.display());
        Self::run(
            &self.helm,
            &[
                OsStr::new("template"),
                chart_dir.as_os_str(),
                OsStr::new("-f"),
                values_file.as_os_str(),
            ],
            chart_dir,
        )
    }
}
