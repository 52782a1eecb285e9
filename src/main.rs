// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Kubeyard CLI - resource graph for folders of Kubernetes manifests

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use kubeyard::commands;
use kubeyard::commands::graph::ExportFormat;
use kubeyard::filter::ResourceFilter;
use kubeyard::types::PreviewKind;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kubeyard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, env = "KUBEYARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR", global = true)]
    no_color: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PreviewArg {
    Kustomization,
    Helm,
    Cluster,
}

impl From<PreviewArg> for PreviewKind {
    fn from(arg: PreviewArg) -> Self {
        match arg {
            PreviewArg::Kustomization => Self::Kustomization,
            PreviewArg::Helm => Self::Helm,
            PreviewArg::Cluster => Self::Cluster,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load a project folder and list its resources
    Scan {
        /// Project folder
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show references of matching resources
    Refs {
        /// Project folder
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Name substring
        #[arg(long)]
        name: Option<String>,

        /// Kind
        #[arg(long)]
        kind: Option<String>,

        /// Namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Label selector entries (key=value)
        #[arg(short, long, value_parser = parse_key_value)]
        label: Vec<(String, String)>,

        /// Restrict to a file or folder
        #[arg(long)]
        within: Option<String>,
    },

    /// Report required references with no target
    Validate {
        /// Project folder
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Export the reference graph
    Graph {
        /// Project folder
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output format (dot, json)
        #[arg(short, long, default_value = "dot")]
        format: ExportFormat,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only the component connected to this resource id
        #[arg(long)]
        focus: Option<String>,
    },

    /// Render a kustomization, Helm chart or cluster and list the result
    Preview {
        /// What to preview
        kind: PreviewArg,

        /// Kustomization file or folder, values file, or cluster context
        target: String,

        /// Project folder
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Print the rendered documents
        #[arg(long)]
        yaml: bool,
    },

    /// Compare local resources with a cluster
    Diff {
        /// Project folder
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Cluster context (defaults to cluster.default_context)
        #[arg(long)]
        context: Option<String>,

        /// Include resources that only exist in the cluster
        #[arg(long)]
        cluster_only: bool,
    },

    /// Show the effective configuration
    Config {
        /// Dotted key to print
        key: Option<String>,

        /// Print the configuration file location
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: clap_complete::Shell,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{s}`"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = kubeyard::config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    let level = match cli.verbose {
        0 if cli.quiet => "error",
        0 => config.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("KUBEYARD_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .init();

    // Execute command
    match cli.command {
        Commands::Scan { path } => commands::scan::run(&path, &config, cli.json),
        Commands::Refs {
            path,
            name,
            kind,
            namespace,
            label,
            within,
        } => {
            let filter = ResourceFilter {
                name,
                kind,
                namespace,
                labels: label.into_iter().collect::<BTreeMap<_, _>>(),
                file_or_folder_contained_in: within,
                ..ResourceFilter::default()
            };
            commands::refs::run(&path, &config, filter, cli.json)
        }
        Commands::Validate { path } => commands::validate::run(&path, &config, cli.json),
        Commands::Graph {
            path,
            format,
            output,
            focus,
        } => commands::graph::run(&path, &config, format, output, focus),
        Commands::Preview {
            kind,
            target,
            path,
            yaml,
        } => commands::preview::run(&path, &config, kind.into(), target, yaml),
        Commands::Diff {
            path,
            context,
            cluster_only,
        } => commands::diff::run(&path, &config, context, cluster_only, cli.json),
        Commands::Config { key, path } => commands::config::run(&config, cli.config.as_deref(), key.as_deref(), path),
        Commands::Completions { shell } => commands::completions::run(shell, &mut Cli::command()),
    }
}
