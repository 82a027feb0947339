// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! `conductor`: inspect the language server table and how files route to it.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lsp_conductor::cli::{self, ColorConfig};
use lsp_conductor::config::Config;
use lsp_conductor::lsp::{InstanceKey, ServerDefinition, ServerRegistry};

/// Command-line arguments for conductor.
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Orchestrates multiple language servers per project")]
#[command(version = env!("CONDUCTOR_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// Subcommands supported by conductor.
#[derive(Subcommand, Debug)]
enum Command {
    /// List registered language servers.
    Servers {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show which servers and project roots each file resolves to.
    Route {
        /// Files to route.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Check language server installation for the current workspace.
    Doctor {
        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,
    },
}

/// One row of `conductor servers --json`.
#[derive(Debug, Serialize)]
struct ServerRow<'a> {
    id: &'a str,
    name: &'a str,
    enabled: bool,
    installed: bool,
    installable: bool,
    extensions: Vec<&'a str>,
    root_patterns: &'a [String],
    exclude_patterns: &'a [String],
}

/// Entry point for the conductor CLI.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or the subcommand fails.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("lsp_conductor=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.clone())?;
    let registry =
        ServerRegistry::from_config(&config).context("Invalid server configuration")?;
    debug!(servers = registry.len(), "Loaded server registry");

    match args.command {
        Command::Servers { json } => run_servers(&config, &registry, json),
        Command::Route { files } => {
            run_route(&config, &registry, &files);
            Ok(())
        }
        Command::Doctor { nocolor } => {
            run_doctor(&config, &registry, args.config.as_deref(), nocolor)
        }
    }
}

fn is_enabled(config: &Config, id: &str) -> bool {
    !config.initially_disabled().iter().any(|d| d == id)
}

fn extension_list(definition: &ServerDefinition) -> String {
    definition
        .extensions()
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

fn run_servers(config: &Config, registry: &ServerRegistry, json: bool) -> Result<()> {
    if json {
        let rows: Vec<ServerRow<'_>> = registry
            .iter()
            .map(|d| ServerRow {
                id: d.id(),
                name: d.name(),
                enabled: is_enabled(config, d.id()),
                installed: d.launcher().check_installed(),
                installable: d.installable(),
                extensions: d.extensions().iter().map(String::as_str).collect(),
                root_patterns: d.root_patterns(),
                exclude_patterns: d.exclude_patterns(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No language servers registered.");
        return Ok(());
    }

    let id_width = registry.iter().map(|d| d.id().len()).max().unwrap_or(10).max(2);
    let ext_budget = cli::terminal_width().saturating_sub(id_width + 24).max(12);

    println!("{:<id_width$}  {:<8}  {:<9}  EXTENSIONS", "ID", "ENABLED", "INSTALLED");
    for definition in registry.iter() {
        let enabled = if is_enabled(config, definition.id()) { "yes" } else { "no" };
        let installed = if definition.launcher().check_installed() {
            "yes"
        } else {
            "no"
        };
        println!(
            "{:<id_width$}  {enabled:<8}  {installed:<9}  {}",
            definition.id(),
            cli::truncate(&extension_list(definition), ext_budget),
        );
    }
    Ok(())
}

fn run_route(config: &Config, registry: &ServerRegistry, files: &[PathBuf]) {
    for file in files {
        let path = std::path::absolute(file).unwrap_or_else(|_| file.clone());
        println!("{}", path.display());

        let definitions = registry.for_file(&path);
        if definitions.is_empty() {
            println!("  (no server handles this extension)");
            continue;
        }

        for definition in definitions {
            if !is_enabled(config, definition.id()) {
                println!("  {:<16} disabled", definition.id());
                continue;
            }
            match definition.detect_root(&path) {
                Some(root) => println!("  {}", InstanceKey::new(definition.id(), root)),
                None => println!("  {:<16} no project root", definition.id()),
            }
        }
    }
}

fn run_doctor(
    config: &Config,
    registry: &ServerRegistry,
    config_path: Option<&Path>,
    nocolor: bool,
) -> Result<()> {
    let colors = ColorConfig::new(nocolor);

    println!("conductor {}", env!("CONDUCTOR_VERSION"));
    println!();

    let config_source = config_path.map_or_else(
        || "default paths".to_string(),
        |p| p.display().to_string(),
    );
    let root = std::env::current_dir().context("Failed to read current directory")?;
    println!("{} {}", colors.bold("Config:"), config_source);
    println!("{} {}", colors.bold("Root:  "), root.display());
    println!();

    if registry.is_empty() {
        println!("No language servers registered.");
        return Ok(());
    }

    let found: BTreeMap<String, usize> = cli::scan_extensions(&root, 10);
    let width = registry.iter().map(|d| d.id().len()).max().unwrap_or(10);

    for definition in registry.iter() {
        let label = format!("{:<width$}", definition.id());
        let files: usize = definition
            .extensions()
            .iter()
            .filter_map(|ext| found.get(ext))
            .sum();

        if !is_enabled(config, definition.id()) {
            println!("{}  {}", colors.dim(&label), colors.yellow("- disabled"));
            continue;
        }

        if files == 0 {
            println!(
                "{}  {}",
                colors.dim(&label),
                colors.dim("- skipped (no matching files)")
            );
            continue;
        }

        if definition.launcher().check_installed() {
            println!(
                "{}  {} {}",
                colors.cyan(&label),
                colors.green("✓ installed"),
                colors.dim(&format!("({files} files)")),
            );
        } else if definition.installable() {
            println!(
                "{}  {}",
                colors.cyan(&label),
                colors.yellow("✗ not found, will install on first use"),
            );
        } else {
            println!("{}  {}", colors.cyan(&label), colors.red("✗ command not found"));
        }
    }

    Ok(())
}
