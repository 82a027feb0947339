/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::lsp::retry::RETRY_DELAYS;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// How long `touch_file` waits for each server's diagnostics (default: 3000).
    #[serde(default = "default_diagnostics_timeout_ms")]
    pub diagnostics_timeout_ms: u64,

    /// Upper bound on the initialize handshake. Unset means wait forever.
    #[serde(default)]
    pub initialize_timeout_ms: Option<u64>,

    /// Backoff table for failed spawns; its length is the retry budget.
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    /// Start from the builtin server table (default: true).
    #[serde(default = "default_true")]
    pub builtin_servers: bool,

    /// Server ids that start out disabled.
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Server definitions keyed by id (e.g., "rust-analyzer", "pyright").
    /// An id matching a builtin replaces it.
    #[serde(default)]
    pub server: BTreeMap<String, ServerConfig>,
}

/// One `[server.<id>]` table.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// The command to execute (e.g., "rust-analyzer")
    #[serde(default)]
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the server process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Display name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,

    /// Handled file extensions, e.g. [".ts", ".tsx"]
    #[serde(default)]
    pub extensions: Vec<String>,

    /// File names or globs marking a project root
    #[serde(default)]
    pub root_patterns: Vec<String>,

    /// File names or globs that rule this server out for a project
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Whether a missing binary may be installed with `install`
    #[serde(default)]
    pub installable: bool,

    /// Install command, e.g. ["npm", "install", "-g", "pyright"]
    #[serde(default)]
    pub install: Vec<String>,

    /// Initialization options to pass to the LSP server
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,

    /// Whether the server starts enabled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            name: None,
            extensions: Vec::new(),
            root_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            installable: false,
            install: Vec::new(),
            initialization_options: None,
            enabled: true,
        }
    }
}

const fn default_diagnostics_timeout_ms() -> u64 {
    3000
}

fn default_retry_delays_ms() -> Vec<u64> {
    RETRY_DELAYS
        .iter()
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .collect()
}

const fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            diagnostics_timeout_ms: default_diagnostics_timeout_ms(),
            initialize_timeout_ms: None,
            retry_delays_ms: default_retry_delays_ms(),
            builtin_servers: true,
            disabled: Vec::new(),
            server: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file cannot be read or does not
    /// match the expected shape.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        Self::load_layers(user_config_path(), explicit_file)
    }

    /// Load configuration from an optional user file and an optional
    /// explicit file, then the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file cannot be read or does not
    /// match the expected shape.
    pub fn load_layers(user_file: Option<PathBuf>, explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("diagnostics_timeout_ms", 3000)?
            .set_default("builtin_servers", true)?;

        // 2. User config directory (~/.config/lsp-conductor/config.toml)
        if let Some(path) = user_file
            && path.exists()
        {
            builder = builder.add_source(config::File::from(path));
        }

        // 3. Explicit file
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Environment (CONDUCTOR_DIAGNOSTICS_TIMEOUT_MS, etc.)
        builder = builder.add_source(config::Environment::with_prefix("CONDUCTOR"));

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Diagnostics wait per client in `touch_file`.
    #[must_use]
    pub const fn diagnostics_timeout(&self) -> Duration {
        Duration::from_millis(self.diagnostics_timeout_ms)
    }

    /// Initialize handshake bound, if configured.
    #[must_use]
    pub fn initialize_timeout(&self) -> Option<Duration> {
        self.initialize_timeout_ms.map(Duration::from_millis)
    }

    /// Retry backoff table.
    #[must_use]
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    /// Server ids that start disabled: the `disabled` list plus every
    /// `[server.<id>]` with `enabled = false`.
    #[must_use]
    pub fn initially_disabled(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.disabled.clone();
        ids.extend(
            self.server
                .iter()
                .filter(|(_, s)| !s.enabled)
                .map(|(id, _)| id.clone()),
        );
        ids.sort();
        ids.dedup();
        ids
    }
}

/// `~/.config/lsp-conductor/config.toml` on Linux, the platform equivalent
/// elsewhere.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lsp-conductor").join("config.toml"))
}
