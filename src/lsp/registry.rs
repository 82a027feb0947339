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

//! Known language server definitions and project root detection.
//!
//! A [`ServerDefinition`] says which file extensions a server handles and how
//! to find the project root for a file: walk up from the file's directory
//! until a directory contains an entry matching one of the root patterns.
//! Running instances are identified by an [`InstanceKey`] of
//! `(server id, detected root)`.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::error::RegistryError;
use super::launcher::{CommandLauncher, ServerLauncher};
use crate::config::{Config, ServerConfig};

/// Identifies one running server instance: a server id plus the project
/// root it was started for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    server_id: String,
    root: PathBuf,
}

impl InstanceKey {
    /// Creates a key for `server_id` running at `root`.
    pub fn new(server_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            server_id: server_id.into(),
            root: root.into(),
        }
    }

    /// The server definition id.
    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The detected project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_id, self.root.display())
    }
}

/// Root or exclude patterns, split into plain file names (checked with a
/// single `exists`) and globs (checked against directory entries).
#[derive(Debug, Clone, Default)]
struct PatternSet {
    literals: Vec<String>,
    globs: Option<GlobSet>,
}

impl PatternSet {
    fn compile(server: &str, patterns: &[String]) -> Result<Self, RegistryError> {
        let mut literals = Vec::new();
        let mut builder = GlobSetBuilder::new();
        let mut has_globs = false;

        for pattern in patterns {
            if pattern.contains(['*', '?', '[', '{']) {
                let glob = Glob::new(pattern).map_err(|source| RegistryError::Pattern {
                    server: server.to_string(),
                    pattern: pattern.clone(),
                    source,
                })?;
                builder.add(glob);
                has_globs = true;
            } else {
                literals.push(pattern.clone());
            }
        }

        let globs = if has_globs {
            Some(builder.build().map_err(|source| RegistryError::Pattern {
                server: server.to_string(),
                pattern: patterns.join(", "),
                source,
            })?)
        } else {
            None
        };

        Ok(Self { literals, globs })
    }

    fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.globs.is_none()
    }

    /// Whether `dir` contains an entry matching any pattern.
    fn matches_in(&self, dir: &Path) -> bool {
        if self.literals.iter().any(|name| dir.join(name).exists()) {
            return true;
        }
        let Some(globs) = &self.globs else {
            return false;
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        entries
            .filter_map(Result::ok)
            .any(|entry| globs.is_match(entry.file_name()))
    }
}

/// A language server the manager knows how to start.
pub struct ServerDefinition {
    id: String,
    name: String,
    extensions: BTreeSet<String>,
    root_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
    installable: bool,
    initialization: Option<Value>,
    roots: PatternSet,
    excludes: PatternSet,
    launcher: Arc<dyn ServerLauncher>,
}

impl ServerDefinition {
    /// Starts building a definition for `id` started by `launcher`.
    pub fn builder(id: impl Into<String>, launcher: Arc<dyn ServerLauncher>) -> DefinitionBuilder {
        let id = id.into();
        DefinitionBuilder {
            name: id.clone(),
            id,
            extensions: Vec::new(),
            root_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            installable: false,
            initialization: None,
            launcher,
        }
    }

    /// Stable id, e.g. `rust-analyzer`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handled extensions, each with a leading dot.
    #[must_use]
    pub const fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    /// Patterns that mark a project root.
    #[must_use]
    pub fn root_patterns(&self) -> &[String] {
        &self.root_patterns
    }

    /// Patterns that rule this server out for a project.
    #[must_use]
    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude_patterns
    }

    /// Whether the launcher may install the server when it is missing.
    #[must_use]
    pub const fn installable(&self) -> bool {
        self.installable
    }

    /// Server-specific `initializationOptions`.
    #[must_use]
    pub const fn initialization(&self) -> Option<&Value> {
        self.initialization.as_ref()
    }

    /// The launcher that starts this server.
    #[must_use]
    pub fn launcher(&self) -> &Arc<dyn ServerLauncher> {
        &self.launcher
    }

    /// Whether this server handles files with extension `ext` (e.g. `.rs`).
    #[must_use]
    pub fn handles_extension(&self, ext: &str) -> bool {
        self.extensions.contains(ext)
    }

    /// Finds the project root for `file`.
    ///
    /// Walks up from the file's directory. A directory containing an exclude
    /// match ends the search with `None`; the first directory containing a
    /// root match is the root. With no root patterns the file's own
    /// directory is the root.
    #[must_use]
    pub fn detect_root(&self, file: &Path) -> Option<PathBuf> {
        let start = file.parent()?;

        for dir in start.ancestors() {
            if !self.excludes.is_empty() && self.excludes.matches_in(dir) {
                debug!(server = %self.id, dir = %dir.display(), "Excluded by pattern");
                return None;
            }
            if self.roots.is_empty() {
                return Some(dir.to_path_buf());
            }
            if self.roots.matches_in(dir) {
                return Some(dir.to_path_buf());
            }
        }

        None
    }
}

impl fmt::Debug for ServerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDefinition")
            .field("id", &self.id)
            .field("extensions", &self.extensions)
            .field("root_patterns", &self.root_patterns)
            .field("exclude_patterns", &self.exclude_patterns)
            .field("installable", &self.installable)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServerDefinition`].
pub struct DefinitionBuilder {
    id: String,
    name: String,
    extensions: Vec<String>,
    root_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
    installable: bool,
    initialization: Option<Value>,
    launcher: Arc<dyn ServerLauncher>,
}

impl DefinitionBuilder {
    /// Display name (defaults to the id).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// File extensions, with or without the leading dot.
    #[must_use]
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Root marker file names or globs.
    #[must_use]
    pub fn root_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Patterns that rule the server out.
    #[must_use]
    pub fn exclude_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the launcher may install the server.
    #[must_use]
    pub const fn installable(mut self, installable: bool) -> Self {
        self.installable = installable;
        self
    }

    /// `initializationOptions` sent during the handshake.
    #[must_use]
    pub fn initialization(mut self, options: Option<Value>) -> Self {
        self.initialization = options;
        self
    }

    /// Compiles patterns and produces the definition.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Pattern`] if a glob pattern is invalid.
    pub fn build(self) -> Result<ServerDefinition, RegistryError> {
        let roots = PatternSet::compile(&self.id, &self.root_patterns)?;
        let excludes = PatternSet::compile(&self.id, &self.exclude_patterns)?;
        let extensions = self
            .extensions
            .into_iter()
            .filter(|e| !e.is_empty())
            .map(|e| if e.starts_with('.') { e } else { format!(".{e}") })
            .collect();

        Ok(ServerDefinition {
            id: self.id,
            name: self.name,
            extensions,
            root_patterns: self.root_patterns,
            exclude_patterns: self.exclude_patterns,
            installable: self.installable,
            initialization: self.initialization,
            roots,
            excludes,
            launcher: self.launcher,
        })
    }
}

/// Returns the extension of `path` with a leading dot, e.g. `.rs`.
#[must_use]
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
}

/// Ordered table of server definitions.
#[derive(Debug, Default, Clone)]
pub struct ServerRegistry {
    servers: Vec<Arc<ServerDefinition>>,
}

impl ServerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the id is already registered.
    pub fn register(&mut self, definition: ServerDefinition) -> Result<(), RegistryError> {
        if self.get(definition.id()).is_some() {
            return Err(RegistryError::Duplicate(definition.id));
        }
        self.servers.push(Arc::new(definition));
        Ok(())
    }

    /// Adds a definition, replacing any existing one with the same id in
    /// place.
    pub fn replace(&mut self, definition: ServerDefinition) {
        let definition = Arc::new(definition);
        if let Some(slot) = self.servers.iter_mut().find(|s| s.id == definition.id) {
            *slot = definition;
        } else {
            self.servers.push(definition);
        }
    }

    /// Looks up a definition by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<ServerDefinition>> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServerDefinition>> {
        self.servers.iter()
    }

    /// Definitions handling `path`'s extension, in registration order.
    #[must_use]
    pub fn for_file(&self, path: &Path) -> Vec<Arc<ServerDefinition>> {
        let Some(ext) = file_extension(path) else {
            return Vec::new();
        };
        self.servers
            .iter()
            .filter(|s| s.handles_extension(&ext))
            .cloned()
            .collect()
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// The builtin server table.
    ///
    /// # Errors
    ///
    /// Only fails if a builtin pattern is invalid.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for definition in builtin_definitions()? {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Builds the registry described by `config`: the builtin table (unless
    /// `builtin_servers = false`) with `[server.<id>]` entries replacing or
    /// extending it.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured server has no command or an invalid
    /// pattern.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let mut registry = if config.builtin_servers {
            Self::builtin()?
        } else {
            Self::new()
        };

        for (id, server) in &config.server {
            registry.replace(definition_from_config(id, server)?);
        }

        Ok(registry)
    }
}

fn definition_from_config(
    id: &str,
    server: &ServerConfig,
) -> Result<ServerDefinition, RegistryError> {
    if server.command.trim().is_empty() {
        return Err(RegistryError::MissingCommand(id.to_string()));
    }

    let launcher = CommandLauncher::new(&server.command, server.args.iter().cloned())
        .env(server.env.clone())
        .install_with(if server.installable {
            server.install.clone()
        } else {
            Vec::new()
        });

    ServerDefinition::builder(id, Arc::new(launcher))
        .name(server.name.clone().unwrap_or_else(|| id.to_string()))
        .extensions(server.extensions.iter().cloned())
        .root_patterns(server.root_patterns.iter().cloned())
        .exclude_patterns(server.exclude_patterns.iter().cloned())
        .installable(server.installable)
        .initialization(server.initialization_options.clone())
        .build()
}

struct Builtin {
    id: &'static str,
    name: &'static str,
    command: &'static str,
    args: &'static [&'static str],
    extensions: &'static [&'static str],
    roots: &'static [&'static str],
    excludes: &'static [&'static str],
    install: &'static [&'static str],
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        id: "deno",
        name: "Deno",
        command: "deno",
        args: &["lsp"],
        extensions: &[".ts", ".tsx", ".js", ".jsx", ".mjs"],
        roots: &["deno.json", "deno.jsonc"],
        excludes: &[],
        install: &[],
    },
    Builtin {
        id: "typescript",
        name: "TypeScript",
        command: "typescript-language-server",
        args: &["--stdio"],
        extensions: &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".mts", ".cts"],
        roots: &[
            "package-lock.json",
            "bun.lockb",
            "bun.lock",
            "pnpm-lock.yaml",
            "yarn.lock",
            "package.json",
        ],
        excludes: &["deno.json", "deno.jsonc"],
        install: &["npm", "install", "-g", "typescript", "typescript-language-server"],
    },
    Builtin {
        id: "rust-analyzer",
        name: "rust-analyzer",
        command: "rust-analyzer",
        args: &[],
        extensions: &[".rs"],
        roots: &["Cargo.toml"],
        excludes: &[],
        install: &["rustup", "component", "add", "rust-analyzer"],
    },
    Builtin {
        id: "gopls",
        name: "gopls",
        command: "gopls",
        args: &[],
        extensions: &[".go"],
        roots: &["go.work", "go.mod", "go.sum"],
        excludes: &[],
        install: &["go", "install", "golang.org/x/tools/gopls@latest"],
    },
    Builtin {
        id: "pyright",
        name: "Pyright",
        command: "pyright-langserver",
        args: &["--stdio"],
        extensions: &[".py", ".pyi"],
        roots: &[
            "pyproject.toml",
            "setup.py",
            "setup.cfg",
            "requirements.txt",
            "Pipfile",
            "pyrightconfig.json",
        ],
        excludes: &[],
        install: &["npm", "install", "-g", "pyright"],
    },
    Builtin {
        id: "clangd",
        name: "clangd",
        command: "clangd",
        args: &["--background-index"],
        extensions: &[".c", ".cc", ".cpp", ".cxx", ".h", ".hh", ".hpp", ".hxx"],
        roots: &[
            "compile_commands.json",
            "compile_flags.txt",
            ".clangd",
            "CMakeLists.txt",
            "Makefile",
        ],
        excludes: &[],
        install: &[],
    },
    Builtin {
        id: "bash",
        name: "Bash",
        command: "bash-language-server",
        args: &["start"],
        extensions: &[".sh", ".bash"],
        roots: &[],
        excludes: &[],
        install: &["npm", "install", "-g", "bash-language-server"],
    },
];

fn builtin_definitions() -> Result<Vec<ServerDefinition>, RegistryError> {
    BUILTINS
        .iter()
        .map(|b| {
            let installable = !b.install.is_empty();
            let launcher = CommandLauncher::new(b.command, b.args.iter().copied())
                .install_with(b.install.iter().map(ToString::to_string).collect());
            ServerDefinition::builder(b.id, Arc::new(launcher))
                .name(b.name)
                .extensions(b.extensions.iter().copied())
                .root_patterns(b.roots.iter().copied())
                .exclude_patterns(b.excludes.iter().copied())
                .installable(installable)
                .build()
        })
        .collect()
}
