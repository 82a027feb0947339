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

//! Starting server processes.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::error::LaunchError;

/// Stage of an automatic server installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStage {
    /// Resolving package metadata.
    Fetching,
    /// Downloading an archive or package.
    Downloading,
    /// Running the package manager.
    Installing,
    /// Unpacking a downloaded archive.
    Extracting,
    /// The server binary is in place.
    Complete,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fetching => "fetching",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Extracting => "extracting",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

type ProgressFn = dyn Fn(InstallStage, &str) + Send + Sync;

/// Callback handed to [`ServerLauncher::spawn`] for installation progress.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Arc<ProgressFn>,
}

impl ProgressReporter {
    /// Wraps a callback receiving `(stage, package)`.
    pub fn new(callback: impl Fn(InstallStage, &str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// A reporter that discards progress.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(|_, _| {})
    }

    /// Report that installation of `package` reached `stage`.
    pub fn report(&self, stage: InstallStage, package: &str) {
        (self.callback)(stage, package);
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// Handle to a started server.
///
/// Holds the OS process when there is one. The child is killed when the
/// handle (or whoever took the child) is dropped.
#[derive(Debug)]
pub struct ServerProcess {
    child: Option<Child>,
}

impl ServerProcess {
    /// Wraps a spawned child process.
    #[must_use]
    pub const fn from_child(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// A server with no OS process of its own, e.g. one hosted in-process.
    #[must_use]
    pub const fn in_process() -> Self {
        Self { child: None }
    }

    /// OS process id, if the server runs as a separate process.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Takes ownership of the child, e.g. to claim its stdio pipes.
    pub const fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }
}

/// Starts a server process for a project root.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Starts the server with `root` as its working directory.
    ///
    /// Returns `Ok(None)` when the server binary is not available. That is
    /// an expected outcome, not a failure.
    async fn spawn(
        &self,
        root: &Path,
        progress: &ProgressReporter,
    ) -> Result<Option<ServerProcess>, LaunchError>;

    /// Whether the server binary can currently be found.
    fn check_installed(&self) -> bool;
}

/// Launches a server by running a command found on `PATH`.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    install: Option<Vec<String>>,
}

impl CommandLauncher {
    /// Creates a launcher for `command` with `args`.
    pub fn new(
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            install: None,
        }
    }

    /// Extra environment variables for the server process.
    #[must_use]
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Command run when the binary is missing, e.g.
    /// `["npm", "install", "-g", "pyright"]`. Empty vectors are ignored.
    #[must_use]
    pub fn install_with(mut self, install: Vec<String>) -> Self {
        self.install = (!install.is_empty()).then_some(install);
        self
    }

    /// The program this launcher runs.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether an install command is configured.
    #[must_use]
    pub const fn can_install(&self) -> bool {
        self.install.is_some()
    }

    fn resolve(&self) -> Option<PathBuf> {
        which::which(&self.command).ok()
    }

    async fn run_install(
        &self,
        install: &[String],
        root: &Path,
        progress: &ProgressReporter,
    ) -> Result<(), LaunchError> {
        let Some((program, args)) = install.split_first() else {
            return Ok(());
        };

        info!(command = %self.command, installer = %program, "Installing language server");
        progress.report(InstallStage::Installing, &self.command);

        let status = Command::new(program)
            .args(args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| LaunchError::Install {
                command: program.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(LaunchError::Install {
                command: program.clone(),
                reason: status.to_string(),
            });
        }

        progress.report(InstallStage::Complete, &self.command);
        Ok(())
    }
}

#[async_trait]
impl ServerLauncher for CommandLauncher {
    async fn spawn(
        &self,
        root: &Path,
        progress: &ProgressReporter,
    ) -> Result<Option<ServerProcess>, LaunchError> {
        let mut program = self.resolve();

        if program.is_none()
            && let Some(install) = &self.install
        {
            self.run_install(install, root, progress).await?;
            program = self.resolve();
        }

        let Some(program) = program else {
            debug!(command = %self.command, "Language server binary not found");
            return Ok(None);
        };

        debug!(
            "Spawning {} {} in {}",
            program.display(),
            self.args.join(" "),
            root.display()
        );

        let child = Command::new(&program)
            .args(&self.args)
            .envs(&self.env)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                warn!(command = %self.command, "Failed to spawn language server: {source}");
                LaunchError::Spawn {
                    command: self.command.clone(),
                    source,
                }
            })?;

        Ok(Some(ServerProcess::from_child(child)))
    }

    fn check_installed(&self) -> bool {
        self.resolve().is_some()
    }
}
