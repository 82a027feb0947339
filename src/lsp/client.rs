// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The per-instance protocol client seam.
//!
//! A [`ProtocolClient`] owns one running server process for one project root
//! and speaks the Language Server Protocol to it. The wire format lives
//! behind this trait; the manager only routes calls and consumes the
//! [`ClientEvent`]s a client pushes back.

use async_trait::async_trait;
use lsp_types::{CompletionItem, Diagnostic, Hover, Location, Position};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::error::ClientError;
use super::launcher::ServerProcess;
use super::registry::ServerDefinition;

/// Published diagnostics keyed by absolute file path.
pub type DiagnosticMap = HashMap<PathBuf, Vec<Diagnostic>>;

/// Notifications a client pushes to the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server published diagnostics for a file.
    Diagnostics {
        /// File the diagnostics belong to.
        path: PathBuf,
        /// Full replacement set for the file.
        diagnostics: Vec<Diagnostic>,
    },
    /// The connection ended normally.
    Closed,
    /// The connection failed at runtime.
    Error(String),
}

/// Channel a client uses to report [`ClientEvent`]s.
pub type ClientEventSender = mpsc::UnboundedSender<ClientEvent>;

/// One running language server bound to one project root.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Id of the server definition this client was spawned from.
    fn server_id(&self) -> &str;

    /// Project root the server was started in.
    fn root(&self) -> &Path;

    /// Performs the initialize handshake.
    async fn initialize(&self) -> Result<(), ClientError>;

    /// Opens `path`, or re-sends its contents if already open.
    async fn open_document(&self, path: &Path) -> Result<(), ClientError>;

    /// Replaces the contents of an open document.
    async fn change_document(&self, path: &Path, content: &str) -> Result<(), ClientError>;

    /// Notifies the server that `path` was saved.
    async fn save_document(&self, path: &Path) -> Result<(), ClientError>;

    /// Snapshot of every file's last published diagnostics.
    fn diagnostics(&self) -> DiagnosticMap;

    /// Waits until diagnostics for `path` are published or `timeout` passes.
    async fn wait_for_diagnostics(&self, path: &Path, timeout: Duration);

    /// `textDocument/hover`.
    async fn hover(&self, path: &Path, position: Position) -> Result<Option<Hover>, ClientError>;

    /// `textDocument/completion`, flattened to a list.
    async fn completion(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Vec<CompletionItem>, ClientError>;

    /// `textDocument/definition`, flattened to locations.
    async fn definition(&self, path: &Path, position: Position)
    -> Result<Vec<Location>, ClientError>;

    /// `textDocument/references`.
    async fn references(&self, path: &Path, position: Position)
    -> Result<Vec<Location>, ClientError>;

    /// Sends shutdown and exit, then releases the process.
    async fn shutdown(&self) -> Result<(), ClientError>;
}

/// Builds protocol clients around freshly spawned servers.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Wraps `process` in a client for `definition` at `root`.
    ///
    /// The returned client must not be initialized yet. It reports events
    /// through `events`.
    async fn connect(
        &self,
        definition: &ServerDefinition,
        root: &Path,
        process: ServerProcess,
        events: ClientEventSender,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError>;
}
