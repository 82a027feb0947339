// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error types for server launching and protocol client operations.
//!
//! None of these ever reach the caller of an aggregate operation on
//! [`ClientManager`](crate::lsp::ClientManager): they mark an instance broken,
//! feed the retry path, or are logged and skipped.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`ProtocolClient`](crate::lsp::ProtocolClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The initialize handshake was rejected or could not be completed.
    #[error("initialize failed: {0}")]
    Initialize(String),

    /// The initialize handshake did not finish within the configured bound.
    #[error("initialize timed out after {0:?}")]
    InitializeTimeout(Duration),

    /// A request returned an error response.
    #[error("{method} failed: {message}")]
    Request {
        /// LSP method name, e.g. `textDocument/hover`.
        method: String,
        /// Server-provided or transport error message.
        message: String,
    },

    /// The server connection is gone.
    #[error("server connection closed")]
    Closed,

    /// I/O failure on the server's pipes.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure to start a server process.
///
/// A missing binary is not an error: launchers report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The process could not be spawned.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The program that was executed.
        command: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The install command ran but reported failure.
    #[error("install command `{command}` failed: {reason}")]
    Install {
        /// The install program.
        command: String,
        /// Exit status or I/O error description.
        reason: String,
    },
}

/// Invalid server definition.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A root or exclude pattern is not a valid glob.
    #[error("server `{server}`: invalid pattern `{pattern}`: {source}")]
    Pattern {
        /// Server id the pattern belongs to.
        server: String,
        /// The offending pattern.
        pattern: String,
        /// Glob compilation error.
        #[source]
        source: globset::Error,
    },

    /// A configured server has no command to run.
    #[error("server `{0}` has no command configured")]
    MissingCommand(String),

    /// Two definitions share the same id.
    #[error("server `{0}` is defined twice")]
    Duplicate(String),
}
