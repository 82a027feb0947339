// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! lsp-conductor runs many language servers side by side for one project.
//!
//! It decides which servers apply to a file, finds each server's project
//! root, keeps one client per `(server, root)` with concurrent spawns
//! deduplicated, retries failed servers with bounded backoff, and merges
//! diagnostics and query results across servers.

/// Command-line interface utilities.
pub mod cli;
/// Layered configuration loading.
pub mod config;
/// Typed events published by the client manager.
pub mod events;
/// Server registry, launching, retry, and the client manager.
pub mod lsp;
