// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Merging diagnostics from several servers.
//!
//! Each live client keeps its own table of published diagnostics. The
//! aggregate view is the per-file concatenation of those tables, with every
//! diagnostic attributed to a server. Nothing is deduplicated: two servers
//! reporting the same problem produce two entries.

use lsp_types::{Diagnostic, DiagnosticSeverity};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::client::DiagnosticMap;

/// Fills in `source` with `server_id` wherever the server left it empty.
pub fn tag_source(diagnostics: &mut [Diagnostic], server_id: &str) {
    for diagnostic in diagnostics {
        if diagnostic.source.is_none() {
            diagnostic.source = Some(server_id.to_string());
        }
    }
}

/// Accumulates diagnostics tables from multiple clients.
#[derive(Debug, Default)]
pub struct DiagnosticsAggregator {
    files: DiagnosticMap,
}

impl DiagnosticsAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one client's table, tagging untagged entries with `server_id`.
    pub fn extend(&mut self, server_id: &str, table: DiagnosticMap) {
        for (path, mut diagnostics) in table {
            tag_source(&mut diagnostics, server_id);
            self.files.entry(path).or_default().extend(diagnostics);
        }
    }

    /// Appends one client's diagnostics for a single file.
    pub fn extend_file(&mut self, server_id: &str, path: &Path, mut diagnostics: Vec<Diagnostic>) {
        tag_source(&mut diagnostics, server_id);
        self.files
            .entry(path.to_path_buf())
            .or_default()
            .extend(diagnostics);
    }

    /// Total number of diagnostics across all files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// Whether no diagnostics have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of diagnostics with `Error` severity.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.files
            .values()
            .flatten()
            .filter(|d| d.severity == Some(DiagnosticSeverity::ERROR))
            .count()
    }

    /// Diagnostics collected for `path`, consuming the aggregator.
    #[must_use]
    pub fn into_file(mut self, path: &Path) -> Vec<Diagnostic> {
        self.files.remove(path).unwrap_or_default()
    }

    /// The merged table.
    #[must_use]
    pub fn into_inner(self) -> HashMap<PathBuf, Vec<Diagnostic>> {
        self.files
    }
}
