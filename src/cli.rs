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

//! CLI utilities for terminal output and workspace scanning.

use crossterm::tty::IsTty;
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::io::stdout;
use std::path::Path;

use crate::lsp::registry::file_extension;

/// Configuration for color output
#[derive(Debug, Clone, Copy)]
pub struct ColorConfig {
    /// Whether escape codes are emitted.
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new `ColorConfig`, auto-detecting TTY unless `nocolor` is true
    #[must_use]
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stdout().is_tty(),
        }
    }

    fn paint(self, code: &str, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// Green (healthy)
    #[must_use]
    pub fn green(self, s: &str) -> String {
        self.paint("32", s)
    }

    /// Yellow (warnings, disabled servers)
    #[must_use]
    pub fn yellow(self, s: &str) -> String {
        self.paint("33", s)
    }

    /// Red (errors)
    #[must_use]
    pub fn red(self, s: &str) -> String {
        self.paint("31", s)
    }

    /// Cyan (server ids)
    #[must_use]
    pub fn cyan(self, s: &str) -> String {
        self.paint("36", s)
    }

    /// Dim text
    #[must_use]
    pub fn dim(self, s: &str) -> String {
        self.paint("2", s)
    }

    /// Bold text
    #[must_use]
    pub fn bold(self, s: &str) -> String {
        self.paint("1", s)
    }
}

/// Get the terminal width, defaulting to 80 if unable to detect
#[must_use]
pub fn terminal_width() -> usize {
    crossterm::terminal::size().map_or(80, |(w, _)| usize::from(w))
}

/// Truncate a string to `max_len` characters, adding "..." if truncated
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if max_len <= 3 {
        return ".".repeat(max_len);
    }
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

/// Counts files per extension under `root`, honoring `.gitignore`.
#[must_use]
pub fn scan_extensions(root: &Path, max_depth: usize) -> BTreeMap<String, usize> {
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .max_depth(Some(max_depth))
        .build();

    let mut counts = BTreeMap::new();
    for entry in walker.flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Some(ext) = file_extension(entry.path()) {
            *counts.entry(ext).or_insert(0) += 1;
        }
    }
    counts
}
