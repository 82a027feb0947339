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

//! Status snapshot types.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of one server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Spawn or initialize handshake in flight.
    Spawning,
    /// Initialized and serving requests.
    Running,
    /// Failed; skipped by routing until a retry or reset succeeds.
    Broken,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Broken => "broken",
        })
    }
}

/// One `(server, root)` instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    /// Detected project root.
    pub root: PathBuf,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Retries scheduled so far.
    pub retries: u32,
}

/// Detailed status for a registered server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Server definition id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether routing may use this server.
    pub enabled: bool,
    /// Whether the server binary can be found.
    pub installed: bool,
    /// Handled extensions, with leading dots.
    pub extensions: Vec<String>,
    /// Known instances, sorted by root.
    pub instances: Vec<InstanceStatus>,
}

impl ServerStatus {
    /// Number of instances in `state`.
    #[must_use]
    pub fn count(&self, state: InstanceState) -> usize {
        self.instances.iter().filter(|i| i.state == state).count()
    }

    /// Whether any instance is broken.
    #[must_use]
    pub fn has_broken(&self) -> bool {
        self.count(InstanceState::Broken) > 0
    }
}
