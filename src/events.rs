// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Outbound notifications from the client manager.
//!
//! The manager never calls into the UI or session layer directly. Anything
//! interested in server lifecycle or diagnostics subscribes to an
//! [`EventBroadcaster`] and receives typed [`ManagerEvent`]s.

use chrono::{DateTime, Utc};
use lsp_types::Diagnostic;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::lsp::launcher::InstallStage;

/// Default number of events buffered per subscriber before lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An event with the time it was emitted.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The specific event data.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Types of manager events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A server instance finished its initialize handshake.
    ServerStarted {
        /// Server definition id.
        server_id: String,
        /// Detected project root.
        root: PathBuf,
    },
    /// A server instance went away.
    ServerClosed {
        /// Server definition id.
        server_id: String,
        /// Detected project root.
        root: PathBuf,
    },
    /// A retry has been scheduled for a failed instance.
    ServerRetrying {
        /// Server definition id.
        server_id: String,
        /// Detected project root.
        root: PathBuf,
        /// Retry number, starting at 1.
        attempt: u32,
    },
    /// Installation progress reported by a launcher.
    ServerInstalling {
        /// Server definition id.
        server_id: String,
        /// Current installation stage.
        stage: InstallStage,
        /// Package being installed.
        package: String,
    },
    /// A server published diagnostics for a file.
    Diagnostics {
        /// Server definition id.
        server_id: String,
        /// File the diagnostics belong to.
        path: PathBuf,
        /// The published diagnostics, as sent by the server.
        diagnostics: Vec<Diagnostic>,
    },
    /// A server id was enabled or disabled.
    ServerStatusChanged {
        /// Server definition id.
        server_id: String,
        /// New enabled state.
        enabled: bool,
    },
}

/// Cloneable broadcaster for sharing across components.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ManagerEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Broadcast an event. Events sent with no subscribers are dropped.
    pub fn send(&self, kind: EventKind) {
        let event = ManagerEvent {
            timestamp: Utc::now(),
            kind,
        };
        let _ = self.tx.send(event);
    }

    /// Subscribe to all events sent after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
