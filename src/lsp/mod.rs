// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Protocol client seam consumed by the manager.
pub mod client;
/// Merging diagnostics across servers.
pub mod diagnostics;
/// Error types for launching and talking to servers.
pub mod error;
/// Spawning server processes.
pub mod launcher;
/// Routing, spawn deduplication, and fan-out across server instances.
pub mod manager;
/// Server definitions and project root detection.
pub mod registry;
/// Bounded exponential backoff for failed instances.
pub mod retry;
/// Status snapshot types.
pub mod state;

pub use client::{ClientEvent, ClientEventSender, ClientFactory, DiagnosticMap, ProtocolClient};
pub use error::{ClientError, LaunchError, RegistryError};
pub use launcher::{CommandLauncher, InstallStage, ProgressReporter, ServerLauncher, ServerProcess};
pub use manager::{ClientManager, DIAGNOSTICS_TIMEOUT, ManagerBuilder};
pub use registry::{InstanceKey, ServerDefinition, ServerRegistry};
pub use retry::{MAX_RETRIES, RETRY_DELAYS, RetryScheduler};
pub use state::{InstanceState, InstanceStatus, ServerStatus};
