// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the client manager.
//!
//! Drives `ClientManager` against in-process fake launchers and clients to
//! check routing, spawn deduplication, retry backoff, teardown, and result
//! aggregation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lsp_types::{
    CompletionItem, Diagnostic, Hover, HoverContents, Location, MarkedString, Position, Range,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, watch};

use lsp_conductor::events::{EventBroadcaster, EventKind, ManagerEvent};
use lsp_conductor::lsp::{
    ClientError, ClientEvent, ClientEventSender, ClientFactory, ClientManager, DIAGNOSTICS_TIMEOUT,
    DiagnosticMap, InstallStage, InstanceState, LaunchError, ProgressReporter, ProtocolClient,
    ServerDefinition, ServerLauncher, ServerProcess, ServerRegistry,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeLauncher {
    spawns: AtomicUsize,
    missing: bool,
    fail: bool,
    report_install: bool,
    gate: Option<watch::Receiver<bool>>,
    gate_first_only: bool,
}

impl FakeLauncher {
    fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn missing() -> Arc<Self> {
        Arc::new(Self {
            missing: true,
            ..Self::default()
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    fn gated(gate: watch::Receiver<bool>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    fn gated_failing(gate: watch::Receiver<bool>) -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            gate: Some(gate),
            ..Self::default()
        })
    }

    fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerLauncher for FakeLauncher {
    async fn spawn(
        &self,
        _root: &Path,
        progress: &ProgressReporter,
    ) -> Result<Option<ServerProcess>, LaunchError> {
        let previous = self.spawns.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = self.gate.as_ref().filter(|_| !self.gate_first_only || previous == 0) {
            let mut gate = gate.clone();
            let opened = gate.wait_for(|open| *open).await.is_ok();
            if !opened {
                return Ok(None);
            }
        }

        if self.report_install {
            progress.report(InstallStage::Installing, "fake-ls");
            progress.report(InstallStage::Complete, "fake-ls");
        }

        if self.missing {
            return Ok(None);
        }
        if self.fail {
            return Err(LaunchError::Install {
                command: "fake-ls".to_string(),
                reason: "exit status: 1".to_string(),
            });
        }
        Ok(Some(ServerProcess::in_process()))
    }

    fn check_installed(&self) -> bool {
        !self.missing
    }
}

/// How a fake client behaves.
#[derive(Clone, Default)]
struct Script {
    init_fails: bool,
    init_hangs: bool,
    wait_hangs: bool,
    fail_queries: bool,
    hover: Option<String>,
    completions: Vec<String>,
    locations: Vec<Location>,
    diagnostics: Vec<Diagnostic>,
}

struct FakeClient {
    server_id: String,
    root: PathBuf,
    script: Script,
    events: ClientEventSender,
    published: Mutex<DiagnosticMap>,
    opened: Mutex<Vec<PathBuf>>,
    saved: Mutex<Vec<PathBuf>>,
    changes: Mutex<Vec<String>>,
    shutdowns: AtomicUsize,
}

impl FakeClient {
    fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn send(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn query_error(method: &str) -> ClientError {
        ClientError::Request {
            method: method.to_string(),
            message: "server crashed".to_string(),
        }
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn root(&self) -> &Path {
        &self.root
    }

    async fn initialize(&self) -> Result<(), ClientError> {
        if self.script.init_hangs {
            std::future::pending::<()>().await;
        }
        if self.script.init_fails {
            return Err(ClientError::Initialize("capabilities rejected".to_string()));
        }
        Ok(())
    }

    async fn open_document(&self, path: &Path) -> Result<(), ClientError> {
        lock(&self.opened).push(path.to_path_buf());
        if !self.script.diagnostics.is_empty() {
            lock(&self.published).insert(path.to_path_buf(), self.script.diagnostics.clone());
            self.send(ClientEvent::Diagnostics {
                path: path.to_path_buf(),
                diagnostics: self.script.diagnostics.clone(),
            });
        }
        Ok(())
    }

    async fn change_document(&self, _path: &Path, content: &str) -> Result<(), ClientError> {
        lock(&self.changes).push(content.to_string());
        Ok(())
    }

    async fn save_document(&self, path: &Path) -> Result<(), ClientError> {
        lock(&self.saved).push(path.to_path_buf());
        Ok(())
    }

    fn diagnostics(&self) -> DiagnosticMap {
        lock(&self.published).clone()
    }

    async fn wait_for_diagnostics(&self, _path: &Path, _timeout: Duration) {
        if self.script.wait_hangs {
            std::future::pending::<()>().await;
        }
    }

    async fn hover(&self, _path: &Path, _position: Position) -> Result<Option<Hover>, ClientError> {
        if self.script.fail_queries {
            return Err(Self::query_error("textDocument/hover"));
        }
        Ok(self.script.hover.clone().map(|text| Hover {
            contents: HoverContents::Scalar(MarkedString::String(text)),
            range: None,
        }))
    }

    async fn completion(
        &self,
        _path: &Path,
        _position: Position,
    ) -> Result<Vec<CompletionItem>, ClientError> {
        if self.script.fail_queries {
            return Err(Self::query_error("textDocument/completion"));
        }
        Ok(self
            .script
            .completions
            .iter()
            .map(|label| CompletionItem {
                label: label.clone(),
                ..CompletionItem::default()
            })
            .collect())
    }

    async fn definition(
        &self,
        _path: &Path,
        _position: Position,
    ) -> Result<Vec<Location>, ClientError> {
        if self.script.fail_queries {
            return Err(Self::query_error("textDocument/definition"));
        }
        Ok(self.script.locations.clone())
    }

    async fn references(
        &self,
        _path: &Path,
        _position: Position,
    ) -> Result<Vec<Location>, ClientError> {
        if self.script.fail_queries {
            return Err(Self::query_error("textDocument/references"));
        }
        Ok(self.script.locations.clone())
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeFactory {
    scripts: Mutex<HashMap<String, Script>>,
    clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self, server_id: &str, script: Script) {
        lock(&self.scripts).insert(server_id.to_string(), script);
    }

    fn clients_of(&self, server_id: &str) -> Vec<Arc<FakeClient>> {
        lock(&self.clients)
            .iter()
            .filter(|c| c.server_id == server_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn connect(
        &self,
        definition: &ServerDefinition,
        root: &Path,
        _process: ServerProcess,
        events: ClientEventSender,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError> {
        let script = lock(&self.scripts)
            .get(definition.id())
            .cloned()
            .unwrap_or_default();
        let client = Arc::new(FakeClient {
            server_id: definition.id().to_string(),
            root: root.to_path_buf(),
            script,
            events,
            published: Mutex::default(),
            opened: Mutex::default(),
            saved: Mutex::default(),
            changes: Mutex::default(),
            shutdowns: AtomicUsize::new(0),
        });
        lock(&self.clients).push(client.clone());
        Ok(client)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A project directory with a `package.json` marker and a `src/` folder.
fn project() -> Result<TempDir> {
    let dir = tempfile::tempdir().context("Failed to create temp dir")?;
    std::fs::write(dir.path().join("package.json"), "{}")?;
    std::fs::create_dir_all(dir.path().join("src"))?;
    Ok(dir)
}

/// Registers each `(id, launcher)` as a `.ts` server rooted at `package.json`.
fn registry(servers: &[(&str, Arc<FakeLauncher>)]) -> Result<ServerRegistry> {
    let mut registry = ServerRegistry::new();
    for (id, launcher) in servers {
        let definition = ServerDefinition::builder(*id, launcher.clone())
            .extensions([".ts"])
            .root_patterns(["package.json"])
            .build()
            .context("Failed to build definition")?;
        registry.register(definition)?;
    }
    Ok(registry)
}

fn manager(registry: ServerRegistry, factory: &Arc<FakeFactory>) -> ClientManager {
    ClientManager::new(registry, factory.clone(), EventBroadcaster::default())
}

fn diagnostic(message: &str, source: Option<&str>) -> Diagnostic {
    Diagnostic {
        range: Range::new(Position::new(0, 0), Position::new(0, 4)),
        message: message.to_string(),
        source: source.map(str::to_string),
        ..Diagnostic::default()
    }
}

fn drain(rx: &mut broadcast::Receiver<ManagerEvent>) -> Vec<EventKind> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event.kind);
    }
    events
}

fn retry_attempts(events: &[EventKind]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            EventKind::ServerRetrying { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect()
}

async fn instance_state(manager: &ClientManager, id: &str) -> Option<(InstanceState, u32)> {
    manager
        .status()
        .await
        .into_iter()
        .find(|s| s.id == id)
        .and_then(|s| s.instances.first().map(|i| (i.state, i.retries)))
}

// ---------------------------------------------------------------------------
// Routing and spawn deduplication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_requests_spawn_each_server_once() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/index.ts");

    let (open, gate) = watch::channel(false);
    let a = FakeLauncher::gated(gate.clone());
    let b = FakeLauncher::gated(gate);
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", a.clone()), ("b", b.clone())])?, &factory);

    let mut callers = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let file = file.clone();
        callers.push(tokio::spawn(async move {
            manager
                .clients_for_file(&file)
                .await
                .iter()
                .map(|c| c.server_id().to_string())
                .collect::<Vec<_>>()
        }));
    }

    while a.spawns() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        instance_state(&manager, "a").await,
        Some((InstanceState::Spawning, 0))
    );
    open.send_replace(true);

    for caller in callers {
        let ids = caller.await.context("caller task failed")?;
        assert_eq!(ids, vec!["a", "b"]);
    }

    assert_eq!(a.spawns(), 1);
    assert_eq!(b.spawns(), 1);
    assert_eq!(factory.clients_of("a").len(), 1);
    assert_eq!(factory.clients_of("b").len(), 1);

    let root = dir.path().to_path_buf();
    assert!(factory.clients_of("a").iter().all(|c| c.root == root));
    assert_eq!(
        instance_state(&manager, "a").await,
        Some((InstanceState::Running, 0))
    );
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_share_one_failed_spawn() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/index.ts");

    let (open, gate) = watch::channel(false);
    let launcher = FakeLauncher::gated_failing(gate);
    let factory = FakeFactory::new();
    let manager = ClientManager::builder(registry(&[("a", launcher.clone())])?, factory.clone())
        .retry_delays(Vec::new())
        .build();

    let mut callers = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let file = file.clone();
        callers.push(tokio::spawn(async move {
            manager.clients_for_file(&file).await.len()
        }));
    }

    while launcher.spawns() == 0 {
        tokio::task::yield_now().await;
    }
    open.send_replace(true);

    for caller in callers {
        assert_eq!(caller.await.context("caller task failed")?, 0);
    }
    assert_eq!(launcher.spawns(), 1);
    assert!(factory.clients_of("a").is_empty());
    assert_eq!(
        instance_state(&manager, "a").await,
        Some((InstanceState::Broken, 0))
    );
    Ok(())
}

#[tokio::test]
async fn test_existing_client_is_reused() -> Result<()> {
    let dir = project()?;
    let launcher = FakeLauncher::ok();
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);

    let first = manager.clients_for_file(&dir.path().join("src/a.ts")).await;
    let second = manager.clients_for_file(&dir.path().join("src/b.ts")).await;

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(launcher.spawns(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unhandled_extension_and_missing_root_are_skipped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let factory = FakeFactory::new();
    let launcher = FakeLauncher::ok();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);

    assert!(manager.clients_for_file(&dir.path().join("x.rs")).await.is_empty());
    // No package.json anywhere above the file.
    assert!(manager.clients_for_file(&dir.path().join("x.ts")).await.is_empty());
    assert_eq!(launcher.spawns(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unavailable_binary_is_not_broken() -> Result<()> {
    let dir = project()?;
    let launcher = FakeLauncher::missing();
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);
    let mut events = manager.subscribe();

    let file = dir.path().join("src/index.ts");
    assert!(manager.clients_for_file(&file).await.is_empty());
    assert_eq!(instance_state(&manager, "a").await, None);

    // Not broken, so the next request tries again.
    assert!(manager.clients_for_file(&file).await.is_empty());
    assert_eq!(launcher.spawns(), 2);
    assert!(retry_attempts(&drain(&mut events)).is_empty());

    let status = manager.status().await;
    assert!(!status[0].installed);
    assert!(status[0].enabled);
    Ok(())
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_failing_server_retries_five_times_then_stays_broken() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/index.ts");
    let a = FakeLauncher::ok();
    let b = FakeLauncher::ok();
    let factory = FakeFactory::new();
    factory.script(
        "a",
        Script {
            init_fails: true,
            ..Script::default()
        },
    );
    let manager = manager(registry(&[("a", a.clone()), ("b", b.clone())])?, &factory);
    let mut events = manager.subscribe();

    let ids: Vec<String> = manager
        .clients_for_file(&file)
        .await
        .iter()
        .map(|c| c.server_id().to_string())
        .collect();
    assert_eq!(ids, vec!["b"]);

    // 1 + 2 + 4 + 8 + 16 seconds of backoff, with room to spare.
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(a.spawns(), 6);
    assert_eq!(retry_attempts(&drain(&mut events)), vec![1, 2, 3, 4, 5]);
    assert_eq!(
        instance_state(&manager, "a").await,
        Some((InstanceState::Broken, 5))
    );

    // Broken instances are skipped without spawning.
    let ids: Vec<String> = manager
        .clients_for_file(&file)
        .await
        .iter()
        .map(|c| c.server_id().to_string())
        .collect();
    assert_eq!(ids, vec!["b"]);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(a.spawns(), 6);
    assert!(manager.is_server_enabled("a").await);

    // Every failed client was shut down.
    assert!(factory.clients_of("a").iter().all(|c| c.shutdowns() == 1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retry_delays_follow_backoff_table() -> Result<()> {
    let dir = project()?;
    let launcher = FakeLauncher::failing();
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);

    assert!(manager.clients_for_file(&dir.path().join("src/x.ts")).await.is_empty());
    assert_eq!(launcher.spawns(), 1);

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert_eq!(launcher.spawns(), 1);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(launcher.spawns(), 2);

    // Second retry is 2000ms after the first one failed.
    tokio::time::sleep(Duration::from_millis(1998)).await;
    assert_eq!(launcher.spawns(), 2);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(launcher.spawns(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_successful_retry_clears_broken_state() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let launcher = FakeLauncher::ok();
    let factory = FakeFactory::new();
    factory.script(
        "a",
        Script {
            init_fails: true,
            ..Script::default()
        },
    );
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);
    let mut events = manager.subscribe();

    assert!(manager.clients_for_file(&file).await.is_empty());
    factory.script("a", Script::default());

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(launcher.spawns(), 2);
    assert_eq!(
        instance_state(&manager, "a").await,
        Some((InstanceState::Running, 0))
    );
    assert_eq!(manager.clients_for_file(&file).await.len(), 1);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, EventKind::ServerStarted { server_id, .. } if server_id == "a"))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_initialize_timeout_marks_broken() -> Result<()> {
    let dir = project()?;
    let launcher = FakeLauncher::ok();
    let factory = FakeFactory::new();
    factory.script(
        "a",
        Script {
            init_hangs: true,
            ..Script::default()
        },
    );
    let manager = ClientManager::builder(registry(&[("a", launcher.clone())])?, factory.clone())
        .initialize_timeout(Some(Duration::from_secs(5)))
        .retry_delays(Vec::new())
        .build();

    assert!(manager.clients_for_file(&dir.path().join("src/x.ts")).await.is_empty());
    assert_eq!(
        instance_state(&manager, "a").await,
        Some((InstanceState::Broken, 0))
    );
    Ok(())
}

#[tokio::test]
async fn test_reset_server_allows_respawn() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let launcher = FakeLauncher::ok();
    let factory = FakeFactory::new();
    factory.script(
        "a",
        Script {
            init_fails: true,
            ..Script::default()
        },
    );
    let manager = ClientManager::builder(registry(&[("a", launcher.clone())])?, factory.clone())
        .retry_delays(Vec::new())
        .build();

    assert!(manager.clients_for_file(&file).await.is_empty());
    assert!(manager.clients_for_file(&file).await.is_empty());
    assert_eq!(launcher.spawns(), 1);

    factory.script("a", Script::default());
    assert_eq!(manager.reset_server("a").await, 1);
    assert_eq!(manager.reset_server("a").await, 0);

    assert_eq!(manager.clients_for_file(&file).await.len(), 1);
    assert_eq!(launcher.spawns(), 2);
    Ok(())
}

// ---------------------------------------------------------------------------
// Enable, disable, shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disable_tears_down_every_root() -> Result<()> {
    let first = project()?;
    let second = project()?;
    let launcher = FakeLauncher::ok();
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);
    let mut events = manager.subscribe();

    assert_eq!(manager.clients_for_file(&first.path().join("src/x.ts")).await.len(), 1);
    assert_eq!(manager.clients_for_file(&second.path().join("src/x.ts")).await.len(), 1);
    assert_eq!(factory.clients_of("a").len(), 2);

    assert!(manager.set_server_enabled("a", false).await);
    assert!(!manager.is_server_enabled("a").await);
    assert!(factory.clients_of("a").iter().all(|c| c.shutdowns() == 1));

    let status = manager.status().await;
    assert!(!status[0].enabled);
    assert!(status[0].instances.is_empty());
    assert!(manager.clients_for_file(&first.path().join("src/x.ts")).await.is_empty());

    let seen = drain(&mut events);
    assert!(seen.contains(&EventKind::ServerStatusChanged {
        server_id: "a".to_string(),
        enabled: false,
    }));
    let closed = seen
        .iter()
        .filter(|e| matches!(e, EventKind::ServerClosed { .. }))
        .count();
    assert_eq!(closed, 2);

    assert!(manager.set_server_enabled("a", true).await);
    assert_eq!(manager.clients_for_file(&first.path().join("src/x.ts")).await.len(), 1);
    assert_eq!(launcher.spawns(), 3);
    Ok(())
}

#[tokio::test]
async fn test_unknown_server_cannot_be_toggled() -> Result<()> {
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", FakeLauncher::ok())])?, &factory);
    assert!(!manager.set_server_enabled("nope", false).await);
    assert!(!manager.is_server_enabled("nope").await);
    Ok(())
}

#[tokio::test]
async fn test_initially_disabled_server_is_never_spawned() -> Result<()> {
    let dir = project()?;
    let launcher = FakeLauncher::ok();
    let factory = FakeFactory::new();
    let manager = ClientManager::builder(registry(&[("a", launcher.clone())])?, factory.clone())
        .disabled(["a"])
        .build();

    assert!(manager.clients_for_file(&dir.path().join("src/x.ts")).await.is_empty());
    assert_eq!(launcher.spawns(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retries() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let failing = FakeLauncher::failing();
    let healthy = FakeLauncher::ok();
    let factory = FakeFactory::new();
    let manager = manager(
        registry(&[("a", failing.clone()), ("b", healthy.clone())])?,
        &factory,
    );

    assert_eq!(manager.clients_for_file(&file).await.len(), 1);
    manager.shutdown().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(failing.spawns(), 1);
    assert!(factory.clients_of("b").iter().all(|c| c.shutdowns() == 1));
    assert!(manager.status().await.iter().all(|s| s.instances.is_empty()));
    Ok(())
}

#[tokio::test]
async fn test_spawn_finishing_after_shutdown_is_discarded() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let (open, gate) = watch::channel(false);
    let launcher = FakeLauncher::gated(gate);
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);

    let caller = {
        let manager = manager.clone();
        let file = file.clone();
        tokio::spawn(async move { manager.clients_for_file(&file).await.len() })
    };
    while launcher.spawns() == 0 {
        tokio::task::yield_now().await;
    }

    manager.shutdown().await;
    open.send_replace(true);

    assert_eq!(caller.await.context("caller task failed")?, 0);
    let clients = factory.clients_of("a");
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].shutdowns(), 1);
    assert_eq!(instance_state(&manager, "a").await, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failure_finishing_after_shutdown_is_not_retried() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let (open, gate) = watch::channel(false);
    let launcher = FakeLauncher::gated_failing(gate);
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);
    let mut events = manager.subscribe();

    let caller = {
        let manager = manager.clone();
        let file = file.clone();
        tokio::spawn(async move { manager.clients_for_file(&file).await.len() })
    };
    while launcher.spawns() == 0 {
        tokio::task::yield_now().await;
    }

    manager.shutdown().await;
    open.send_replace(true);
    assert_eq!(caller.await.context("caller task failed")?, 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(launcher.spawns(), 1);
    assert!(retry_attempts(&drain(&mut events)).is_empty());
    assert_eq!(instance_state(&manager, "a").await, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stale_unavailable_spawn_keeps_newer_failure() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let (open, gate) = watch::channel(false);
    let launcher = Arc::new(FakeLauncher {
        fail: true,
        gate: Some(gate),
        gate_first_only: true,
        ..FakeLauncher::default()
    });
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);

    let stale = {
        let manager = manager.clone();
        let file = file.clone();
        tokio::spawn(async move { manager.clients_for_file(&file).await.len() })
    };
    while launcher.spawns() == 0 {
        tokio::task::yield_now().await;
    }
    manager.shutdown().await;

    // A fresh spawn of the same key fails and schedules its first retry.
    assert!(manager.clients_for_file(&file).await.is_empty());
    assert_eq!(
        instance_state(&manager, "a").await,
        Some((InstanceState::Broken, 1))
    );

    // The pre-shutdown spawn now finds no binary.
    drop(open);
    assert_eq!(stale.await.context("stale caller failed")?, 0);
    assert_eq!(
        instance_state(&manager, "a").await,
        Some((InstanceState::Broken, 1))
    );

    tokio::time::sleep(Duration::from_millis(1001)).await;
    assert_eq!(launcher.spawns(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_touch_file_bounds_each_diagnostics_wait() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let factory = FakeFactory::new();
    factory.script(
        "a",
        Script {
            wait_hangs: true,
            ..Script::default()
        },
    );
    let manager = manager(
        registry(&[("a", FakeLauncher::ok()), ("b", FakeLauncher::ok())])?,
        &factory,
    );

    let started = tokio::time::Instant::now();
    let touched = tokio::time::timeout(Duration::from_secs(30), manager.touch_file(&file, true))
        .await
        .context("touch_file never returned")?;
    let elapsed = started.elapsed();

    assert_eq!(touched, 2);
    assert!(elapsed >= DIAGNOSTICS_TIMEOUT, "returned early after {elapsed:?}");
    assert!(elapsed < DIAGNOSTICS_TIMEOUT + Duration::from_millis(100));
    assert_eq!(factory.clients_of("a").len(), 1);
    assert_eq!(factory.clients_of("b").len(), 1);
    Ok(())
}

// ---------------------------------------------------------------------------
// Fan-out and aggregation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_diagnostics_union_is_tagged_by_server() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let factory = FakeFactory::new();
    factory.script(
        "a",
        Script {
            diagnostics: vec![diagnostic("unused variable", None)],
            ..Script::default()
        },
    );
    factory.script(
        "b",
        Script {
            diagnostics: vec![diagnostic("unused variable", Some("eslint"))],
            ..Script::default()
        },
    );
    let manager = manager(
        registry(&[("a", FakeLauncher::ok()), ("b", FakeLauncher::ok())])?,
        &factory,
    );
    let mut events = manager.subscribe();

    assert_eq!(manager.touch_file(&file, true).await, 2);

    let all = manager.all_diagnostics().await;
    let merged = all.get(&file).context("no diagnostics for file")?;
    let sources: HashSet<&str> = merged.iter().filter_map(|d| d.source.as_deref()).collect();
    assert_eq!(merged.len(), 2);
    assert_eq!(sources, HashSet::from(["a", "eslint"]));

    assert_eq!(manager.diagnostics_for_file(&file).await.len(), 2);
    assert!(
        manager
            .diagnostics_for_file(&dir.path().join("src/other.ts"))
            .await
            .is_empty()
    );

    // Published diagnostics are forwarded untouched.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let forwarded: Vec<EventKind> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, EventKind::Diagnostics { .. }))
        .collect();
    assert_eq!(forwarded.len(), 2);
    assert!(forwarded.iter().any(|e| matches!(
        e,
        EventKind::Diagnostics { server_id, diagnostics, .. }
            if server_id == "a" && diagnostics[0].source.is_none()
    )));
    Ok(())
}

#[tokio::test]
async fn test_queries_survive_a_failing_server() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let location = Location::new(
        "file:///proj/src/y.ts".parse()?,
        Range::new(Position::new(3, 0), Position::new(3, 5)),
    );
    let factory = FakeFactory::new();
    factory.script(
        "a",
        Script {
            fail_queries: true,
            ..Script::default()
        },
    );
    factory.script(
        "b",
        Script {
            hover: Some("fn y()".to_string()),
            completions: vec!["y".to_string(), "z".to_string()],
            locations: vec![location.clone()],
            ..Script::default()
        },
    );
    factory.script(
        "c",
        Script {
            hover: Some("shadowed".to_string()),
            completions: vec!["w".to_string()],
            locations: vec![location.clone()],
            ..Script::default()
        },
    );
    let manager = manager(
        registry(&[
            ("a", FakeLauncher::ok()),
            ("b", FakeLauncher::ok()),
            ("c", FakeLauncher::ok()),
        ])?,
        &factory,
    );
    let position = Position::new(1, 2);

    let refs = manager.references(&file, position).await;
    assert_eq!(refs, vec![location.clone(), location.clone()]);

    let defs = manager.definition(&file, position).await;
    assert_eq!(defs, vec![location]);

    let hover = manager.hover(&file, position).await.context("no hover")?;
    assert_eq!(
        hover.contents,
        HoverContents::Scalar(MarkedString::String("fn y()".to_string()))
    );

    let labels: Vec<String> = manager
        .completion(&file, position)
        .await
        .into_iter()
        .map(|c| c.label)
        .collect();
    assert_eq!(labels, vec!["y", "z", "w"]);
    Ok(())
}

#[tokio::test]
async fn test_change_and_save_reach_every_server() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let factory = FakeFactory::new();
    let manager = manager(
        registry(&[("a", FakeLauncher::ok()), ("b", FakeLauncher::ok())])?,
        &factory,
    );

    manager.file_changed(&file, Some("let x = 1;")).await;
    manager.file_changed(&file, None).await;
    manager.file_saved(&file).await;

    for id in ["a", "b"] {
        let client = factory
            .clients_of(id)
            .into_iter()
            .next()
            .context("client missing")?;
        assert_eq!(*lock(&client.changes), vec!["let x = 1;".to_string()]);
        assert_eq!(*lock(&client.opened), vec![file.clone()]);
        assert_eq!(*lock(&client.saved), vec![file.clone()]);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Client events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_lifecycle_events_and_closed_client_removal() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let launcher = Arc::new(FakeLauncher {
        report_install: true,
        ..FakeLauncher::default()
    });
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);
    let mut events = manager.subscribe();

    assert_eq!(manager.clients_for_file(&file).await.len(), 1);

    let seen = drain(&mut events);
    let stages: Vec<InstallStage> = seen
        .iter()
        .filter_map(|e| match e {
            EventKind::ServerInstalling { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec![InstallStage::Installing, InstallStage::Complete]);
    assert!(seen.contains(&EventKind::ServerStarted {
        server_id: "a".to_string(),
        root: dir.path().to_path_buf(),
    }));

    let client = factory
        .clients_of("a")
        .into_iter()
        .next()
        .context("client missing")?;
    client.send(ClientEvent::Closed);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(event) = events.recv().await
                && matches!(event.kind, EventKind::ServerClosed { .. })
            {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "ServerClosed was not emitted");
    assert_eq!(instance_state(&manager, "a").await, None);

    // Closed is not broken: the next request spawns a fresh client.
    assert_eq!(manager.clients_for_file(&file).await.len(), 1);
    assert_eq!(launcher.spawns(), 2);
    Ok(())
}

#[tokio::test]
async fn test_runtime_error_marks_instance_broken() -> Result<()> {
    let dir = project()?;
    let file = dir.path().join("src/x.ts");
    let launcher = FakeLauncher::ok();
    let factory = FakeFactory::new();
    let manager = manager(registry(&[("a", launcher.clone())])?, &factory);

    assert_eq!(manager.clients_for_file(&file).await.len(), 1);
    let client = factory
        .clients_of("a")
        .into_iter()
        .next()
        .context("client missing")?;
    client.send(ClientEvent::Error("broken pipe".to_string()));

    let mut state = instance_state(&manager, "a").await;
    for _ in 0..100 {
        if state.is_some_and(|(s, _)| s == InstanceState::Broken) {
            break;
        }
        tokio::task::yield_now().await;
        state = instance_state(&manager, "a").await;
    }
    assert_eq!(state, Some((InstanceState::Broken, 0)));
    assert_eq!(client.shutdowns(), 1);
    assert!(manager.clients_for_file(&file).await.is_empty());
    assert_eq!(launcher.spawns(), 1);
    Ok(())
}
