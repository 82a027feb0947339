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

use lsp_types::{CompletionItem, Diagnostic, Hover, Location, Position};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::events::{EventBroadcaster, EventKind, ManagerEvent};
use crate::lsp::client::{ClientEvent, ClientFactory, DiagnosticMap, ProtocolClient};
use crate::lsp::diagnostics::DiagnosticsAggregator;
use crate::lsp::error::{ClientError, RegistryError};
use crate::lsp::launcher::ProgressReporter;
use crate::lsp::registry::{InstanceKey, ServerDefinition, ServerRegistry};
use crate::lsp::retry::{RETRY_DELAYS, RetryScheduler};
use crate::lsp::state::{InstanceState, InstanceStatus, ServerStatus};

/// Default per-client wait in [`ClientManager::touch_file`].
pub const DIAGNOSTICS_TIMEOUT: Duration = Duration::from_millis(3000);

type Client = Arc<dyn ProtocolClient>;

/// `None` until the spawn settles, then the client it produced, if any.
type SpawnWatch = watch::Receiver<Option<Option<Client>>>;

/// Result of one spawn-and-initialize attempt.
enum Attempt {
    Ready(Client),
    Unavailable,
    Failed(String),
}

#[derive(Default)]
struct ManagerState {
    clients: HashMap<InstanceKey, Client>,
    spawning: HashMap<InstanceKey, SpawnWatch>,
    broken: HashSet<InstanceKey>,
    disabled: HashSet<String>,
    epoch: u64,
}

struct Shared {
    registry: ServerRegistry,
    factory: Arc<dyn ClientFactory>,
    state: Mutex<ManagerState>,
    retries: RetryScheduler,
    events: EventBroadcaster,
    diagnostics_timeout: Duration,
    initialize_timeout: Option<Duration>,
}

/// Manages the lifecycle of protocol clients: routing files to servers,
/// spawning one client per `(server, root)`, retrying failures, and
/// aggregating results.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ClientManager {
    shared: Arc<Shared>,
}

/// Configures a [`ClientManager`].
pub struct ManagerBuilder {
    registry: ServerRegistry,
    factory: Arc<dyn ClientFactory>,
    events: EventBroadcaster,
    diagnostics_timeout: Duration,
    initialize_timeout: Option<Duration>,
    retry_delays: Vec<Duration>,
    disabled: HashSet<String>,
}

impl ManagerBuilder {
    /// Broadcaster to publish events on.
    #[must_use]
    pub fn events(mut self, events: EventBroadcaster) -> Self {
        self.events = events;
        self
    }

    /// Per-client diagnostics wait in `touch_file`.
    #[must_use]
    pub const fn diagnostics_timeout(mut self, timeout: Duration) -> Self {
        self.diagnostics_timeout = timeout;
        self
    }

    /// Bound on the initialize handshake. `None` waits indefinitely.
    #[must_use]
    pub const fn initialize_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.initialize_timeout = timeout;
        self
    }

    /// Backoff table for failed spawns.
    #[must_use]
    pub fn retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Server ids that start out disabled.
    #[must_use]
    pub fn disabled<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Builds the manager.
    #[must_use]
    pub fn build(self) -> ClientManager {
        ClientManager {
            shared: Arc::new(Shared {
                registry: self.registry,
                factory: self.factory,
                state: Mutex::new(ManagerState {
                    disabled: self.disabled,
                    ..ManagerState::default()
                }),
                retries: RetryScheduler::with_delays(self.retry_delays),
                events: self.events,
                diagnostics_timeout: self.diagnostics_timeout,
                initialize_timeout: self.initialize_timeout,
            }),
        }
    }
}

impl ClientManager {
    /// Creates a `ClientManager` with default timeouts and backoff.
    #[must_use]
    pub fn new(
        registry: ServerRegistry,
        factory: Arc<dyn ClientFactory>,
        events: EventBroadcaster,
    ) -> Self {
        Self::builder(registry, factory).events(events).build()
    }

    /// Starts configuring a `ClientManager`.
    #[must_use]
    pub fn builder(registry: ServerRegistry, factory: Arc<dyn ClientFactory>) -> ManagerBuilder {
        ManagerBuilder {
            registry,
            factory,
            events: EventBroadcaster::default(),
            diagnostics_timeout: DIAGNOSTICS_TIMEOUT,
            initialize_timeout: None,
            retry_delays: RETRY_DELAYS.to_vec(),
            disabled: HashSet::new(),
        }
    }

    /// Creates a `ClientManager` from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured server definition is invalid.
    pub fn from_config(
        config: &Config,
        factory: Arc<dyn ClientFactory>,
        events: EventBroadcaster,
    ) -> Result<Self, RegistryError> {
        let registry = ServerRegistry::from_config(config)?;
        Ok(Self::builder(registry, factory)
            .events(events)
            .diagnostics_timeout(config.diagnostics_timeout())
            .initialize_timeout(config.initialize_timeout())
            .retry_delays(config.retry_delays())
            .disabled(config.initially_disabled())
            .build())
    }

    /// The server table this manager routes against.
    #[must_use]
    pub fn registry(&self) -> &ServerRegistry {
        &self.shared.registry
    }

    /// Subscribe to lifecycle and diagnostics events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.shared.events.subscribe()
    }

    /// Returns a usable client for every server that applies to `path`,
    /// spawning or joining in-flight spawns as needed.
    ///
    /// Servers that are disabled, find no project root, are broken, or are
    /// not installed are left out.
    pub async fn clients_for_file(&self, path: &Path) -> Vec<Arc<dyn ProtocolClient>> {
        let path = absolute(path);
        let mut clients = Vec::new();
        for definition in self.shared.registry.for_file(&path) {
            if let Some(client) = self.shared.client_for(definition, &path).await {
                clients.push(client);
            }
        }
        clients
    }

    /// Opens `path` on every applicable server, optionally waiting for each
    /// to publish diagnostics. Returns how many servers handled the file.
    pub async fn touch_file(&self, path: &Path, wait_for_diagnostics: bool) -> usize {
        let path = absolute(path);
        let mut opened = Vec::new();
        for client in self.clients_for_file(&path).await {
            match client.open_document(&path).await {
                Ok(()) => opened.push(client),
                Err(e) => debug!(
                    server = client.server_id(),
                    path = %path.display(),
                    "open failed: {e}"
                ),
            }
        }

        if wait_for_diagnostics && !opened.is_empty() {
            let limit = self.shared.diagnostics_timeout;
            let mut waits = JoinSet::new();
            for client in &opened {
                let client = client.clone();
                let path = path.clone();
                waits.spawn(async move {
                    if tokio::time::timeout(limit, client.wait_for_diagnostics(&path, limit))
                        .await
                        .is_err()
                    {
                        debug!(server = client.server_id(), "diagnostics wait timed out");
                    }
                });
            }
            while waits.join_next().await.is_some() {}
        }

        opened.len()
    }

    /// Sends new contents for `path`, or re-opens it when `content` is
    /// `None`.
    pub async fn file_changed(&self, path: &Path, content: Option<&str>) {
        let path = absolute(path);
        for client in self.clients_for_file(&path).await {
            let result = match content {
                Some(text) => client.change_document(&path, text).await,
                None => client.open_document(&path).await,
            };
            if let Err(e) = result {
                debug!(server = client.server_id(), "change notification failed: {e}");
            }
        }
    }

    /// Notifies every applicable server that `path` was saved.
    pub async fn file_saved(&self, path: &Path) {
        let path = absolute(path);
        for client in self.clients_for_file(&path).await {
            if let Err(e) = client.save_document(&path).await {
                debug!(server = client.server_id(), "save notification failed: {e}");
            }
        }
    }

    /// Hover from the first server that has something to say.
    pub async fn hover(&self, path: &Path, position: Position) -> Option<Hover> {
        let path = absolute(path);
        for client in self.clients_for_file(&path).await {
            match client.hover(&path, position).await {
                Ok(Some(hover)) => return Some(hover),
                Ok(None) => {}
                Err(e) => log_query_error(client.as_ref(), "hover", &e),
            }
        }
        None
    }

    /// Definition locations from the first server that finds any.
    pub async fn definition(&self, path: &Path, position: Position) -> Vec<Location> {
        let path = absolute(path);
        for client in self.clients_for_file(&path).await {
            match client.definition(&path, position).await {
                Ok(locations) if !locations.is_empty() => return locations,
                Ok(_) => {}
                Err(e) => log_query_error(client.as_ref(), "definition", &e),
            }
        }
        Vec::new()
    }

    /// Completion items from every applicable server.
    pub async fn completion(&self, path: &Path, position: Position) -> Vec<CompletionItem> {
        let path = absolute(path);
        let mut items = Vec::new();
        for client in self.clients_for_file(&path).await {
            match client.completion(&path, position).await {
                Ok(found) => items.extend(found),
                Err(e) => log_query_error(client.as_ref(), "completion", &e),
            }
        }
        items
    }

    /// Reference locations from every applicable server.
    pub async fn references(&self, path: &Path, position: Position) -> Vec<Location> {
        let path = absolute(path);
        let mut locations = Vec::new();
        for client in self.clients_for_file(&path).await {
            match client.references(&path, position).await {
                Ok(found) => locations.extend(found),
                Err(e) => log_query_error(client.as_ref(), "references", &e),
            }
        }
        locations
    }

    /// Every live client's diagnostics, concatenated per file.
    pub async fn all_diagnostics(&self) -> DiagnosticMap {
        let mut aggregator = DiagnosticsAggregator::new();
        for client in self.shared.live_clients().await {
            aggregator.extend(client.server_id(), client.diagnostics());
        }
        aggregator.into_inner()
    }

    /// Diagnostics for one file from every live client.
    pub async fn diagnostics_for_file(&self, path: &Path) -> Vec<Diagnostic> {
        let path = absolute(path);
        let mut aggregator = DiagnosticsAggregator::new();
        for client in self.shared.live_clients().await {
            if let Some(diagnostics) = client.diagnostics().remove(&path) {
                aggregator.extend_file(client.server_id(), &path, diagnostics);
            }
        }
        aggregator.into_file(&path)
    }

    /// Status of every registered server, in registration order.
    pub async fn status(&self) -> Vec<ServerStatus> {
        let (instances, disabled) = {
            let state = self.shared.state.lock().await;
            let mut instances: BTreeMap<InstanceKey, InstanceState> = BTreeMap::new();
            for key in state.clients.keys() {
                instances.insert(key.clone(), InstanceState::Running);
            }
            for key in &state.broken {
                instances.entry(key.clone()).or_insert(InstanceState::Broken);
            }
            for key in state.spawning.keys() {
                instances.insert(key.clone(), InstanceState::Spawning);
            }
            (instances, state.disabled.clone())
        };

        self.shared
            .registry
            .iter()
            .map(|definition| ServerStatus {
                id: definition.id().to_string(),
                name: definition.name().to_string(),
                enabled: !disabled.contains(definition.id()),
                installed: definition.launcher().check_installed(),
                extensions: definition.extensions().iter().cloned().collect(),
                instances: instances
                    .iter()
                    .filter(|(key, _)| key.server_id() == definition.id())
                    .map(|(key, state)| InstanceStatus {
                        root: key.root().to_path_buf(),
                        state: *state,
                        retries: self.shared.retries.retry_count(key),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Enables or disables a server id. Disabling shuts down every live
    /// instance of that server. Returns `false` for unknown ids.
    pub async fn set_server_enabled(&self, id: &str, enabled: bool) -> bool {
        if !self.shared.registry.contains(id) {
            debug!(server = id, "ignoring enable/disable of unknown server");
            return false;
        }

        let (changed, removed) = {
            let mut state = self.shared.state.lock().await;
            if enabled {
                (state.disabled.remove(id), Vec::new())
            } else {
                let changed = state.disabled.insert(id.to_string());
                let keys: Vec<InstanceKey> = state
                    .clients
                    .keys()
                    .filter(|k| k.server_id() == id)
                    .cloned()
                    .collect();
                let removed: Vec<(InstanceKey, Client)> = keys
                    .into_iter()
                    .filter_map(|k| state.clients.remove(&k).map(|c| (k, c)))
                    .collect();
                (changed, removed)
            }
        };

        if changed {
            info!(server = id, enabled, "Server status changed");
            self.shared.events.send(EventKind::ServerStatusChanged {
                server_id: id.to_string(),
                enabled,
            });
        }

        self.shared.shutdown_clients(removed).await;
        true
    }

    /// Whether `id` is registered and not disabled.
    pub async fn is_server_enabled(&self, id: &str) -> bool {
        self.shared.registry.contains(id) && !self.shared.state.lock().await.disabled.contains(id)
    }

    /// Forgets failures for every instance of `id` so routing may spawn it
    /// again. Returns the number of broken instances cleared.
    pub async fn reset_server(&self, id: &str) -> usize {
        let cleared = {
            let mut state = self.shared.state.lock().await;
            let before = state.broken.len();
            state.broken.retain(|k| k.server_id() != id);
            before - state.broken.len()
        };
        self.shared.retries.clear_server(id);
        if cleared > 0 {
            info!(server = id, cleared, "Reset broken server instances");
        }
        cleared
    }

    /// Cancels pending retries and shuts down every live client.
    pub async fn shutdown(&self) {
        let clients: Vec<(InstanceKey, Client)> = {
            let mut state = self.shared.state.lock().await;
            // Retries are only scheduled under this lock.
            state.epoch += 1;
            self.shared.retries.cancel_all();
            state.broken.clear();
            state.spawning.clear();
            state.clients.drain().collect()
        };
        if !clients.is_empty() {
            info!(count = clients.len(), "Shutting down language servers");
        }
        self.shared.shutdown_clients(clients).await;
    }
}

impl Shared {
    async fn live_clients(&self) -> Vec<Client> {
        let state = self.state.lock().await;
        let mut clients: Vec<(&InstanceKey, &Client)> = state.clients.iter().collect();
        clients.sort_by(|a, b| a.0.cmp(b.0));
        clients.into_iter().map(|(_, c)| c.clone()).collect()
    }

    async fn client_for(
        self: &Arc<Self>,
        definition: Arc<ServerDefinition>,
        file: &Path,
    ) -> Option<Client> {
        if self.state.lock().await.disabled.contains(definition.id()) {
            return None;
        }

        let Some(root) = definition.detect_root(file) else {
            debug!(server = definition.id(), file = %file.display(), "no project root");
            return None;
        };
        let key = InstanceKey::new(definition.id(), root);

        let pending = {
            let mut state = self.state.lock().await;
            if state.disabled.contains(definition.id()) || state.broken.contains(&key) {
                return None;
            }
            if let Some(client) = state.clients.get(&key) {
                return Some(client.clone());
            }
            let joinable = state
                .spawning
                .get(&key)
                .filter(|pending| pending.has_changed().is_ok())
                .cloned();
            match joinable {
                Some(pending) => pending,
                None => self.begin_spawn(&mut state, definition, key),
            }
        };

        settled(pending).await
    }

    /// Reserves `spawning[key]` and runs the spawn in a detached task.
    /// Must be called with the state lock held.
    fn begin_spawn(
        self: &Arc<Self>,
        state: &mut ManagerState,
        definition: Arc<ServerDefinition>,
        key: InstanceKey,
    ) -> SpawnWatch {
        let (tx, rx) = watch::channel(None);
        state.spawning.insert(key.clone(), rx.clone());
        let epoch = state.epoch;
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.run_spawn(definition, key, epoch, tx).await;
        });
        rx
    }

    async fn run_spawn(
        self: Arc<Self>,
        definition: Arc<ServerDefinition>,
        key: InstanceKey,
        epoch: u64,
        tx: watch::Sender<Option<Option<Client>>>,
    ) {
        let attempt = self.attempt(&definition, &key).await;

        let mut discard = None;
        let mut started = false;

        {
            let mut state = self.state.lock().await;
            let current = state.epoch == epoch;
            let outcome = match attempt {
                Attempt::Ready(client) => {
                    if current && !state.disabled.contains(key.server_id()) {
                        state.clients.insert(key.clone(), client.clone());
                        state.broken.remove(&key);
                        self.retries.clear(&key);
                        started = true;
                        Some(client)
                    } else {
                        discard = Some(client);
                        None
                    }
                }
                Attempt::Unavailable => {
                    if current {
                        state.broken.remove(&key);
                        self.retries.clear(&key);
                    }
                    None
                }
                Attempt::Failed(reason) => {
                    warn!(
                        server = key.server_id(),
                        root = %key.root().display(),
                        "Server failed to start: {reason}"
                    );
                    if current {
                        state.broken.insert(key.clone());
                        if !state.disabled.contains(key.server_id()) {
                            self.schedule_retry(definition, key.clone(), epoch);
                        }
                    }
                    None
                }
            };
            if current {
                state.spawning.remove(&key);
            }
            tx.send_replace(Some(outcome));
        }

        if started {
            info!(server = key.server_id(), root = %key.root().display(), "Server started");
            self.events.send(EventKind::ServerStarted {
                server_id: key.server_id().to_string(),
                root: key.root().to_path_buf(),
            });
        }

        if let Some(client) = discard {
            debug!(server = key.server_id(), "discarding client started after teardown");
            shutdown_quietly(client.as_ref()).await;
        }
    }

    /// Spawns the process, connects a client, and runs the handshake.
    async fn attempt(
        self: &Arc<Self>,
        definition: &ServerDefinition,
        key: &InstanceKey,
    ) -> Attempt {
        let progress = self.progress_reporter(definition.id());
        let process = match definition.launcher().spawn(key.root(), &progress).await {
            Ok(Some(process)) => process,
            Ok(None) => {
                info!(server = definition.id(), "Language server not installed, skipping");
                return Attempt::Unavailable;
            }
            Err(e) => return Attempt::Failed(e.to_string()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let client = match self.factory.connect(definition, key.root(), process, tx).await {
            Ok(client) => client,
            Err(e) => return Attempt::Failed(e.to_string()),
        };
        self.start_event_pump(key.clone(), &client, rx);

        let initialized = match self.initialize_timeout {
            Some(limit) => tokio::time::timeout(limit, client.initialize())
                .await
                .unwrap_or(Err(ClientError::InitializeTimeout(limit))),
            None => client.initialize().await,
        };

        match initialized {
            Ok(()) => Attempt::Ready(client),
            Err(e) => {
                shutdown_quietly(client.as_ref()).await;
                Attempt::Failed(e.to_string())
            }
        }
    }

    fn progress_reporter(&self, server_id: &str) -> ProgressReporter {
        let events = self.events.clone();
        let server_id = server_id.to_string();
        ProgressReporter::new(move |stage, package| {
            events.send(EventKind::ServerInstalling {
                server_id: server_id.clone(),
                stage,
                package: package.to_string(),
            });
        })
    }

    /// Must be called with the state lock held.
    fn schedule_retry(
        self: &Arc<Self>,
        definition: Arc<ServerDefinition>,
        key: InstanceKey,
        epoch: u64,
    ) {
        let weak = Arc::downgrade(self);
        let retry_key = key.clone();
        let scheduled = self.retries.schedule(&key, move || async move {
            if let Some(shared) = weak.upgrade() {
                shared.retry(definition, retry_key, epoch).await;
            }
        });

        match scheduled {
            Some(attempt) => {
                info!(
                    server = key.server_id(),
                    root = %key.root().display(),
                    attempt,
                    "Retry scheduled"
                );
                self.events.send(EventKind::ServerRetrying {
                    server_id: key.server_id().to_string(),
                    root: key.root().to_path_buf(),
                    attempt,
                });
            }
            None => warn!(
                server = key.server_id(),
                root = %key.root().display(),
                "Server keeps failing, leaving it broken"
            ),
        }
    }

    async fn retry(
        self: Arc<Self>,
        definition: Arc<ServerDefinition>,
        key: InstanceKey,
        epoch: u64,
    ) {
        let mut state = self.state.lock().await;
        if state.epoch != epoch
            || state.disabled.contains(key.server_id())
            || state.clients.contains_key(&key)
            || state.spawning.contains_key(&key)
        {
            debug!(instance = %key, "skipping retry");
            return;
        }
        debug!(instance = %key, "retrying spawn");
        drop(self.begin_spawn(&mut state, definition, key));
    }

    fn start_event_pump(
        self: &Arc<Self>,
        key: InstanceKey,
        client: &Client,
        mut rx: mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let weak = Arc::downgrade(self);
        let instance = Arc::downgrade(client);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                match event {
                    ClientEvent::Diagnostics { path, diagnostics } => {
                        shared.events.send(EventKind::Diagnostics {
                            server_id: key.server_id().to_string(),
                            path,
                            diagnostics,
                        });
                    }
                    ClientEvent::Closed => shared.on_closed(&key, &instance).await,
                    ClientEvent::Error(message) => shared.on_error(&key, &instance, &message).await,
                }
            }
        });
    }

    /// Removes `key` from the live map if it still maps to `instance`.
    fn take_registered(
        state: &mut ManagerState,
        key: &InstanceKey,
        instance: &Weak<dyn ProtocolClient>,
    ) -> Option<Client> {
        let registered = state
            .clients
            .get(key)
            .is_some_and(|c| Weak::ptr_eq(&Arc::downgrade(c), instance));
        if registered {
            state.clients.remove(key)
        } else {
            None
        }
    }

    async fn on_closed(&self, key: &InstanceKey, instance: &Weak<dyn ProtocolClient>) {
        let removed = Self::take_registered(&mut *self.state.lock().await, key, instance);
        if removed.is_some() {
            info!(server = key.server_id(), root = %key.root().display(), "Server closed");
            self.events.send(EventKind::ServerClosed {
                server_id: key.server_id().to_string(),
                root: key.root().to_path_buf(),
            });
        }
    }

    async fn on_error(
        &self,
        key: &InstanceKey,
        instance: &Weak<dyn ProtocolClient>,
        message: &str,
    ) {
        let removed = {
            let mut state = self.state.lock().await;
            let removed = Self::take_registered(&mut state, key, instance);
            if removed.is_some() {
                state.broken.insert(key.clone());
            }
            removed
        };
        if let Some(client) = removed {
            warn!(
                server = key.server_id(),
                root = %key.root().display(),
                "Server error, marking broken: {message}"
            );
            shutdown_quietly(client.as_ref()).await;
            self.events.send(EventKind::ServerClosed {
                server_id: key.server_id().to_string(),
                root: key.root().to_path_buf(),
            });
        }
    }

    async fn shutdown_clients(&self, clients: Vec<(InstanceKey, Client)>) {
        let mut tasks = JoinSet::new();
        for (key, client) in clients {
            tasks.spawn(async move {
                shutdown_quietly(client.as_ref()).await;
                key
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Ok(key) = joined {
                self.events.send(EventKind::ServerClosed {
                    server_id: key.server_id().to_string(),
                    root: key.root().to_path_buf(),
                });
            }
        }
    }
}

async fn settled(mut pending: SpawnWatch) -> Option<Client> {
    pending
        .wait_for(|outcome| outcome.is_some())
        .await
        .ok()
        .and_then(|outcome| outcome.clone().flatten())
}

async fn shutdown_quietly(client: &dyn ProtocolClient) {
    if let Err(e) = client.shutdown().await {
        warn!(
            server = client.server_id(),
            root = %client.root().display(),
            "Failed to shut down server: {e}"
        );
    }
}

fn log_query_error(client: &dyn ProtocolClient, method: &str, error: &ClientError) {
    debug!(server = client.server_id(), method, "query failed: {error}");
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
