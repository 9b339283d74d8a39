//! Routing and lifetime management for the pool of supervised servers.
//!
//! Servers are keyed by their serialized config, so two files routed to an
//! identical config share one child process. Workspace-wide operations fan
//! out to every configured server after waiting for indexing readiness.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, ServerConfig, file_extension};
use crate::error::{BridgeError, Result};
use crate::lsp::rpc::{PendingTable, RequestIds, new_pending_table};
use crate::lsp::server::LanguageServer;

/// Hard cap on waiting for workspace indexing.
const INDEXING_TIMEOUT: Duration = Duration::from_secs(15);
/// Interval between `workspace/symbol` probes while waiting for indexing.
const PROBE_INTERVAL: Duration = Duration::from_millis(500);
/// Per-probe request timeout; a probe is advisory and must not stall the wait.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Anchor-file discovery never descends deeper than this.
const DISCOVERY_MAX_DEPTH: usize = 3;

/// The process-wide pool of live language servers.
pub struct ServerRegistry {
    pub config: BridgeConfig,
    servers: DashMap<String, Arc<LanguageServer>>,
    pending: PendingTable,
    ids: Arc<RequestIds>,
    /// Serializes spawns so two tasks demanding the same config cannot race
    /// into two children.
    spawn_lock: tokio::sync::Mutex<()>,
}

impl ServerRegistry {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        Arc::new(ServerRegistry {
            config,
            servers: DashMap::new(),
            pending: new_pending_table(),
            ids: Arc::new(RequestIds::default()),
            spawn_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Maps a path to its responsible server, spawning it on first demand.
    pub async fn server_for_path(self: &Arc<Self>, path: &Path) -> Result<Arc<LanguageServer>> {
        let ext = file_extension(path).ok_or_else(|| {
            BridgeError::Configuration(format!("cannot determine extension of {}", path.display()))
        })?;
        let config = self.config.server_for_extension(ext).ok_or_else(|| {
            BridgeError::Configuration(format!("no LSP server configured for .{ext} files"))
        })?;
        self.get_or_spawn(config.clone()).await
    }

    /// Returns the live server for `config`, spawning a replacement if the
    /// previous child died.
    pub async fn get_or_spawn(self: &Arc<Self>, config: ServerConfig) -> Result<Arc<LanguageServer>> {
        let key = config.key();
        if let Some(server) = self.servers.get(&key) {
            if server.is_alive() {
                return Ok(server.value().clone());
            }
        }

        let _guard = self.spawn_lock.lock().await;
        // Re-check: another task may have spawned while we waited.
        if let Some(server) = self.servers.get(&key) {
            if server.is_alive() {
                return Ok(server.value().clone());
            }
        }
        if let Some((_, dead)) = self.servers.remove(&key) {
            warn!(command = %dead.config.command[0], "server died, replacing");
            dead.shutdown().await;
        }

        let server =
            LanguageServer::spawn(config.clone(), self.pending.clone(), self.ids.clone()).await?;
        if let Some(delay) = config.restart_delay() {
            self.install_restart_timer(&server, delay);
        }
        self.servers.insert(key, server.clone());
        Ok(server)
    }

    /// Registers an externally-constructed server (tests wire stream-backed
    /// servers in through here).
    pub fn insert(&self, server: Arc<LanguageServer>) {
        self.servers.insert(server.key.clone(), server);
    }

    pub fn pending(&self) -> PendingTable {
        self.pending.clone()
    }

    pub fn ids(&self) -> Arc<RequestIds> {
        self.ids.clone()
    }

    fn install_restart_timer(self: &Arc<Self>, server: &Arc<LanguageServer>, delay: Duration) {
        let weak = Arc::downgrade(self);
        let key = server.key.clone();
        info!(after_secs = delay.as_secs(), "scheduling periodic server restart");
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(registry) = weak.upgrade() {
                registry.restart(&key).await;
            }
        });
        server.set_restart_task(task);
    }

    /// Kills and replaces one server. In-flight requests on the old child
    /// are rejected when its reader loop observes the closed pipe. The
    /// respawn re-installs the restart timer, so the cycle continues.
    async fn restart(self: &Arc<Self>, key: &str) {
        let Some((_, old)) = self.servers.remove(key) else {
            return;
        };
        info!(command = %old.config.command[0], "restart interval elapsed, recycling server");
        let config = old.config.clone();
        old.shutdown().await;
        if let Err(e) = self.get_or_spawn(config).await {
            warn!("failed to respawn server after scheduled restart: {e}");
        }
    }

    /// Starts every configured server, waits for initialization, gives each
    /// one a workspace anchor document, and waits for indexing. Returns the
    /// `(key, server)` pairs that made it to ready.
    pub async fn ensure_all_ready(self: &Arc<Self>) -> Vec<(String, Arc<LanguageServer>)> {
        let mut ready = Vec::new();
        for config in self.config.servers.clone() {
            let server = match self.get_or_spawn(config).await {
                Ok(server) => server,
                Err(e) => {
                    warn!("skipping unavailable server: {e}");
                    continue;
                }
            };
            server.readiness.wait().await;

            if server.open_file_count().await == 0 {
                // Many servers index lazily; opening one in-scope file gives
                // them a reason to look at the workspace.
                let root = server.root.clone();
                let extensions = server.config.extensions.clone();
                let anchor =
                    tokio::task::spawn_blocking(move || find_anchor_file(&root, &extensions))
                        .await
                        .ok()
                        .flatten();
                match anchor {
                    Some(anchor) => {
                        if let Err(e) = server.ensure_file_open(&anchor).await {
                            warn!("failed to open anchor file {}: {e}", anchor.display());
                        }
                    }
                    None => debug!(
                        root = %server.root.display(),
                        "no anchor file found for server"
                    ),
                }
            }

            self.await_workspace_indexed(&server).await;
            ready.push((server.key.clone(), server));
        }
        ready
    }

    /// Blocks until the server looks indexed: an end-of-indexing progress
    /// notification, two consecutive identical non-zero symbol counts, or
    /// the fallback timeout, whichever happens first.
    pub async fn await_workspace_indexed(&self, server: &Arc<LanguageServer>) {
        if server.indexing.is_indexed() {
            return;
        }
        let started = Instant::now();
        let mut previous_count: Option<usize> = None;
        loop {
            if server.indexing.is_indexed() {
                return;
            }
            if started.elapsed() >= INDEXING_TIMEOUT {
                debug!("indexing wait hit fallback timeout, proceeding");
                server.indexing.mark_indexed();
                return;
            }

            // Empty query: most servers answer with a bounded sample of
            // everything they have indexed so far.
            match server
                .request_with_timeout("workspace/symbol", json!({"query": ""}), PROBE_TIMEOUT)
                .await
            {
                Ok(value) => {
                    let count = symbol_count(&value);
                    server.indexing.record_files_discovered(count as u64);
                    if previous_count == Some(count) && count > 0 {
                        debug!(count, "symbol count stabilized, workspace indexed");
                        server.indexing.mark_indexed();
                        return;
                    }
                    previous_count = Some(count);
                }
                Err(e) if e.is_method_not_found() => {
                    // No workspace/symbol support means there is nothing to
                    // probe; further waiting cannot learn anything.
                    server.indexing.mark_indexed();
                    return;
                }
                Err(e) => debug!("workspace/symbol probe failed: {e}"),
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    /// Kills every child and clears the registry. Used for both signal
    /// shutdown and the end of the process lifetime.
    pub async fn shutdown_all(&self) {
        let servers: Vec<Arc<LanguageServer>> = self
            .servers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.servers.clear();
        for server in servers {
            server.shutdown().await;
        }
    }
}

fn symbol_count(value: &Value) -> usize {
    value.as_array().map(|a| a.len()).unwrap_or(0)
}

/// First file under `root` handled by `extensions`, honoring `.gitignore`
/// and bounded by the discovery depth.
fn find_anchor_file(root: &Path, extensions: &[String]) -> Option<PathBuf> {
    let walker = ignore::WalkBuilder::new(root)
        .max_depth(Some(DISCOVERY_MAX_DEPTH))
        .build();
    for entry in walker.flatten() {
        let path = entry.path();
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(ext) = file_extension(path) {
            if extensions.iter().any(|e| e == ext) {
                return Some(path.to_path_buf());
            }
        }
    }
    None
}
