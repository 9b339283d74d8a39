//! Lifecycle and state for one supervised language server child.
//!
//! A [`LanguageServer`] is created by spawning the configured command,
//! wiring its stdio into the framed transport, and driving the LSP
//! `initialize` handshake. The struct doubles as the per-server state bag:
//! capabilities, open documents, cached diagnostics and indexing progress
//! all live here. Document-sync methods are in `documents.rs`, in a separate
//! impl block, the way the backend impls are split in larger servers.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lsp_types::{
    ClientCapabilities, ClientInfo, CompletionClientCapabilities, CompletionItemCapability,
    DiagnosticClientCapabilities, DocumentSymbolClientCapabilities, GotoCapability,
    HoverClientCapabilities, InitializeParams, InitializeResult, PublishDiagnosticsClientCapabilities,
    ReferenceClientCapabilities, RenameClientCapabilities, ServerCapabilities,
    SignatureHelpClientCapabilities, SymbolKind, SymbolKindCapability,
    TextDocumentClientCapabilities, TextDocumentSyncClientCapabilities, WindowClientCapabilities,
    WorkspaceClientCapabilities, WorkspaceFolder, WorkspaceSymbolClientCapabilities,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::{BridgeError, Result};
use crate::lsp::diagnostics::DiagnosticStore;
use crate::lsp::rpc::{
    DEFAULT_REQUEST_TIMEOUT, NotificationSink, PendingTable, RequestIds, RpcClient,
};
use crate::uri::path_to_uri;

/// How long to wait for the server's own `initialized` notification before
/// proceeding optimistically. Most servers never send one.
const INITIALIZED_GRACE: Duration = Duration::from_secs(3);

/// Grace period for the `shutdown`/`exit` handshake before the child is
/// killed outright.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// One-shot readiness latch released by the `initialized` notification or by
/// the optimistic grace timeout, whichever comes first.
#[derive(Default)]
pub struct Readiness {
    initialized: AtomicBool,
    notify: Notify,
}

impl Readiness {
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn signal(&self) {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    /// Blocks until the server is considered initialized. After the grace
    /// period the latch is released anyway and the caller proceeds.
    pub async fn wait(&self) {
        if self.is_initialized() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        if self.is_initialized() {
            return;
        }
        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep(INITIALIZED_GRACE) => {
                debug!("no initialized notification within grace period, proceeding");
                self.signal();
            }
        }
    }
}

/// Workspace-indexing progress, fed by `$/progress` notifications and by the
/// symbol-count probe in the registry.
#[derive(Default)]
pub struct IndexingState {
    indexed: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    files_discovered: AtomicU64,
    /// Progress tokens whose `begin` title mentioned indexing.
    index_tokens: Mutex<HashSet<String>>,
}

impl IndexingState {
    pub fn is_indexed(&self) -> bool {
        self.indexed.load(Ordering::Acquire)
    }

    pub fn mark_indexed(&self) {
        self.indexed.store(true, Ordering::Release);
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock()
    }

    pub fn files_discovered(&self) -> u64 {
        self.files_discovered.load(Ordering::Relaxed)
    }

    pub fn record_files_discovered(&self, count: u64) {
        self.files_discovered.store(count, Ordering::Relaxed);
    }

    /// Interprets a `$/progress` notification payload.
    pub fn observe_progress(&self, params: &Value) {
        let token = match params.get("token") {
            Some(token) => token.to_string(),
            None => return,
        };
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        let kind = value.get("kind").and_then(Value::as_str).unwrap_or("");

        if kind == "begin" {
            let title = value.get("title").and_then(Value::as_str).unwrap_or("");
            if title.to_lowercase().contains("index") {
                self.index_tokens.lock().insert(token);
                let mut started = self.started_at.lock();
                if started.is_none() {
                    *started = Some(Instant::now());
                }
            }
            return;
        }

        let tracking = self.index_tokens.lock().contains(&token);
        if !tracking {
            return;
        }
        let percentage = value.get("percentage").and_then(Value::as_u64);
        if kind == "end" || percentage.is_some_and(|p| p >= 100) {
            debug!("indexing progress reports completion");
            self.mark_indexed();
            self.index_tokens.lock().remove(&token);
        }
    }
}

/// One live language server child and everything the bridge knows about it.
pub struct LanguageServer {
    pub key: String,
    pub config: ServerConfig,
    pub root: PathBuf,
    pub readiness: Arc<Readiness>,
    pub indexing: Arc<IndexingState>,
    pub diagnostics: Arc<DiagnosticStore>,
    pub capabilities: RwLock<Option<ServerCapabilities>>,
    pub started_at: Instant,
    rpc: RpcClient,
    child: tokio::sync::Mutex<Option<Child>>,
    /// Absolute paths already `didOpen`-ed to this child. Guarded by an async
    /// mutex so a slow first open cannot race a concurrent second open.
    pub(crate) open_files: tokio::sync::Mutex<HashSet<PathBuf>>,
    /// Strictly increasing version counter shared by every document sent to
    /// this child.
    pub(crate) doc_version: AtomicI32,
    restart_task: Mutex<Option<JoinHandle<()>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// Fan-in point for server-initiated notifications, one per child.
struct ServerEventSink {
    readiness: Arc<Readiness>,
    indexing: Arc<IndexingState>,
    diagnostics: Arc<DiagnosticStore>,
}

impl NotificationSink for ServerEventSink {
    fn notify(&self, method: &str, params: Value) {
        match method {
            "initialized" => self.readiness.signal(),
            "$/progress" => self.indexing.observe_progress(&params),
            "textDocument/publishDiagnostics" => self.diagnostics.record(params),
            "window/logMessage" | "window/showMessage" => {
                let message = params.get("message").and_then(Value::as_str).unwrap_or("");
                debug!(target: "lsp_server", "{message}");
            }
            other => trace!("ignoring notification {other}"),
        }
    }
}

impl std::fmt::Debug for LanguageServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageServer")
            .field("key", &self.key)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl LanguageServer {
    /// Spawns the configured command and runs the initialize handshake.
    pub async fn spawn(
        config: ServerConfig,
        pending: PendingTable,
        ids: Arc<RequestIds>,
    ) -> Result<Arc<Self>> {
        let root = config.resolved_root();
        let program = config
            .command
            .first()
            .ok_or_else(|| BridgeError::Configuration("server command is empty".to_string()))?;

        info!(command = %program, root = %root.display(), "starting language server");
        let mut child = tokio::process::Command::new(program)
            .args(&config.command[1..])
            .current_dir(&root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::Configuration(format!("failed to spawn {program}: {e}"))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Transport("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Transport("child stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(program.clone(), stderr);
        }

        let server = Self::from_streams(
            config,
            root,
            Box::new(stdout),
            Box::new(stdin),
            pending,
            ids,
        );
        *server.child.lock().await = Some(child);
        server.initialize().await?;
        Ok(server)
    }

    /// Builds a server over arbitrary streams. Production code goes through
    /// [`LanguageServer::spawn`]; tests wire this to in-memory pipes.
    pub fn from_streams(
        config: ServerConfig,
        root: PathBuf,
        reader: crate::lsp::rpc::BoxedReader,
        writer: crate::lsp::rpc::BoxedWriter,
        pending: PendingTable,
        ids: Arc<RequestIds>,
    ) -> Arc<Self> {
        let readiness = Arc::new(Readiness::default());
        let indexing = Arc::new(IndexingState::default());
        let diagnostics = Arc::new(DiagnosticStore::new());
        let rpc = RpcClient::new(writer, pending, ids);

        let sink: Arc<dyn NotificationSink> = Arc::new(ServerEventSink {
            readiness: readiness.clone(),
            indexing: indexing.clone(),
            diagnostics: diagnostics.clone(),
        });
        let reader_rpc = rpc.clone();
        let reader_task = tokio::spawn(async move {
            reader_rpc.read_loop(reader, sink).await;
        });

        Arc::new(LanguageServer {
            key: config.key(),
            root,
            config,
            readiness,
            indexing,
            diagnostics,
            capabilities: RwLock::new(None),
            started_at: Instant::now(),
            rpc,
            child: tokio::sync::Mutex::new(None),
            open_files: tokio::sync::Mutex::new(HashSet::new()),
            doc_version: AtomicI32::new(1),
            restart_task: Mutex::new(None),
            reader_task: Mutex::new(Some(reader_task)),
        })
    }

    /// The LSP `initialize`/`initialized` handshake, ending with the
    /// optimistic readiness wait.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let root_uri = path_to_uri(&self.root)?;
        let folder_name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());

        #[allow(deprecated)]
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            capabilities: client_capabilities(),
            client_info: Some(ClientInfo {
                name: "lsp-bridge".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: folder_name,
            }]),
            initialization_options: self.config.initialization_options.clone(),
            ..Default::default()
        };

        let raw = self
            .rpc
            .request(
                "initialize",
                serde_json::to_value(params).expect("initialize params serialize"),
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| BridgeError::Protocol(format!("bad initialize response: {e}")))?;
        *self.capabilities.write() = Some(result.capabilities);

        self.rpc
            .notify("initialized", serde_json::json!({}))
            .await?;
        self.readiness.wait().await;
        info!(key = %self.config.command[0], "language server initialized");
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        self.rpc.is_alive()
    }

    /// Issues a request after the readiness latch has been released.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.request_with_timeout(method, params, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.readiness.wait().await;
        self.rpc.request(method, params, timeout).await
    }

    /// Sends a notification through the per-child serialized write path.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.readiness.wait().await;
        self.rpc.notify(method, params).await
    }

    pub(crate) fn next_doc_version(&self) -> i32 {
        self.doc_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn set_restart_task(&self, task: JoinHandle<()>) {
        if let Some(old) = self.restart_task.lock().replace(task) {
            old.abort();
        }
    }

    /// Tears the child down: graceful `shutdown`/`exit` first, then a kill.
    pub async fn shutdown(&self) {
        if let Some(task) = self.restart_task.lock().take() {
            task.abort();
        }

        if self.is_alive() {
            let _ = self
                .rpc
                .request("shutdown", Value::Null, SHUTDOWN_GRACE)
                .await;
            let _ = self.rpc.notify("exit", serde_json::json!({})).await;
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("language server exited with {status}"),
                _ => {
                    warn!("language server did not exit, killing");
                    let _ = child.kill().await;
                }
            }
        }

        if let Some(task) = self.reader_task.lock().take() {
            // The reader drains on its own once the pipes close; abort is a
            // backstop for stream implementations that never return EOF.
            task.abort();
        }
    }
}

/// Forwards the child's stderr to the bridge's diagnostic stream line by
/// line, so server-side panics and logs end up in our logs.
fn forward_stderr(program: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "lsp_server_stderr", server = %program, "{line}");
        }
    });
}

/// The client capability surface declared to every child.
fn client_capabilities() -> ClientCapabilities {
    let all_symbol_kinds: Vec<SymbolKind> = vec![
        SymbolKind::FILE,
        SymbolKind::MODULE,
        SymbolKind::NAMESPACE,
        SymbolKind::PACKAGE,
        SymbolKind::CLASS,
        SymbolKind::METHOD,
        SymbolKind::PROPERTY,
        SymbolKind::FIELD,
        SymbolKind::CONSTRUCTOR,
        SymbolKind::ENUM,
        SymbolKind::INTERFACE,
        SymbolKind::FUNCTION,
        SymbolKind::VARIABLE,
        SymbolKind::CONSTANT,
        SymbolKind::STRING,
        SymbolKind::NUMBER,
        SymbolKind::BOOLEAN,
        SymbolKind::ARRAY,
        SymbolKind::OBJECT,
        SymbolKind::KEY,
        SymbolKind::NULL,
        SymbolKind::ENUM_MEMBER,
        SymbolKind::STRUCT,
        SymbolKind::EVENT,
        SymbolKind::OPERATOR,
        SymbolKind::TYPE_PARAMETER,
    ];

    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                dynamic_registration: Some(false),
                ..Default::default()
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(false),
            }),
            type_definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(false),
            }),
            references: Some(ReferenceClientCapabilities {
                dynamic_registration: Some(false),
            }),
            rename: Some(RenameClientCapabilities {
                prepare_support: Some(false),
                ..Default::default()
            }),
            document_symbol: Some(DocumentSymbolClientCapabilities {
                hierarchical_document_symbol_support: Some(true),
                symbol_kind: Some(SymbolKindCapability {
                    value_set: Some(all_symbol_kinds.clone()),
                }),
                ..Default::default()
            }),
            completion: Some(CompletionClientCapabilities {
                completion_item: Some(CompletionItemCapability {
                    snippet_support: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            hover: Some(HoverClientCapabilities::default()),
            signature_help: Some(SignatureHelpClientCapabilities::default()),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                version_support: Some(true),
                ..Default::default()
            }),
            diagnostic: Some(DiagnosticClientCapabilities {
                dynamic_registration: Some(false),
                related_document_support: Some(false),
            }),
            ..Default::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            symbol: Some(WorkspaceSymbolClientCapabilities {
                symbol_kind: Some(SymbolKindCapability {
                    value_set: Some(all_symbol_kinds),
                }),
                ..Default::default()
            }),
            workspace_folders: Some(true),
            ..Default::default()
        }),
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}
