//! Test harness: an in-process scripted LSP server wired to the supervisor
//! over in-memory pipes, so end-to-end operation tests run without any real
//! language server binary.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, DuplexStream};

use lsp_bridge::config::{BridgeConfig, ServerConfig};
use lsp_bridge::lsp::codec::{FrameDecoder, write_message};
use lsp_bridge::lsp::message::{Incoming, RpcMessage};
use lsp_bridge::lsp::server::LanguageServer;
use lsp_bridge::ops::Bridge;

/// What the scripted server answers to one request.
pub enum MockReply {
    Result(Value),
    Error(i64, String),
}

pub type RequestHandler = Arc<dyn Fn(&str, &Value) -> MockReply + Send + Sync>;
/// Maps a client notification to notifications the server pushes back.
pub type NotificationHandler = Arc<dyn Fn(&str, &Value) -> Vec<(String, Value)> + Send + Sync>;

pub fn answer_null() -> RequestHandler {
    Arc::new(|_, _| MockReply::Result(Value::Null))
}

pub fn no_pushes() -> NotificationHandler {
    Arc::new(|_, _| Vec::new())
}

/// One scripted server definition: which extensions it owns and how it
/// behaves.
pub struct MockServerSpec {
    pub extensions: Vec<String>,
    pub requests: RequestHandler,
    pub notifications: NotificationHandler,
}

impl MockServerSpec {
    pub fn new(extensions: &[&str], requests: RequestHandler) -> Self {
        MockServerSpec {
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            requests,
            notifications: no_pushes(),
        }
    }

    pub fn with_notifications(mut self, notifications: NotificationHandler) -> Self {
        self.notifications = notifications;
        self
    }
}

/// The scripted server loop. Handles the lifecycle methods itself: answers
/// `initialize` with empty capabilities, then immediately pushes the
/// `initialized` echo and an end-of-indexing progress pair so waiters are
/// released without real indexing delays.
async fn run_mock_server(
    reader: DuplexStream,
    writer: DuplexStream,
    requests: RequestHandler,
    notifications: NotificationHandler,
) {
    let mut reader = reader;
    let mut writer = writer;
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&chunk[..n]);
        while let Some(frame) = decoder.next_frame() {
            let Ok(message) = serde_json::from_slice::<RpcMessage>(&frame) else {
                continue;
            };
            match message.classify() {
                Some(Incoming::Request { id, method, params }) => {
                    let reply = match method.as_str() {
                        "initialize" => {
                            MockReply::Result(json!({"capabilities": {"renameProvider": true}}))
                        }
                        "shutdown" => MockReply::Result(Value::Null),
                        other => requests(other, &params),
                    };
                    let response = match reply {
                        MockReply::Result(result) => RpcMessage::response(id, result),
                        MockReply::Error(code, text) => RpcMessage::error_response(id, code, text),
                    };
                    if write_message(&mut writer, &response).await.is_err() {
                        return;
                    }
                    if method == "initialize" {
                        for (method, params) in [
                            ("initialized".to_string(), json!({})),
                            (
                                "$/progress".to_string(),
                                json!({"token": "mock/index", "value": {"kind": "begin", "title": "Indexing"}}),
                            ),
                            (
                                "$/progress".to_string(),
                                json!({"token": "mock/index", "value": {"kind": "end"}}),
                            ),
                        ] {
                            let push = RpcMessage::notification(&method, params);
                            if write_message(&mut writer, &push).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Some(Incoming::Notification { method, params }) => {
                    if method == "exit" {
                        return;
                    }
                    for (push_method, push_params) in notifications(&method, &params) {
                        let push = RpcMessage::notification(&push_method, push_params);
                        if write_message(&mut writer, &push).await.is_err() {
                            return;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Builds a [`Bridge`] whose registry is pre-populated with stream-backed
/// servers driven by the given scripts.
pub async fn build_bridge(root: &Path, specs: Vec<MockServerSpec>) -> Bridge {
    let configs: Vec<ServerConfig> = specs
        .iter()
        .map(|spec| ServerConfig {
            extensions: spec.extensions.clone(),
            command: vec![format!("mock-ls-{}", spec.extensions.join("-"))],
            root_dir: Some(root.to_path_buf()),
            restart_interval: None,
            initialization_options: None,
        })
        .collect();

    let bridge = Bridge::new(BridgeConfig {
        servers: configs.clone(),
    })
    .expect("valid test config");

    for (config, spec) in configs.into_iter().zip(specs) {
        let (client_reads, server_writes) = tokio::io::duplex(256 * 1024);
        let (server_reads, client_writes) = tokio::io::duplex(256 * 1024);
        tokio::spawn(run_mock_server(
            server_reads,
            server_writes,
            spec.requests,
            spec.notifications,
        ));

        let server = LanguageServer::from_streams(
            config,
            root.to_path_buf(),
            Box::new(client_reads),
            Box::new(client_writes),
            bridge.registry.pending(),
            bridge.registry.ids(),
        );
        server.initialize().await.expect("mock initialize");
        bridge.registry.insert(server);
    }
    bridge
}

pub fn write_file(root: &Path, name: &str, contents: &str) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn file_uri(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}

/// A nested `DocumentSymbol` JSON node. `selection` must point at the
/// identifier, the way real servers report it.
pub fn nested_symbol(
    name: &str,
    kind: u32,
    range: ((u32, u32), (u32, u32)),
    selection: ((u32, u32), (u32, u32)),
    children: Value,
) -> Value {
    json!({
        "name": name,
        "kind": kind,
        "range": range_json(range),
        "selectionRange": range_json(selection),
        "children": children,
    })
}

pub fn range_json(range: ((u32, u32), (u32, u32))) -> Value {
    json!({
        "start": {"line": range.0.0, "character": range.0.1},
        "end": {"line": range.1.0, "character": range.1.1},
    })
}

pub fn location_json(uri: &str, range: ((u32, u32), (u32, u32))) -> Value {
    json!({"uri": uri, "range": range_json(range)})
}
