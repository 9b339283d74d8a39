//! Request/response correlation over one child's framed stdio transport.
//!
//! Request ids are drawn from a process-wide counter and resolved through a
//! table shared by every child, so an id can never be recycled across
//! servers. Each child gets its own reader task; a blocking read on one
//! child's stdout never stalls traffic to another.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{BridgeError, Result};
use crate::lsp::codec::{FrameDecoder, write_message};
use crate::lsp::message::{Incoming, RpcErrorObject, RpcMessage, code};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-wide monotonic request id source.
#[derive(Debug, Default)]
pub struct RequestIds(AtomicI64);

impl RequestIds {
    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct PendingEntry {
    method: String,
    tx: oneshot::Sender<std::result::Result<Value, RpcErrorObject>>,
}

/// Pending requests across all children, keyed by request id. An entry is
/// always removed from the table before its waiter is resolved, whether by
/// response, error, timeout or child death.
pub type PendingTable = Arc<DashMap<i64, PendingEntry>>;

pub fn new_pending_table() -> PendingTable {
    Arc::new(DashMap::new())
}

/// Receiver for server-initiated notifications, implemented by the
/// supervisor that owns the child.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, method: &str, params: Value);
}

/// Writer half plus correlation state for one child process.
#[derive(Clone)]
pub struct RpcClient {
    writer: Arc<Mutex<BoxedWriter>>,
    pending: PendingTable,
    ids: Arc<RequestIds>,
    /// Ids issued through this client that have not resolved yet. Used to
    /// reject exactly this child's requests when its reader exits.
    inflight: Arc<parking_lot::Mutex<HashSet<i64>>>,
    alive: Arc<AtomicBool>,
}

impl RpcClient {
    pub fn new(writer: BoxedWriter, pending: PendingTable, ids: Arc<RequestIds>) -> Self {
        RpcClient {
            writer: Arc::new(Mutex::new(writer)),
            pending,
            ids,
            inflight: Arc::new(parking_lot::Mutex::new(HashSet::new())),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Sends a request and awaits its correlated response.
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if !self.is_alive() {
            return Err(BridgeError::Transport(format!(
                "language server is not running (while sending {method})"
            )));
        }

        let id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingEntry {
                method: method.to_string(),
                tx,
            },
        );
        self.inflight.lock().insert(id);

        let msg = RpcMessage::request(id, method, params);
        if let Err(e) = self.send(&msg).await {
            self.release(id);
            return Err(e);
        }
        trace!(id, method, "request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(BridgeError::ServerReported {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(_)) => Err(BridgeError::Transport(format!(
                "language server exited before replying to {method}"
            ))),
            Err(_) => {
                self.release(id);
                Err(BridgeError::RequestTimeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Sends a notification. Completion means the bytes reached the child's
    /// stdin, which is what document-sync ordering relies on.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.send(&RpcMessage::notification(method, params)).await
    }

    async fn send(&self, msg: &RpcMessage) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_message(&mut **writer, msg).await.map_err(|e| {
            self.alive.store(false, Ordering::Release);
            BridgeError::Transport(format!("write to language server failed: {e}"))
        })
    }

    fn release(&self, id: i64) {
        self.pending.remove(&id);
        self.inflight.lock().remove(&id);
    }

    /// Marks the child dead and rejects every request still in flight on it.
    fn fail_inflight(&self) {
        self.alive.store(false, Ordering::Release);
        let ids: Vec<i64> = self.inflight.lock().drain().collect();
        if !ids.is_empty() {
            warn!("rejecting {} in-flight request(s) on dead server", ids.len());
        }
        for id in ids {
            // Dropping the sender wakes the waiter with a channel error.
            if let Some((_, entry)) = self.pending.remove(&id) {
                debug!(id, method = %entry.method, "dropped by server exit");
            }
        }
    }

    /// Reads frames until the child closes its stdout, resolving responses
    /// and forwarding notifications. Runs as one long-lived task per child.
    pub async fn read_loop(&self, mut reader: BoxedReader, events: Arc<dyn NotificationSink>) {
        let mut decoder = FrameDecoder::new();
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!("language server stdout closed");
                    break;
                }
                Ok(n) => decoder.extend(&chunk[..n]),
                Err(e) => {
                    warn!("language server read failed: {e}");
                    break;
                }
            }
            while let Some(payload) = decoder.next_frame() {
                match serde_json::from_slice::<RpcMessage>(&payload) {
                    Ok(msg) => self.dispatch(msg, &events).await,
                    Err(e) => warn!("discarding malformed LSP message: {e}"),
                }
            }
        }
        self.fail_inflight();
    }

    async fn dispatch(&self, msg: RpcMessage, events: &Arc<dyn NotificationSink>) {
        match msg.classify() {
            Some(Incoming::Response { id, result }) => {
                self.inflight.lock().remove(&id);
                match self.pending.remove(&id) {
                    Some((_, entry)) => {
                        trace!(id, method = %entry.method, "response received");
                        let _ = entry.tx.send(result);
                    }
                    None => warn!(id, "response for unknown request id"),
                }
            }
            Some(Incoming::Notification { method, params }) => {
                trace!(method = %method, "notification received");
                events.notify(&method, params);
            }
            Some(Incoming::Request { id, method, params }) => {
                let reply = answer_server_request(id, &method, &params);
                if let Err(e) = self.send(&reply).await {
                    warn!("failed to answer server request {method}: {e}");
                }
            }
            None => warn!("dropping JSON-RPC message with neither id nor method"),
        }
    }
}

/// Minimal answers to server-to-client requests. The bridge is not an
/// editor, so it acknowledges what it safely can and rejects the rest;
/// leaving these unanswered would stall servers that await them.
fn answer_server_request(id: Value, method: &str, params: &Value) -> RpcMessage {
    match method {
        "client/registerCapability"
        | "client/unregisterCapability"
        | "window/workDoneProgress/create"
        | "window/showMessageRequest" => RpcMessage::response(id, Value::Null),
        "workspace/configuration" => {
            let items = params
                .get("items")
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(0);
            RpcMessage::response(id, Value::Array(vec![Value::Null; items]))
        }
        other => RpcMessage::error_response(
            id,
            code::METHOD_NOT_FOUND,
            format!("client does not implement {other}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    struct Sink(parking_lot::Mutex<Vec<(String, Value)>>);

    impl Sink {
        fn new() -> Arc<Self> {
            Arc::new(Sink(parking_lot::Mutex::new(Vec::new())))
        }
    }

    impl NotificationSink for Sink {
        fn notify(&self, method: &str, params: Value) {
            self.0.lock().push((method.to_string(), params));
        }
    }

    /// A client wired to in-memory pipes, plus the "server side" halves.
    fn harness() -> (RpcClient, tokio::io::DuplexStream, tokio::io::DuplexStream) {
        let (server_reads, client_writes) = tokio::io::duplex(64 * 1024);
        let (client_reads, server_writes) = tokio::io::duplex(64 * 1024);
        let client = RpcClient::new(
            Box::new(client_writes),
            new_pending_table(),
            Arc::new(RequestIds::default()),
        );
        let events = Sink::new();
        let reader_client = client.clone();
        tokio::spawn(async move {
            reader_client.read_loop(Box::new(client_reads), events).await;
        });
        (client, server_reads, server_writes)
    }

    async fn write_frame(writer: &mut tokio::io::DuplexStream, body: &Value) {
        let body = serde_json::to_vec(body).unwrap();
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        writer.write_all(header.as_bytes()).await.unwrap();
        writer.write_all(&body).await.unwrap();
    }

    /// Reads the next frame the client sent, so a test can reply to the id
    /// the client actually used.
    async fn read_frame(reader: &mut tokio::io::DuplexStream) -> Value {
        use tokio::io::AsyncReadExt as _;
        let mut decoder = FrameDecoder::new();
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = decoder.next_frame() {
                return serde_json::from_slice(&frame).unwrap();
            }
            let n = reader.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed its write side early");
            decoder.extend(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn correlates_response_by_id() {
        let (client, mut server_reads, mut server_writes) = harness();
        let request =
            tokio::spawn(
                async move { client.request("workspace/symbol", json!({}), Duration::from_secs(2)).await },
            );
        let seen = read_frame(&mut server_reads).await;
        assert_eq!(seen["method"], "workspace/symbol");
        let id = seen["id"].clone();
        // Interleave an unrelated notification before the response.
        write_frame(
            &mut server_writes,
            &json!({"jsonrpc":"2.0","method":"window/logMessage","params":{"message":"hi"}}),
        )
        .await;
        write_frame(
            &mut server_writes,
            &json!({"jsonrpc":"2.0","id":id,"result":[{"name":"Foo"}]}),
        )
        .await;
        let result = request.await.unwrap().unwrap();
        assert_eq!(result[0]["name"], "Foo");
    }

    #[tokio::test]
    async fn error_response_is_surfaced() {
        let (client, mut server_reads, mut server_writes) = harness();
        let request = tokio::spawn(async move {
            client
                .request("textDocument/diagnostic", json!({}), Duration::from_secs(2))
                .await
        });
        let seen = read_frame(&mut server_reads).await;
        let id = seen["id"].clone();
        write_frame(
            &mut server_writes,
            &json!({"jsonrpc":"2.0","id":id,"error":{"code":-32601,"message":"unhandled method"}}),
        )
        .await;
        let err = request.await.unwrap().unwrap_err();
        assert!(err.is_method_not_found(), "got: {err}");
    }

    #[tokio::test]
    async fn timeout_releases_pending_entry() {
        let (client, _server_reads, _server_writes) = harness();
        let err = client
            .request("textDocument/hover", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::RequestTimeout { .. }));
        assert!(client.pending.is_empty());
        assert!(client.inflight.lock().is_empty());
    }

    #[tokio::test]
    async fn server_exit_rejects_inflight_requests() {
        let (client, server_reads, server_writes) = harness();
        let pending = client.pending.clone();
        let request = tokio::spawn(async move {
            client
                .request("textDocument/references", json!({}), Duration::from_secs(5))
                .await
        });
        // Wait for the request to land in the table, then kill the stream.
        for _ in 0..100 {
            if !pending.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(server_writes);
        drop(server_reads);
        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)), "got: {err}");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn notifications_reach_the_sink() {
        let (client_reads, mut server_writes) = tokio::io::duplex(4096);
        let (_server_reads, client_writes) = tokio::io::duplex(4096);
        let client = RpcClient::new(
            Box::new(client_writes),
            new_pending_table(),
            Arc::new(RequestIds::default()),
        );
        let events = Sink::new();
        let sink = events.clone();
        let reader_client = client.clone();
        let reader = tokio::spawn(async move {
            reader_client.read_loop(Box::new(client_reads), events).await;
        });
        write_frame(
            &mut server_writes,
            &json!({"jsonrpc":"2.0","method":"textDocument/publishDiagnostics","params":{"uri":"file:///a.ts","diagnostics":[]}}),
        )
        .await;
        drop(server_writes);
        reader.await.unwrap();
        let seen = sink.0.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "textDocument/publishDiagnostics");
    }

    #[tokio::test]
    async fn answers_workspace_configuration_with_nulls() {
        let reply = answer_server_request(
            json!(9),
            "workspace/configuration",
            &json!({"items":[{}, {}]}),
        );
        assert_eq!(reply.result, Some(json!([null, null])));

        let unknown = answer_server_request(json!(10), "workspace/applyEdit", &Value::Null);
        assert_eq!(unknown.error.unwrap().code, code::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn ids_are_unique_across_clients() {
        let ids = Arc::new(RequestIds::default());
        let (_r1, w1) = tokio::io::duplex(1024);
        let (_r2, w2) = tokio::io::duplex(1024);
        let pending = new_pending_table();
        let a = RpcClient::new(Box::new(w1), pending.clone(), ids.clone());
        let b = RpcClient::new(Box::new(w2), pending, ids);
        // Both clients draw from the same counter.
        let id_a = a.ids.next();
        let id_b = b.ids.next();
        assert_ne!(id_a, id_b);
    }
}
