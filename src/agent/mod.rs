//! The agent channel: a JSON-RPC 2.0 loop on this process's own stdio,
//! framed exactly like the downstream LSP transports.
//!
//! This is a thin shell over the operation layer: it enumerates tools,
//! dispatches calls, and shapes errors. Operation failures come back as
//! tool results flagged `isError`, never as raw errors.

pub mod tools;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info, warn};

use crate::lsp::codec::{FrameDecoder, write_message};
use crate::lsp::message::{Incoming, RpcMessage, code};
use crate::ops::Bridge;
use tools::DispatchOutcome;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Serves tool calls over this process's stdin/stdout until stdin closes.
pub async fn serve_stdio(bridge: Arc<Bridge>) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    serve(bridge, stdin, stdout).await
}

/// Stream-generic serve loop; tests drive it with in-memory pipes.
pub async fn serve<R, W>(bridge: Arc<Bridge>, mut reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("agent channel listening on stdio");
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            info!("agent channel closed");
            return Ok(());
        }
        decoder.extend(&chunk[..n]);
        while let Some(payload) = decoder.next_frame() {
            let message: RpcMessage = match serde_json::from_slice(&payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!("discarding malformed agent request: {e}");
                    continue;
                }
            };
            match message.classify() {
                Some(Incoming::Request { id, method, params }) => {
                    let reply = handle_request(&bridge, id, &method, params).await;
                    write_message(&mut writer, &reply).await?;
                }
                Some(Incoming::Notification { method, .. }) => {
                    debug!("agent notification {method} ignored");
                }
                other => debug!("unexpected agent message: {other:?}"),
            }
        }
    }
}

async fn handle_request(bridge: &Bridge, id: Value, method: &str, params: Value) -> RpcMessage {
    match method {
        "initialize" => RpcMessage::response(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": "lsp-bridge",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => RpcMessage::response(id, json!({})),
        "tools/list" => RpcMessage::response(id, json!({"tools": tools::tool_descriptors()})),
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return RpcMessage::error_response(
                    id,
                    code::INVALID_PARAMS,
                    "tools/call requires a tool name",
                );
            };
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            debug!(tool = name, "tool call");
            match tools::dispatch(bridge, name, &arguments).await {
                DispatchOutcome::Success(result) => RpcMessage::response(id, tool_content(&result, false)),
                DispatchOutcome::ToolError(message) => {
                    RpcMessage::response(id, tool_content(&json!({"error": message}), true))
                }
                DispatchOutcome::BadArguments(message) => {
                    RpcMessage::error_response(id, code::INVALID_PARAMS, message)
                }
                DispatchOutcome::UnknownTool => RpcMessage::error_response(
                    id,
                    code::METHOD_NOT_FOUND,
                    format!("unknown tool {name}"),
                ),
            }
        }
        other => RpcMessage::error_response(
            id,
            code::METHOD_NOT_FOUND,
            format!("unknown method {other}"),
        ),
    }
}

fn tool_content(result: &Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    json!({
        "content": [{"type": "text", "text": text}],
        "isError": is_error,
    })
}
