//! Document synchronization: `didOpen` exactly once per (server, file) and
//! the no-op `didChange` pair used to coax diagnostics out of quiet servers.
//!
//! Files stay open for the lifetime of the server; `didClose` is only ever
//! sent implicitly by teardown. Closing would throw away the server's
//! incremental state for the document and buy nothing.

use std::path::Path;

use serde_json::json;
use tracing::debug;

use crate::config::language_id_for;
use crate::error::Result;
use crate::lsp::server::LanguageServer;
use crate::uri::path_to_uri;

impl LanguageServer {
    /// Opens the file on this server unless it already is open. The
    /// `didOpen` write completes before the method returns, so a caller may
    /// immediately follow up with `textDocument/*` requests for the URI.
    pub async fn ensure_file_open(&self, path: &Path) -> Result<()> {
        let mut open_files = self.open_files.lock().await;
        if open_files.contains(path) {
            return Ok(());
        }

        let text = tokio::fs::read_to_string(path).await?;
        let uri = path_to_uri(path)?;
        let language_id = language_id_for(path);
        debug!(path = %path.display(), language_id, "opening document");
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id,
                    "version": 1,
                    "text": text,
                }
            }),
        )
        .await?;
        open_files.insert(path.to_path_buf());
        Ok(())
    }

    pub async fn is_file_open(&self, path: &Path) -> bool {
        self.open_files.lock().await.contains(path)
    }

    pub async fn open_file_count(&self) -> usize {
        self.open_files.lock().await.len()
    }

    /// Forces a re-publish of diagnostics by sending a whole-text change
    /// with one trailing space appended, immediately followed by the
    /// original text. The file on disk is never touched; both writes have
    /// completed by the time this returns.
    pub async fn nudge_diagnostics(&self, path: &Path) -> Result<()> {
        let text = tokio::fs::read_to_string(path).await?;
        let uri = path_to_uri(path)?;

        let touched = format!("{text} ");
        let version = self.next_doc_version();
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri, "version": version},
                "contentChanges": [{"text": touched}],
            }),
        )
        .await?;

        let version = self.next_doc_version();
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri, "version": version},
                "contentChanges": [{"text": text}],
            }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::io::AsyncReadExt;

    use crate::config::ServerConfig;
    use crate::lsp::codec::FrameDecoder;
    use crate::lsp::rpc::{RequestIds, new_pending_table};
    use crate::lsp::server::LanguageServer;

    fn test_config() -> ServerConfig {
        ServerConfig {
            extensions: vec!["ts".to_string()],
            command: vec!["fake-ls".to_string()],
            root_dir: None,
            restart_interval: None,
            initialization_options: None,
        }
    }

    /// Server wired to in-memory pipes with readiness pre-released; returns
    /// the stream carrying everything the "child" receives.
    fn harness() -> (Arc<LanguageServer>, tokio::io::DuplexStream) {
        let (server_reads, client_writes) = tokio::io::duplex(256 * 1024);
        let (client_reads, _server_writes) = tokio::io::duplex(1024);
        let server = LanguageServer::from_streams(
            test_config(),
            std::env::temp_dir(),
            Box::new(client_reads),
            Box::new(client_writes),
            new_pending_table(),
            Arc::new(RequestIds::default()),
        );
        server.readiness.signal();
        (server, server_reads)
    }

    async fn drain_messages(stream: &mut tokio::io::DuplexStream, expected: usize) -> Vec<Value> {
        let mut decoder = FrameDecoder::new();
        let mut messages = Vec::new();
        let mut chunk = [0u8; 4096];
        while messages.len() < expected {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "stream closed before {expected} messages arrived");
            decoder.extend(&chunk[..n]);
            while let Some(frame) = decoder.next_frame() {
                messages.push(serde_json::from_slice(&frame).unwrap());
            }
        }
        messages
    }

    #[tokio::test]
    async fn did_open_is_sent_exactly_once() {
        let mut file = tempfile::NamedTempFile::with_suffix(".ts").unwrap();
        writeln!(file, "export class Foo {{}}").unwrap();

        let (server, mut child_stdin) = harness();
        server.ensure_file_open(file.path()).await.unwrap();
        server.ensure_file_open(file.path()).await.unwrap();
        assert!(server.is_file_open(file.path()).await);
        assert_eq!(server.open_file_count().await, 1);

        let messages = drain_messages(&mut child_stdin, 1).await;
        assert_eq!(messages[0]["method"], "textDocument/didOpen");
        assert_eq!(messages[0]["params"]["textDocument"]["version"], 1);
        assert_eq!(messages[0]["params"]["textDocument"]["languageId"], "typescript");

        // The second ensure_file_open must not have produced another frame:
        // nudge once and confirm the next message is already the didChange.
        server.nudge_diagnostics(file.path()).await.unwrap();
        let messages = drain_messages(&mut child_stdin, 2).await;
        assert_eq!(messages[0]["method"], "textDocument/didChange");
        assert_eq!(messages[1]["method"], "textDocument/didChange");
    }

    #[tokio::test]
    async fn nudge_appends_then_restores_text() {
        let mut file = tempfile::NamedTempFile::with_suffix(".py").unwrap();
        write!(file, "x = 1\n").unwrap();

        let (server, mut child_stdin) = harness();
        server.nudge_diagnostics(file.path()).await.unwrap();

        let messages = drain_messages(&mut child_stdin, 2).await;
        let first = messages[0]["params"]["contentChanges"][0]["text"]
            .as_str()
            .unwrap();
        let second = messages[1]["params"]["contentChanges"][0]["text"]
            .as_str()
            .unwrap();
        assert_eq!(first, "x = 1\n ");
        assert_eq!(second, "x = 1\n");

        // Versions strictly increase across the pair.
        let v1 = messages[0]["params"]["textDocument"]["version"].as_i64().unwrap();
        let v2 = messages[1]["params"]["textDocument"]["version"].as_i64().unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn unknown_extension_falls_back_to_plaintext() {
        let mut file = tempfile::NamedTempFile::with_suffix(".weird").unwrap();
        writeln!(file, "anything").unwrap();

        let (server, mut child_stdin) = harness();
        server.ensure_file_open(file.path()).await.unwrap();
        let messages = drain_messages(&mut child_stdin, 1).await;
        assert_eq!(messages[0]["params"]["textDocument"]["languageId"], "plaintext");
    }
}
