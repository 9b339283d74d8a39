//! Single-file diagnostics with the layered push/pull/nudge strategy.
//!
//! Real servers implement push and pull inconsistently, so the order is:
//! cached push diagnostics, then a pull request, then an idle wait, then the
//! no-op change nudge followed by a shorter idle wait. Each step returns as
//! soon as it has an authoritative answer.

use std::path::Path;
use std::time::Duration;

use lsp_types::Diagnostic;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::ops::Bridge;
use crate::uri::path_to_uri;

/// Quiet period after the last publish before the cache is trusted.
const DIAGNOSTIC_IDLE: Duration = Duration::from_millis(300);
/// Cap on the first idle wait.
const DIAGNOSTIC_WAIT: Duration = Duration::from_secs(5);
/// Cap on the idle wait after the no-op change nudge.
const NUDGE_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize)]
pub struct FileDiagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl Bridge {
    pub async fn get_diagnostics(&self, path: &Path) -> Result<FileDiagnostics> {
        let server = self.registry.server_for_path(path).await?;
        server.ensure_file_open(path).await?;
        let uri = path_to_uri(path)?;

        // A cached publish, even an empty one, is the server's own truth.
        if let Some(diagnostics) = server.diagnostics.get(&uri) {
            return Ok(FileDiagnostics { diagnostics });
        }

        match server
            .request(
                "textDocument/diagnostic",
                json!({"textDocument": {"uri": uri}}),
            )
            .await
        {
            Ok(report) => {
                if let Some(diagnostics) = diagnostics_from_pull_report(report)? {
                    return Ok(FileDiagnostics { diagnostics });
                }
            }
            Err(e) => debug!("pull diagnostics unavailable, waiting for push: {e}"),
        }

        // Push model: wait for the server to go quiet, nudging it once if it
        // never publishes on its own.
        server
            .diagnostics
            .wait_for_idle(&uri, DIAGNOSTIC_IDLE, DIAGNOSTIC_WAIT)
            .await;
        if let Some(diagnostics) = server.diagnostics.get(&uri) {
            return Ok(FileDiagnostics { diagnostics });
        }

        server.nudge_diagnostics(path).await?;
        server
            .diagnostics
            .wait_for_idle(&uri, DIAGNOSTIC_IDLE, NUDGE_WAIT)
            .await;
        Ok(FileDiagnostics {
            diagnostics: server.diagnostics.get(&uri).unwrap_or_default(),
        })
    }
}

/// Interprets a `textDocument/diagnostic` report. `full` yields its items,
/// `unchanged` yields an empty set, anything else is a protocol error.
/// Returns `None` when the report is a bare `null` (some servers answer the
/// request but decline it), letting the caller fall through to push.
fn diagnostics_from_pull_report(report: Value) -> Result<Option<Vec<Diagnostic>>> {
    if report.is_null() {
        return Ok(None);
    }
    match report.get("kind").and_then(Value::as_str) {
        Some("full") => {
            let items = report.get("items").cloned().unwrap_or(Value::Array(vec![]));
            let diagnostics: Vec<Diagnostic> = serde_json::from_value(items)
                .map_err(|e| BridgeError::Protocol(format!("bad diagnostic report items: {e}")))?;
            Ok(Some(diagnostics))
        }
        Some("unchanged") => Ok(Some(Vec::new())),
        other => Err(BridgeError::Protocol(format!(
            "diagnostic report with unexpected kind {other:?}"
        ))),
    }
}
