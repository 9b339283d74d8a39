//! Push-diagnostic cache with per-URI versions, plus the idle waiter used to
//! decide when a server has gone quiet after a change.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lsp_types::{Diagnostic, PublishDiagnosticsParams, Uri};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

/// Poll step for the idle waiter.
const IDLE_POLL: Duration = Duration::from_millis(50);

struct DiagnosticEntry {
    diagnostics: Vec<Diagnostic>,
    /// Monotonic publish version. Grows by one per publish, or jumps to the
    /// server-provided document version when that is larger.
    version: i64,
    updated_at: Instant,
}

/// Latest published diagnostics per URI for one server. Prior snapshots are
/// discarded; there is no history.
#[derive(Default)]
pub struct DiagnosticStore {
    entries: RwLock<HashMap<Uri, DiagnosticEntry>>,
}

impl DiagnosticStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests a `textDocument/publishDiagnostics` notification payload.
    pub fn record(&self, params: Value) {
        let params: PublishDiagnosticsParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!("ignoring malformed publishDiagnostics: {e}");
                return;
            }
        };
        let mut entries = self.entries.write();
        let next_version = {
            let prior = entries.get(&params.uri).map(|e| e.version).unwrap_or(0);
            let bumped = prior + 1;
            match params.version {
                Some(v) => bumped.max(i64::from(v)),
                None => bumped,
            }
        };
        debug!(
            uri = params.uri.as_str(),
            count = params.diagnostics.len(),
            version = next_version,
            "diagnostics published"
        );
        entries.insert(
            params.uri,
            DiagnosticEntry {
                diagnostics: params.diagnostics,
                version: next_version,
                updated_at: Instant::now(),
            },
        );
    }

    /// Latest snapshot for the URI. `Some(vec![])` means the server published
    /// an explicitly empty set, which is just as authoritative.
    pub fn get(&self, uri: &Uri) -> Option<Vec<Diagnostic>> {
        self.entries.read().get(uri).map(|e| e.diagnostics.clone())
    }

    pub fn version(&self, uri: &Uri) -> Option<i64> {
        self.entries.read().get(uri).map(|e| e.version)
    }

    pub fn last_update(&self, uri: &Uri) -> Option<Instant> {
        self.entries.read().get(uri).map(|e| e.updated_at)
    }

    /// Polls until the server has been quiet on `uri` for at least `idle`
    /// (and published at least once), or `max_wait` elapses. Returns whether
    /// quiescence was reached.
    pub async fn wait_for_idle(&self, uri: &Uri, idle: Duration, max_wait: Duration) -> bool {
        let started = Instant::now();
        loop {
            if let Some(updated_at) = self.last_update(uri) {
                if updated_at.elapsed() >= idle {
                    return true;
                }
            }
            if started.elapsed() >= max_wait {
                return false;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uri() -> Uri {
        "file:///w/a.ts".parse().unwrap()
    }

    fn publish(store: &DiagnosticStore, count: usize, version: Option<i32>) {
        let diagnostics: Vec<Value> = (0..count)
            .map(|i| {
                json!({
                    "range": {"start": {"line": i, "character": 0}, "end": {"line": i, "character": 5}},
                    "severity": 1,
                    "message": format!("error {i}")
                })
            })
            .collect();
        store.record(json!({
            "uri": "file:///w/a.ts",
            "diagnostics": diagnostics,
            "version": version,
        }));
    }

    #[test]
    fn latest_publish_overwrites_prior() {
        let store = DiagnosticStore::new();
        publish(&store, 3, None);
        publish(&store, 1, None);
        assert_eq!(store.get(&uri()).unwrap().len(), 1);
    }

    #[test]
    fn empty_publish_is_cached() {
        let store = DiagnosticStore::new();
        publish(&store, 0, None);
        assert_eq!(store.get(&uri()).unwrap().len(), 0);
    }

    #[test]
    fn versions_never_decrease() {
        let store = DiagnosticStore::new();
        publish(&store, 1, Some(10));
        assert_eq!(store.version(&uri()), Some(10));
        // A publish without a version still moves forward.
        publish(&store, 1, None);
        assert_eq!(store.version(&uri()), Some(11));
        // A stale server-provided version cannot move the counter backwards.
        publish(&store, 1, Some(3));
        assert_eq!(store.version(&uri()), Some(12));
    }

    #[test]
    fn malformed_payload_is_ignored() {
        let store = DiagnosticStore::new();
        store.record(json!({"not": "diagnostics"}));
        assert!(store.get(&uri()).is_none());
    }

    #[tokio::test]
    async fn idle_wait_times_out_without_publishes() {
        let store = DiagnosticStore::new();
        let quiet = store
            .wait_for_idle(&uri(), Duration::from_millis(300), Duration::from_millis(200))
            .await;
        assert!(!quiet);
    }

    #[tokio::test]
    async fn idle_wait_returns_once_quiet() {
        let store = DiagnosticStore::new();
        publish(&store, 2, None);
        let quiet = store
            .wait_for_idle(&uri(), Duration::from_millis(10), Duration::from_secs(2))
            .await;
        assert!(quiet);
    }
}
