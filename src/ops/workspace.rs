//! Workspace-wide operations: symbol search fanned out across every ready
//! server, and the bulk diagnostics sweep.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use lsp_types::{Range, SymbolKind};
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::file_extension;
use crate::error::{BridgeError, Result};
use crate::lsp::symbols::{symbol_kind_from_name, symbol_kind_name};
use crate::ops::Bridge;

/// Files processed concurrently-ish per batch during the diagnostics sweep.
const DIAGNOSTIC_BATCH: usize = 10;
/// Pause between batches so children are not buried in didOpen traffic.
const BATCH_PAUSE: Duration = Duration::from_millis(100);
/// The sweep never descends deeper than this below a server root.
const SWEEP_MAX_DEPTH: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct FoundSymbol {
    pub name: String,
    pub kind: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServerDebug {
    pub command: String,
    pub files_discovered: u64,
    pub uptime_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexing_elapsed_ms: Option<u128>,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceSearchDebug {
    pub query_sent: String,
    pub servers_queried: usize,
    pub raw_result_count: usize,
    pub servers: Vec<ServerDebug>,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceSymbolsResult {
    pub symbols: Vec<FoundSymbol>,
    pub truncated: bool,
    pub debug: WorkspaceSearchDebug,
}

impl Bridge {
    /// Fans `workspace/symbol` out to every ready server and merges the
    /// results. The merged set is the union of per-server results; entries
    /// collapse only on exact `(name, uri, range)` identity.
    pub async fn get_workspace_symbols(
        &self,
        pattern: &str,
        kind: Option<&str>,
        case_sensitive: bool,
        max_results: usize,
    ) -> Result<WorkspaceSymbolsResult> {
        let query = lsp_query_for(pattern);
        let requested_kind = kind.and_then(symbol_kind_from_name);
        let name_filter = NameFilter::new(pattern, case_sensitive)?;

        let ready = self.registry.ensure_all_ready().await;
        if ready.is_empty() {
            return Err(BridgeError::Configuration(
                "no language server became ready for workspace search".to_string(),
            ));
        }

        let mut merged: Vec<FoundSymbol> = Vec::new();
        let mut raw_count = 0;
        let mut servers_debug = Vec::new();
        for (_, server) in &ready {
            let raw = match server
                .request("workspace/symbol", json!({"query": query}))
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(command = %server.config.command[0], "workspace/symbol failed: {e}");
                    continue;
                }
            };
            let symbols = parse_workspace_symbols(&raw);
            raw_count += symbols.len();
            merged.extend(symbols);

            servers_debug.push(ServerDebug {
                command: server.config.command[0].clone(),
                files_discovered: server.indexing.files_discovered(),
                uptime_ms: server.started_at.elapsed().as_millis(),
                indexing_elapsed_ms: server.indexing.started_at().map(|t| t.elapsed().as_millis()),
            });
        }

        merged.retain(|symbol| {
            let kind_ok = requested_kind
                .is_none_or(|k| symbol.kind == symbol_kind_name(k));
            kind_ok && name_filter.matches(symbol)
        });
        dedup_symbols(&mut merged);

        let truncated = merged.len() > max_results;
        merged.truncate(max_results);
        debug!(
            pattern,
            matched = merged.len(),
            raw = raw_count,
            "workspace symbol search complete"
        );
        Ok(WorkspaceSymbolsResult {
            symbols: merged,
            truncated,
            debug: WorkspaceSearchDebug {
                query_sent: query,
                servers_queried: ready.len(),
                raw_result_count: raw_count,
                servers: servers_debug,
            },
        })
    }
}

/// The LSP query string for a pattern: wildcards are a client-side concern,
/// so leading/trailing ones are stripped before the server sees the query.
fn lsp_query_for(pattern: &str) -> String {
    if pattern.contains('*') || pattern.contains('?') {
        pattern.trim_matches(|c| c == '*' || c == '?').to_string()
    } else {
        pattern.to_string()
    }
}

/// Client-side name filtering. Callable symbols often embed their signature
/// in the reported name (`"void Foo(int)"`), so they are matched by
/// containment; everything else matches exactly on the prefix before the
/// first `(`.
struct NameFilter {
    contains: Regex,
    exact: Regex,
}

impl NameFilter {
    fn new(pattern: &str, case_sensitive: bool) -> Result<Self> {
        let core = regex::escape(pattern)
            .replace(r"\*", ".*")
            .replace(r"\?", ".");
        let flags = if case_sensitive { "" } else { "(?i)" };
        let contains = Regex::new(&format!("{flags}.*{core}.*"))
            .map_err(|e| BridgeError::Resolution(format!("bad search pattern: {e}")))?;
        let exact = Regex::new(&format!("{flags}^{core}$"))
            .map_err(|e| BridgeError::Resolution(format!("bad search pattern: {e}")))?;
        Ok(NameFilter { contains, exact })
    }

    fn matches(&self, symbol: &FoundSymbol) -> bool {
        if matches!(symbol.kind.as_str(), "method" | "function" | "constructor") {
            self.contains.is_match(&symbol.name)
        } else {
            let bare = symbol.name.split('(').next().unwrap_or(&symbol.name).trim();
            self.exact.is_match(bare)
        }
    }
}

/// Accepts both `SymbolInformation[]` (location with range) and
/// `WorkspaceSymbol[]` (location possibly uri-only) response shapes.
fn parse_workspace_symbols(raw: &Value) -> Vec<FoundSymbol> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let kind: SymbolKind = serde_json::from_value(item.get("kind")?.clone()).ok()?;
            let location = item.get("location")?;
            let uri = location.get("uri")?.as_str()?.to_string();
            let range = location
                .get("range")
                .and_then(|r| serde_json::from_value(r.clone()).ok());
            let container = item
                .get("containerName")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(FoundSymbol {
                name,
                kind: symbol_kind_name(kind).to_string(),
                uri,
                range,
                container,
            })
        })
        .collect()
}

fn dedup_symbols(symbols: &mut Vec<FoundSymbol>) {
    let mut seen = HashSet::new();
    symbols.retain(|s| {
        seen.insert((
            s.name.clone(),
            s.uri.clone(),
            s.range.map(|r| (r.start.line, r.start.character, r.end.line, r.end.character)),
        ))
    });
}

#[derive(Debug, Serialize)]
pub struct DiagnosticSummary {
    pub line: u32,
    pub character: u32,
    pub severity: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileDiagnosticsEntry {
    pub file: String,
    pub diagnostics: Vec<DiagnosticSummary>,
    /// Set when `max_per_file` cut the list short.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub omitted: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceDiagnostics {
    pub files: Vec<FileDiagnosticsEntry>,
    pub files_scanned: usize,
    pub total_diagnostics: usize,
    /// Severity breakdown, present only when the caller asked to group by
    /// severity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_severity: Option<BTreeMap<&'static str, usize>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl Bridge {
    /// Sweeps every file each server is responsible for, collecting
    /// non-empty diagnostics. Traversal honors `.gitignore` plus the
    /// caller's include/exclude globs, and is depth-limited to keep the cost
    /// bounded on monorepos.
    pub async fn get_all_diagnostics(
        &self,
        include_globs: &[String],
        exclude_globs: &[String],
        max_per_file: usize,
        group_by_severity: bool,
        include_source: bool,
    ) -> Result<WorkspaceDiagnostics> {
        let ready = self.registry.ensure_all_ready().await;
        let mut files: Vec<PathBuf> = Vec::new();
        for (_, server) in &ready {
            let root = server.root.clone();
            let extensions = server.config.extensions.clone();
            let include = include_globs.to_vec();
            let exclude = exclude_globs.to_vec();
            let found = tokio::task::spawn_blocking(move || {
                enumerate_files(&root, &extensions, &include, &exclude)
            })
            .await
            .map_err(|e| BridgeError::Io(std::io::Error::other(e)))??;
            files.extend(found);
        }
        files.sort();
        files.dedup();

        let mut result = WorkspaceDiagnostics {
            files: Vec::new(),
            files_scanned: files.len(),
            total_diagnostics: 0,
            by_severity: group_by_severity.then(BTreeMap::new),
            failures: Vec::new(),
        };

        for batch in files.chunks(DIAGNOSTIC_BATCH) {
            for path in batch {
                match self.get_diagnostics(path).await {
                    Ok(report) if !report.diagnostics.is_empty() => {
                        let total = report.diagnostics.len();
                        let mut summaries: Vec<DiagnosticSummary> = report
                            .diagnostics
                            .iter()
                            .map(|d| {
                                let severity = severity_name(d.severity);
                                if let Some(counts) = result.by_severity.as_mut() {
                                    *counts.entry(severity).or_insert(0) += 1;
                                }
                                DiagnosticSummary {
                                    line: d.range.start.line + 1,
                                    character: d.range.start.character + 1,
                                    severity,
                                    message: d.message.clone(),
                                    source: include_source.then(|| d.source.clone()).flatten(),
                                }
                            })
                            .collect();
                        result.total_diagnostics += total;
                        summaries.truncate(max_per_file);
                        result.files.push(FileDiagnosticsEntry {
                            file: path.display().to_string(),
                            omitted: (total > summaries.len()).then(|| total - summaries.len()),
                            diagnostics: summaries,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => result
                        .failures
                        .push(format!("{}: {e}", path.display())),
                }
            }
            if files.len() > DIAGNOSTIC_BATCH {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }
        Ok(result)
    }
}

fn severity_name(severity: Option<lsp_types::DiagnosticSeverity>) -> &'static str {
    use lsp_types::DiagnosticSeverity as S;
    match severity {
        Some(s) if s == S::ERROR => "error",
        Some(s) if s == S::WARNING => "warning",
        Some(s) if s == S::INFORMATION => "information",
        Some(s) if s == S::HINT => "hint",
        _ => "unspecified",
    }
}

/// Gitignore-aware, depth-limited enumeration of the files a server handles.
fn enumerate_files(
    root: &std::path::Path,
    extensions: &[String],
    include_globs: &[String],
    exclude_globs: &[String],
) -> Result<Vec<PathBuf>> {
    let mut overrides = ignore::overrides::OverrideBuilder::new(root);
    for glob in include_globs {
        overrides
            .add(glob)
            .map_err(|e| BridgeError::Configuration(format!("bad include glob {glob}: {e}")))?;
    }
    for glob in exclude_globs {
        overrides
            .add(&format!("!{glob}"))
            .map_err(|e| BridgeError::Configuration(format!("bad exclude glob {glob}: {e}")))?;
    }
    let overrides = overrides
        .build()
        .map_err(|e| BridgeError::Configuration(format!("bad glob set: {e}")))?;

    let walker = ignore::WalkBuilder::new(root)
        .max_depth(Some(SWEEP_MAX_DEPTH))
        .overrides(overrides)
        .build();

    let mut files = Vec::new();
    for entry in walker.flatten() {
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if let Some(ext) = file_extension(path) {
            if extensions.iter().any(|e| e == ext) {
                files.push(path.to_path_buf());
            }
        }
    }
    Ok(files)
}
