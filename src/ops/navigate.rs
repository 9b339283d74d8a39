//! Definition, references and rename: the navigation operations built on
//! the symbol resolver.

use std::path::Path;

use lsp_types::{Location, Position, Range, Uri, WorkspaceEdit};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{BridgeError, Result};
use crate::lsp::symbols::{SymbolMatch, find_symbols_by_name};
use crate::ops::Bridge;
use crate::uri::path_to_uri;

/// Locations plus any resolver warnings. `message` is set when the result is
/// empty, so the agent channel has something actionable to show.
#[derive(Debug, Serialize)]
pub struct NavigationResult {
    pub locations: Vec<Location>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A rename candidate reported back to the caller. Positions are 1-indexed
/// because they are meant to be pasted into the strict variant.
#[derive(Debug, Serialize)]
pub struct RenameCandidate {
    pub name: String,
    pub kind: String,
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenameOutcome {
    /// More than one symbol matched; nothing was renamed.
    Ambiguous {
        candidates: Vec<RenameCandidate>,
        message: String,
    },
    /// The server produced a workspace edit for the rename.
    Renamed {
        edit: WorkspaceEdit,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    NotFound {
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
}

impl Bridge {
    /// `textDocument/definition` for every resolver match, aggregated.
    pub async fn find_definition(
        &self,
        path: &Path,
        symbol_name: &str,
        symbol_kind: Option<&str>,
    ) -> Result<NavigationResult> {
        self.locate(path, symbol_name, symbol_kind, |uri, position| {
            (
                "textDocument/definition",
                json!({
                    "textDocument": {"uri": uri},
                    "position": position,
                }),
            )
        })
        .await
    }

    /// `textDocument/references` for every resolver match, aggregated.
    pub async fn find_references(
        &self,
        path: &Path,
        symbol_name: &str,
        symbol_kind: Option<&str>,
        include_declaration: bool,
    ) -> Result<NavigationResult> {
        self.locate(path, symbol_name, symbol_kind, move |uri, position| {
            (
                "textDocument/references",
                json!({
                    "textDocument": {"uri": uri},
                    "position": position,
                    "context": {"includeDeclaration": include_declaration},
                }),
            )
        })
        .await
    }

    async fn locate<F>(
        &self,
        path: &Path,
        symbol_name: &str,
        symbol_kind: Option<&str>,
        build_request: F,
    ) -> Result<NavigationResult>
    where
        F: Fn(&Uri, Position) -> (&'static str, Value),
    {
        let server = self.registry.server_for_path(path).await?;
        let search = find_symbols_by_name(&server, path, symbol_name, symbol_kind).await?;
        let uri = path_to_uri(path)?;

        let mut locations = Vec::new();
        for symbol in &search.matches {
            let (method, params) = build_request(&uri, symbol.position);
            match server.request(method, params).await {
                Ok(value) => locations.extend(locations_from_value(value)),
                Err(e) => tracing::debug!(
                    "{method} at {}:{} failed: {e}",
                    symbol.position.line,
                    symbol.position.character
                ),
            }
        }
        dedup_locations(&mut locations);

        let message = locations.is_empty().then(|| {
            let mut message = format!("No locations retrievable for \"{symbol_name}\"");
            if search.matches.is_empty() {
                message.push_str(" (no matching symbols in the document)");
            }
            message
        });
        Ok(NavigationResult {
            locations,
            warnings: search.warnings,
            message,
        })
    }

    /// Resolver-based rename. Refuses ambiguity: with more than one match
    /// the caller gets the candidate list and must use the strict variant.
    pub async fn rename_symbol(
        &self,
        path: &Path,
        symbol_name: &str,
        symbol_kind: Option<&str>,
        new_name: &str,
    ) -> Result<RenameOutcome> {
        let server = self.registry.server_for_path(path).await?;
        let search = find_symbols_by_name(&server, path, symbol_name, symbol_kind).await?;

        match search.matches.len() {
            0 => Ok(RenameOutcome::NotFound {
                message: format!("no symbol named \"{symbol_name}\" found in {}", path.display()),
                warnings: search.warnings,
            }),
            1 => {
                let position = search.matches[0].position;
                self.rename_at(path, position, new_name, search.warnings).await
            }
            _ => Ok(RenameOutcome::Ambiguous {
                candidates: search.matches.iter().map(candidate).collect(),
                message: format!(
                    "{} symbols named \"{symbol_name}\" found; re-run rename_symbol_strict with one of the listed positions",
                    search.matches.len()
                ),
            }),
        }
    }

    /// Position-based rename. Line and character arrive 1-indexed from the
    /// agent channel and are clamped at zero after conversion.
    pub async fn rename_symbol_strict(
        &self,
        path: &Path,
        line: u32,
        character: u32,
        new_name: &str,
    ) -> Result<RenameOutcome> {
        let position = Position::new(line.saturating_sub(1), character.saturating_sub(1));
        self.rename_at(path, position, new_name, Vec::new()).await
    }

    async fn rename_at(
        &self,
        path: &Path,
        position: Position,
        new_name: &str,
        warnings: Vec<String>,
    ) -> Result<RenameOutcome> {
        let server = self.registry.server_for_path(path).await?;
        server.ensure_file_open(path).await?;
        let uri = path_to_uri(path)?;

        let raw = server
            .request(
                "textDocument/rename",
                json!({
                    "textDocument": {"uri": uri},
                    "position": position,
                    "newName": new_name,
                }),
            )
            .await?;
        let edit: Option<WorkspaceEdit> = serde_json::from_value(raw)
            .map_err(|e| BridgeError::Protocol(format!("bad rename response: {e}")))?;

        match edit {
            Some(edit) => Ok(RenameOutcome::Renamed { edit, warnings }),
            None => Ok(RenameOutcome::NotFound {
                message: format!(
                    "server produced no edit for rename at {}:{}",
                    position.line + 1,
                    position.character + 1
                ),
                warnings,
            }),
        }
    }
}

fn candidate(symbol: &SymbolMatch) -> RenameCandidate {
    RenameCandidate {
        name: symbol.name.clone(),
        kind: symbol.kind.clone(),
        line: symbol.position.line + 1,
        character: symbol.position.character + 1,
    }
}

/// Normalizes the three wire shapes of definition-style responses
/// (`Location`, `Location[]`, `LocationLink[]`) into a flat location list.
pub(crate) fn locations_from_value(value: Value) -> Vec<Location> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| {
                if item.get("targetUri").is_some() {
                    let uri: Uri = serde_json::from_value(item.get("targetUri")?.clone()).ok()?;
                    let range: Range =
                        serde_json::from_value(item.get("targetSelectionRange")?.clone()).ok()?;
                    Some(Location::new(uri, range))
                } else {
                    serde_json::from_value(item).ok()
                }
            })
            .collect(),
        single => serde_json::from_value::<Location>(single)
            .map(|l| vec![l])
            .unwrap_or_default(),
    }
}

fn dedup_locations(locations: &mut Vec<Location>) {
    let mut seen = std::collections::HashSet::new();
    locations.retain(|l| {
        seen.insert((
            l.uri.as_str().to_string(),
            l.range.start.line,
            l.range.start.character,
            l.range.end.line,
            l.range.end.character,
        ))
    });
}
