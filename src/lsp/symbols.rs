//! Name-and-kind symbol resolution on top of `textDocument/documentSymbol`.
//!
//! Servers answer in one of two shapes: a hierarchical `DocumentSymbol` tree
//! whose `selectionRange` pins the identifier, or a flat `SymbolInformation`
//! list that only carries the enclosing range. Definition, references and
//! rename requests return nothing when aimed at whitespace or a keyword, so
//! for the flat shape the identifier column is recovered from the on-disk
//! text before a position is handed out.

use std::path::Path;

use lsp_types::{
    DocumentSymbol, DocumentSymbolResponse, Location, Position, Range, SymbolInformation,
    SymbolKind,
};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::lsp::server::LanguageServer;
use crate::uri::path_to_uri;

/// The canonical LSP 3.17 symbol-kind names, in wire-value order (1..=26).
pub const SYMBOL_KINDS: &[(&str, SymbolKind)] = &[
    ("file", SymbolKind::FILE),
    ("module", SymbolKind::MODULE),
    ("namespace", SymbolKind::NAMESPACE),
    ("package", SymbolKind::PACKAGE),
    ("class", SymbolKind::CLASS),
    ("method", SymbolKind::METHOD),
    ("property", SymbolKind::PROPERTY),
    ("field", SymbolKind::FIELD),
    ("constructor", SymbolKind::CONSTRUCTOR),
    ("enum", SymbolKind::ENUM),
    ("interface", SymbolKind::INTERFACE),
    ("function", SymbolKind::FUNCTION),
    ("variable", SymbolKind::VARIABLE),
    ("constant", SymbolKind::CONSTANT),
    ("string", SymbolKind::STRING),
    ("number", SymbolKind::NUMBER),
    ("boolean", SymbolKind::BOOLEAN),
    ("array", SymbolKind::ARRAY),
    ("object", SymbolKind::OBJECT),
    ("key", SymbolKind::KEY),
    ("null", SymbolKind::NULL),
    ("enum_member", SymbolKind::ENUM_MEMBER),
    ("struct", SymbolKind::STRUCT),
    ("event", SymbolKind::EVENT),
    ("operator", SymbolKind::OPERATOR),
    ("type_parameter", SymbolKind::TYPE_PARAMETER),
];

/// Parses a user-supplied kind name, tolerating case and `enumMember`-style
/// spellings.
pub fn symbol_kind_from_name(name: &str) -> Option<SymbolKind> {
    let normalized = name.trim().to_lowercase().replace(['-', ' '], "_");
    SYMBOL_KINDS
        .iter()
        .find(|(kind_name, _)| {
            *kind_name == normalized || kind_name.replace('_', "") == normalized
        })
        .map(|(_, kind)| *kind)
}

pub fn symbol_kind_name(kind: SymbolKind) -> &'static str {
    SYMBOL_KINDS
        .iter()
        .find(|(_, k)| *k == kind)
        .map(|(name, _)| *name)
        .unwrap_or("unknown")
}

/// A parameter extracted from a signature label or hover text.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub is_optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_location: Option<Location>,
}

/// Type details attached to a resolved symbol when they can be recovered.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TypeInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParameterInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_location: Option<Location>,
}

impl TypeInfo {
    pub fn is_empty(&self) -> bool {
        self.return_type.is_none() && self.parameters.is_none() && self.definition_location.is_none()
    }
}

/// A resolved symbol. `position` points at the first character of the
/// identifier itself, never at the declaration keyword.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolMatch {
    pub name: String,
    pub kind: String,
    pub position: Position,
    pub range: Range,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_info: Option<TypeInfo>,
}

/// Resolver output: matches plus any warnings worth relaying to the caller.
#[derive(Debug, Default)]
pub struct SymbolSearch {
    pub matches: Vec<SymbolMatch>,
    pub warnings: Vec<String>,
}

/// Resolves symbols in `path` whose name equals or contains `name`,
/// optionally filtered by kind. A kind filter that eliminates every match is
/// retried without the filter, with a warning naming the kinds present.
pub async fn find_symbols_by_name(
    server: &LanguageServer,
    path: &Path,
    name: &str,
    kind: Option<&str>,
) -> Result<SymbolSearch> {
    server.ensure_file_open(path).await?;
    let uri = path_to_uri(path)?;

    let raw = server
        .request(
            "textDocument/documentSymbol",
            json!({"textDocument": {"uri": uri}}),
        )
        .await?;
    let response: Option<DocumentSymbolResponse> = serde_json::from_value(raw)
        .map_err(|e| BridgeError::Protocol(format!("bad documentSymbol response: {e}")))?;

    let mut search = SymbolSearch::default();
    let requested_kind = match kind {
        Some(raw_kind) => match symbol_kind_from_name(raw_kind) {
            Some(kind) => Some(kind),
            None => {
                search.warnings.push(format!(
                    "unknown symbol kind \"{raw_kind}\", matching any kind instead"
                ));
                None
            }
        },
        None => None,
    };

    let all = match response {
        Some(DocumentSymbolResponse::Nested(symbols)) => {
            let mut collected = Vec::new();
            collect_nested(&symbols, name, &mut collected);
            collected
        }
        Some(DocumentSymbolResponse::Flat(symbols)) => collect_flat(path, &symbols, name).await?,
        None => Vec::new(),
    };

    let filtered: Vec<SymbolMatch> = match requested_kind {
        Some(kind) => {
            let wanted = symbol_kind_name(kind);
            all.iter().filter(|m| m.kind == wanted).cloned().collect()
        }
        None => all.clone(),
    };

    if filtered.is_empty() && requested_kind.is_some() && !all.is_empty() {
        // Callers regularly ask for a "function" that the server reports as
        // a method, or vice versa; surface what exists instead of nothing.
        let mut kinds: Vec<&str> = all.iter().map(|m| m.kind.as_str()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        search.warnings.push(format!(
            "no {} named \"{name}\"; found kinds: {}",
            symbol_kind_name(requested_kind.unwrap()),
            kinds.join(", ")
        ));
        search.matches = all;
    } else {
        search.matches = filtered;
    }

    debug!(
        name,
        count = search.matches.len(),
        "resolved document symbols"
    );
    Ok(search)
}

fn collect_nested(symbols: &[DocumentSymbol], name: &str, out: &mut Vec<SymbolMatch>) {
    for symbol in symbols {
        if symbol.name == name || symbol.name.contains(name) {
            out.push(SymbolMatch {
                name: symbol.name.clone(),
                kind: symbol_kind_name(symbol.kind).to_string(),
                // selectionRange is documented to cover the identifier.
                position: symbol.selection_range.start,
                range: symbol.range,
                detail: symbol.detail.clone(),
                type_info: None,
            });
        }
        if let Some(children) = &symbol.children {
            collect_nested(children, name, out);
        }
    }
}

async fn collect_flat(
    path: &Path,
    symbols: &[SymbolInformation],
    name: &str,
) -> Result<Vec<SymbolMatch>> {
    let matching: Vec<&SymbolInformation> = symbols
        .iter()
        .filter(|s| s.name == name || s.name.contains(name))
        .collect();
    if matching.is_empty() {
        return Ok(Vec::new());
    }

    // Flat symbols only carry the declaration range; scan the source text
    // for the identifier so the returned position lands on it.
    let text = tokio::fs::read_to_string(path).await?;
    Ok(matching
        .into_iter()
        .map(|symbol| {
            let range = symbol.location.range;
            let position =
                locate_identifier(&text, &symbol.name, &range).unwrap_or(range.start);
            SymbolMatch {
                name: symbol.name.clone(),
                kind: symbol_kind_name(symbol.kind).to_string(),
                position,
                range,
                detail: symbol.container_name.clone(),
                type_info: None,
            }
        })
        .collect())
}

/// First word-bounded occurrence of `name` inside `range`, as a position.
fn locate_identifier(text: &str, name: &str, range: &Range) -> Option<Position> {
    let lines: Vec<&str> = text.split('\n').collect();
    for line_no in range.start.line..=range.end.line {
        let Some(line) = lines.get(line_no as usize) else {
            break;
        };
        let min_col = (line_no == range.start.line).then_some(range.start.character);
        let max_col = (line_no == range.end.line).then_some(range.end.character);
        if let Some(col) = find_word_in_line(line, name, min_col, max_col) {
            return Some(Position::new(line_no, col));
        }
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn find_word_in_line(line: &str, name: &str, min_col: Option<u32>, max_col: Option<u32>) -> Option<u32> {
    let chars: Vec<char> = line.chars().collect();
    let needle: Vec<char> = name.chars().collect();
    if needle.is_empty() || chars.len() < needle.len() {
        return None;
    }
    for start in 0..=chars.len() - needle.len() {
        if chars[start..start + needle.len()] != needle[..] {
            continue;
        }
        let bounded_before = start == 0 || !is_word_char(chars[start - 1]);
        let bounded_after =
            start + needle.len() == chars.len() || !is_word_char(chars[start + needle.len()]);
        if !bounded_before || !bounded_after {
            continue;
        }
        let col = start as u32;
        let end_col = col + needle.len() as u32;
        if min_col.is_some_and(|m| col < m) || max_col.is_some_and(|m| end_col > m) {
            continue;
        }
        return Some(col);
    }
    None
}

/// Probe positions for hover, signature help and completion, which are
/// historically brittle about 0- vs 1-indexed coordinates. At most four
/// candidates, clamped at zero, first non-empty answer wins.
pub fn probe_positions(position: Position) -> Vec<Position> {
    let candidates = [
        position,
        Position::new(position.line, position.character.saturating_sub(1)),
        Position::new(position.line.saturating_sub(1), position.character),
        Position::new(
            position.line.saturating_sub(1),
            position.character.saturating_sub(1),
        ),
    ];
    let mut out: Vec<Position> = Vec::with_capacity(4);
    for candidate in candidates {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}
