//! Hover, signature help and completion.
//!
//! These three requests are the ones that have proven brittle about 0- vs
//! 1-indexed coordinates across server implementations, so each is probed at
//! up to four neighboring positions and the first non-empty answer wins.

use std::path::Path;

use lsp_types::{
    CompletionItemKind, CompletionResponse, Hover, HoverContents, MarkedString, ParameterLabel,
    Position, SignatureHelp,
};
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::lsp::server::LanguageServer;
use crate::lsp::symbols::{find_symbols_by_name, probe_positions};
use crate::ops::Bridge;
use crate::uri::path_to_uri;

/// Default cap on returned completion items.
pub const DEFAULT_COMPLETION_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
pub struct HoverResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SignatureSummary {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    pub parameters: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SignatureHelpResult {
    pub signatures: Vec<SignatureSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_signature: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_parameter: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CompletionEntry {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub insert_text: String,
}

#[derive(Debug, Serialize)]
pub struct CompletionResult {
    pub items: Vec<CompletionEntry>,
    pub is_incomplete: bool,
    /// True when the caller-specified cap cut the list short.
    pub truncated: bool,
}

impl Bridge {
    /// Hover text for a named symbol.
    pub async fn get_hover(
        &self,
        path: &Path,
        symbol_name: &str,
        symbol_kind: Option<&str>,
    ) -> Result<HoverResult> {
        let server = self.registry.server_for_path(path).await?;
        let mut search = find_symbols_by_name(&server, path, symbol_name, symbol_kind).await?;
        let Some(symbol) = search.matches.first() else {
            search
                .warnings
                .push(format!("no symbol named \"{symbol_name}\" in {}", path.display()));
            return Ok(HoverResult {
                contents: None,
                position: None,
                warnings: search.warnings,
            });
        };
        if search.matches.len() > 1 {
            search.warnings.push(format!(
                "{} symbols matched \"{symbol_name}\", using the first",
                search.matches.len()
            ));
        }

        let hover = hover_at(&server, path, symbol.position).await?;
        Ok(HoverResult {
            contents: hover.as_ref().map(|(_, text)| text.clone()),
            position: hover.map(|(position, _)| position),
            warnings: search.warnings,
        })
    }

    /// Signature help for a named symbol (typically a function or method).
    pub async fn get_signature_help(
        &self,
        path: &Path,
        symbol_name: &str,
        symbol_kind: Option<&str>,
    ) -> Result<SignatureHelpResult> {
        let server = self.registry.server_for_path(path).await?;
        let mut search = find_symbols_by_name(&server, path, symbol_name, symbol_kind).await?;
        let Some(symbol) = search.matches.first() else {
            search
                .warnings
                .push(format!("no symbol named \"{symbol_name}\" in {}", path.display()));
            return Ok(SignatureHelpResult {
                signatures: Vec::new(),
                active_signature: None,
                active_parameter: None,
                warnings: search.warnings,
            });
        };

        let help = signature_help_at(&server, path, symbol.position).await?;
        let Some(help) = help else {
            return Ok(SignatureHelpResult {
                signatures: Vec::new(),
                active_signature: None,
                active_parameter: None,
                warnings: search.warnings,
            });
        };
        Ok(SignatureHelpResult {
            signatures: help.signatures.iter().map(summarize_signature).collect(),
            active_signature: help.active_signature,
            active_parameter: help.active_parameter,
            warnings: search.warnings,
        })
    }

    /// Completion items at an explicit 0-indexed position.
    pub async fn get_completion(
        &self,
        path: &Path,
        position: Position,
        max_results: Option<usize>,
    ) -> Result<CompletionResult> {
        let server = self.registry.server_for_path(path).await?;
        server.ensure_file_open(path).await?;
        let uri = path_to_uri(path)?;
        let limit = max_results.unwrap_or(DEFAULT_COMPLETION_LIMIT);

        let mut items = Vec::new();
        let mut is_incomplete = false;
        for candidate in probe_positions(position) {
            let raw = match server
                .request(
                    "textDocument/completion",
                    json!({
                        "textDocument": {"uri": uri},
                        "position": candidate,
                        "context": {"triggerKind": 1},
                    }),
                )
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::debug!("completion probe failed at {candidate:?}: {e}");
                    continue;
                }
            };
            if raw.is_null() {
                continue;
            }
            let response: CompletionResponse = match serde_json::from_value(raw) {
                Ok(response) => response,
                Err(_) => continue,
            };
            let raw_items = match response {
                CompletionResponse::Array(items) => items,
                CompletionResponse::List(list) => {
                    is_incomplete = list.is_incomplete;
                    list.items
                }
            };
            if raw_items.is_empty() {
                continue;
            }
            items = raw_items;
            break;
        }

        let truncated = items.len() > limit;
        items.truncate(limit);
        Ok(CompletionResult {
            items: items
                .into_iter()
                .map(|item| {
                    let insert_text = item
                        .insert_text
                        .clone()
                        .or_else(|| item.filter_text.clone())
                        .unwrap_or_else(|| item.label.clone());
                    CompletionEntry {
                        label: item.label,
                        kind: item.kind.map(completion_kind_name),
                        detail: item.detail,
                        insert_text,
                    }
                })
                .collect(),
            is_incomplete,
            truncated,
        })
    }
}

/// Probes hover around `position`; returns the winning position and the
/// rendered text.
pub(crate) async fn hover_at(
    server: &LanguageServer,
    path: &Path,
    position: Position,
) -> Result<Option<(Position, String)>> {
    server.ensure_file_open(path).await?;
    let uri = path_to_uri(path)?;
    for candidate in probe_positions(position) {
        let raw = match server
            .request(
                "textDocument/hover",
                json!({"textDocument": {"uri": uri}, "position": candidate}),
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("hover probe failed at {candidate:?}: {e}");
                continue;
            }
        };
        if raw.is_null() {
            continue;
        }
        let Ok(hover) = serde_json::from_value::<Hover>(raw) else {
            continue;
        };
        let text = render_hover(&hover);
        if !text.is_empty() {
            return Ok(Some((candidate, text)));
        }
    }
    Ok(None)
}

/// Probes signature help around `position`.
pub(crate) async fn signature_help_at(
    server: &LanguageServer,
    path: &Path,
    position: Position,
) -> Result<Option<SignatureHelp>> {
    server.ensure_file_open(path).await?;
    let uri = path_to_uri(path)?;
    for candidate in probe_positions(position) {
        let raw = match server
            .request(
                "textDocument/signatureHelp",
                json!({"textDocument": {"uri": uri}, "position": candidate}),
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("signature help probe failed at {candidate:?}: {e}");
                continue;
            }
        };
        if raw.is_null() {
            continue;
        }
        let Ok(help) = serde_json::from_value::<SignatureHelp>(raw) else {
            continue;
        };
        if !help.signatures.is_empty() {
            return Ok(Some(help));
        }
    }
    Ok(None)
}

fn render_hover(hover: &Hover) -> String {
    match &hover.contents {
        HoverContents::Scalar(marked) => render_marked_string(marked),
        HoverContents::Array(parts) => parts
            .iter()
            .map(render_marked_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value.trim().to_string(),
    }
}

fn render_marked_string(marked: &MarkedString) -> String {
    match marked {
        MarkedString::String(s) => s.trim().to_string(),
        MarkedString::LanguageString(ls) => ls.value.trim().to_string(),
    }
}

fn summarize_signature(signature: &lsp_types::SignatureInformation) -> SignatureSummary {
    let parameters = signature
        .parameters
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|p| match &p.label {
            ParameterLabel::Simple(label) => label.clone(),
            ParameterLabel::LabelOffsets([start, end]) => signature
                .label
                .chars()
                .skip(*start as usize)
                .take((*end - *start) as usize)
                .collect(),
        })
        .collect();
    SignatureSummary {
        label: signature.label.clone(),
        documentation: signature.documentation.as_ref().map(render_documentation),
        parameters,
    }
}

fn render_documentation(documentation: &lsp_types::Documentation) -> String {
    match documentation {
        lsp_types::Documentation::String(s) => s.clone(),
        lsp_types::Documentation::MarkupContent(markup) => markup.value.clone(),
    }
}

fn completion_kind_name(kind: CompletionItemKind) -> &'static str {
    const NAMES: &[(CompletionItemKind, &str)] = &[
        (CompletionItemKind::TEXT, "text"),
        (CompletionItemKind::METHOD, "method"),
        (CompletionItemKind::FUNCTION, "function"),
        (CompletionItemKind::CONSTRUCTOR, "constructor"),
        (CompletionItemKind::FIELD, "field"),
        (CompletionItemKind::VARIABLE, "variable"),
        (CompletionItemKind::CLASS, "class"),
        (CompletionItemKind::INTERFACE, "interface"),
        (CompletionItemKind::MODULE, "module"),
        (CompletionItemKind::PROPERTY, "property"),
        (CompletionItemKind::UNIT, "unit"),
        (CompletionItemKind::VALUE, "value"),
        (CompletionItemKind::ENUM, "enum"),
        (CompletionItemKind::KEYWORD, "keyword"),
        (CompletionItemKind::SNIPPET, "snippet"),
        (CompletionItemKind::COLOR, "color"),
        (CompletionItemKind::FILE, "file"),
        (CompletionItemKind::REFERENCE, "reference"),
        (CompletionItemKind::FOLDER, "folder"),
        (CompletionItemKind::ENUM_MEMBER, "enum_member"),
        (CompletionItemKind::CONSTANT, "constant"),
        (CompletionItemKind::STRUCT, "struct"),
        (CompletionItemKind::EVENT, "event"),
        (CompletionItemKind::OPERATOR, "operator"),
        (CompletionItemKind::TYPE_PARAMETER, "type_parameter"),
    ];
    NAMES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}
