//! Class-member enumeration and method-signature recovery.
//!
//! Type information is scraped from whatever the server offers, in order of
//! fidelity: signature help for callables, hover text for fields and
//! properties, and `textDocument/typeDefinition` for a definition location.
//! Signature labels are parsed with the shared regexes below; parameter
//! splitting respects nesting so `Map<string, number>` stays one parameter.

use std::path::Path;

use lsp_types::{DocumentSymbol, DocumentSymbolResponse, Location, Position, SymbolKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::error::{BridgeError, Result};
use crate::lsp::server::LanguageServer;
use crate::lsp::symbols::{
    ParameterInfo, TypeInfo, find_symbols_by_name, symbol_kind_name,
};
use crate::ops::Bridge;
use crate::ops::navigate::locations_from_value;
use crate::ops::probe::{hover_at, signature_help_at};
use crate::uri::path_to_uri;

/// Return type after the parameter list: `): T`, `) => T`, or `) -> T`.
/// The greedy prefix pins the match to the last `)`, i.e. the close of the
/// outermost parameter list rather than a nested one.
static RETURN_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".*\)\s*(?::|=>|->)\s*(.+)$").expect("return type regex"));

/// `name?: Type = default` in a parameter list. The default-value branch
/// refuses to start at `>` so the `=>` of an arrow type stays part of the
/// type instead of becoming a default.
static PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+)(\?)?\s*:\s*(.+?)(?:\s*=\s*([^>\s].*))?$").expect("parameter regex")
});

/// `name?: Type` anywhere in hover text, used for fields and properties.
static PROPERTY_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+)(\?)?\s*:\s*([^;\n]+)").expect("property type regex"));

#[derive(Debug, Serialize)]
pub struct ClassMember {
    pub name: String,
    pub kind: String,
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_info: Option<TypeInfo>,
}

#[derive(Debug, Serialize)]
pub struct ClassMembersResult {
    pub class: String,
    pub members: Vec<ClassMember>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MethodSignature {
    pub name: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    pub parameters: Vec<ParameterInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MethodSignatureResult {
    pub signatures: Vec<MethodSignature>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Bridge {
    /// Enumerates the members of a class (or interface/struct) with whatever
    /// type information the server will give up.
    pub async fn get_class_members(&self, path: &Path, class_name: &str) -> Result<ClassMembersResult> {
        let server = self.registry.server_for_path(path).await?;
        server.ensure_file_open(path).await?;
        let response = document_symbols(&server, path).await?;

        let mut warnings = Vec::new();
        let members: Vec<(String, SymbolKind, Position, Option<String>)> = match response {
            Some(DocumentSymbolResponse::Nested(symbols)) => {
                match find_container(&symbols, class_name) {
                    Some(class) => class
                        .children
                        .as_deref()
                        .unwrap_or_default()
                        .iter()
                        .map(|child| {
                            (
                                child.name.clone(),
                                child.kind,
                                child.selection_range.start,
                                child.detail.clone(),
                            )
                        })
                        .collect(),
                    None => {
                        warnings.push(format!("no class named \"{class_name}\" in {}", path.display()));
                        Vec::new()
                    }
                }
            }
            Some(DocumentSymbolResponse::Flat(symbols)) => {
                // Flat responses carry membership only via containerName.
                let members: Vec<_> = symbols
                    .iter()
                    .filter(|s| s.container_name.as_deref() == Some(class_name))
                    .map(|s| (s.name.clone(), s.kind, s.location.range.start, None))
                    .collect();
                if members.is_empty() {
                    warnings.push(format!(
                        "no members with container \"{class_name}\" in {}",
                        path.display()
                    ));
                }
                members
            }
            None => {
                warnings.push("server returned no document symbols".to_string());
                Vec::new()
            }
        };

        let mut out = Vec::with_capacity(members.len());
        for (name, kind, position, detail) in members {
            let type_info = self
                .member_type_info(&server, path, &name, kind, position)
                .await;
            out.push(ClassMember {
                name,
                kind: symbol_kind_name(kind).to_string(),
                position,
                detail,
                type_info,
            });
        }
        Ok(ClassMembersResult {
            class: class_name.to_string(),
            members: out,
            warnings,
        })
    }

    async fn member_type_info(
        &self,
        server: &LanguageServer,
        path: &Path,
        name: &str,
        kind: SymbolKind,
        position: Position,
    ) -> Option<TypeInfo> {
        let callable = kind == SymbolKind::METHOD
            || kind == SymbolKind::CONSTRUCTOR
            || kind == SymbolKind::FUNCTION;
        let mut info = if callable {
            match signature_help_at(server, path, position).await.ok()? {
                Some(help) => help
                    .signatures
                    .first()
                    .map(|s| parse_signature_label(&s.label)),
                None => None,
            }
        } else {
            match hover_at(server, path, position).await.ok()? {
                Some((_, text)) => parse_property_type(&text, name).map(|type_name| TypeInfo {
                    return_type: Some(type_name),
                    ..TypeInfo::default()
                }),
                None => None,
            }
        }
        .unwrap_or_default();

        if let Ok(Some(location)) = type_definition_at(server, path, position).await {
            info.definition_location = Some(location);
        }
        if info.is_empty() { None } else { Some(info) }
    }

    /// Signature of a named method, optionally restricted to one class.
    pub async fn get_method_signature(
        &self,
        path: &Path,
        method_name: &str,
        class_name: Option<&str>,
    ) -> Result<MethodSignatureResult> {
        let server = self.registry.server_for_path(path).await?;
        let mut warnings = Vec::new();

        let positions: Vec<(String, Position)> = match class_name {
            Some(class) => {
                server.ensure_file_open(path).await?;
                match document_symbols(&server, path).await? {
                    Some(DocumentSymbolResponse::Nested(symbols)) => find_container(&symbols, class)
                        .and_then(|c| c.children.as_deref())
                        .unwrap_or_default()
                        .iter()
                        .filter(|child| child.name == method_name)
                        .map(|child| (child.name.clone(), child.selection_range.start))
                        .collect(),
                    Some(DocumentSymbolResponse::Flat(symbols)) => symbols
                        .iter()
                        .filter(|s| {
                            s.name == method_name && s.container_name.as_deref() == Some(class)
                        })
                        .map(|s| (s.name.clone(), s.location.range.start))
                        .collect(),
                    None => Vec::new(),
                }
            }
            None => {
                let search = find_symbols_by_name(&server, path, method_name, Some("method")).await?;
                warnings.extend(search.warnings);
                search
                    .matches
                    .into_iter()
                    .map(|m| (m.name, m.position))
                    .collect()
            }
        };

        if positions.is_empty() {
            warnings.push(match class_name {
                Some(class) => format!("no method \"{method_name}\" on class \"{class}\""),
                None => format!("no method named \"{method_name}\" in {}", path.display()),
            });
        }

        let mut signatures = Vec::new();
        for (name, position) in positions {
            let Some(help) = signature_help_at(&server, path, position).await? else {
                // Some servers only expose signatures through hover text.
                if let Some((_, text)) = hover_at(&server, path, position).await? {
                    if let Some(label) = text.lines().find(|l| l.contains('(')) {
                        let info = parse_signature_label(label);
                        signatures.push(MethodSignature {
                            name: name.clone(),
                            label: label.trim().to_string(),
                            return_type: info.return_type,
                            parameters: info.parameters.unwrap_or_default(),
                            documentation: None,
                        });
                    }
                }
                continue;
            };
            for signature in &help.signatures {
                let info = parse_signature_label(&signature.label);
                signatures.push(MethodSignature {
                    name: name.clone(),
                    label: signature.label.clone(),
                    return_type: info.return_type,
                    parameters: info.parameters.unwrap_or_default(),
                    documentation: signature.documentation.as_ref().map(|d| match d {
                        lsp_types::Documentation::String(s) => s.clone(),
                        lsp_types::Documentation::MarkupContent(m) => m.value.clone(),
                    }),
                });
            }
        }
        Ok(MethodSignatureResult {
            signatures,
            warnings,
        })
    }
}

async fn document_symbols(
    server: &LanguageServer,
    path: &Path,
) -> Result<Option<DocumentSymbolResponse>> {
    let uri = path_to_uri(path)?;
    let raw = server
        .request(
            "textDocument/documentSymbol",
            json!({"textDocument": {"uri": uri}}),
        )
        .await?;
    serde_json::from_value(raw)
        .map_err(|e| BridgeError::Protocol(format!("bad documentSymbol response: {e}")))
}

/// Depth-first search for a class-like container by name.
fn find_container<'a>(symbols: &'a [DocumentSymbol], name: &str) -> Option<&'a DocumentSymbol> {
    for symbol in symbols {
        let container_like = [
            SymbolKind::CLASS,
            SymbolKind::INTERFACE,
            SymbolKind::STRUCT,
            SymbolKind::ENUM,
        ]
        .contains(&symbol.kind);
        if container_like && symbol.name == name {
            return Some(symbol);
        }
        if let Some(children) = &symbol.children {
            if let Some(found) = find_container(children, name) {
                return Some(found);
            }
        }
    }
    None
}

async fn type_definition_at(
    server: &LanguageServer,
    path: &Path,
    position: Position,
) -> Result<Option<Location>> {
    let uri = path_to_uri(path)?;
    let raw = server
        .request(
            "textDocument/typeDefinition",
            json!({"textDocument": {"uri": uri}, "position": position}),
        )
        .await?;
    Ok(locations_from_value(raw).into_iter().next())
}

/// Parses a signature label like `greet(name: string, n?: number = 1): void`
/// into a return type and parameter records.
pub fn parse_signature_label(label: &str) -> TypeInfo {
    let return_type = RETURN_TYPE_RE
        .captures(label)
        .map(|c| c[1].trim().to_string());

    let parameters = parameter_region(label).map(|region| {
        split_parameters(region)
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .map(|part| parse_parameter(part.trim()))
            .collect::<Vec<_>>()
    });

    TypeInfo {
        return_type,
        parameters: parameters.filter(|p: &Vec<ParameterInfo>| !p.is_empty()),
        definition_location: None,
    }
}

/// The text between the first `(` and its matching `)`.
fn parameter_region(label: &str) -> Option<&str> {
    let open = label.find('(')?;
    let mut depth = 0usize;
    for (offset, c) in label[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&label[open + 1..open + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits a parameter list on commas, ignoring commas nested inside
/// `<>`, `()`, `[]`, `{}` or string literals.
pub fn split_parameters(region: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut angle = 0i32;
    let mut round = 0i32;
    let mut square = 0i32;
    let mut curly = 0i32;
    let mut quote: Option<char> = None;

    for c in region.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '<' => {
                angle += 1;
                current.push(c);
            }
            '>' => {
                angle = (angle - 1).max(0);
                current.push(c);
            }
            '(' => {
                round += 1;
                current.push(c);
            }
            ')' => {
                round -= 1;
                current.push(c);
            }
            '[' => {
                square += 1;
                current.push(c);
            }
            ']' => {
                square -= 1;
                current.push(c);
            }
            '{' => {
                curly += 1;
                current.push(c);
            }
            '}' => {
                curly -= 1;
                current.push(c);
            }
            ',' if angle == 0 && round == 0 && square == 0 && curly == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_parameter(part: &str) -> ParameterInfo {
    if let Some(captures) = PARAM_RE.captures(part) {
        return ParameterInfo {
            name: captures[1].to_string(),
            type_name: captures[3].trim().to_string(),
            is_optional: captures.get(2).is_some() || captures.get(4).is_some(),
            default_value: captures.get(4).map(|m| m.as_str().trim().to_string()),
            definition_location: None,
        };
    }
    // Untyped parameter (or a language without `name: Type` syntax).
    let (name, default_value) = match part.split_once('=') {
        Some((name, default)) => (name.trim(), Some(default.trim().to_string())),
        None => (part, None),
    };
    ParameterInfo {
        name: name.trim_end_matches('?').to_string(),
        type_name: String::new(),
        is_optional: part.contains('?') || default_value.is_some(),
        default_value,
        definition_location: None,
    }
}

/// Pulls `name: Type` out of hover text for a field or property.
fn parse_property_type(hover_text: &str, member_name: &str) -> Option<String> {
    for captures in PROPERTY_TYPE_RE.captures_iter(hover_text) {
        if &captures[1] == member_name {
            return Some(captures[3].trim().to_string());
        }
    }
    None
}
