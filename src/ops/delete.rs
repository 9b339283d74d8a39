//! Safe-delete analysis and execution.
//!
//! A deletion is "safe" when the definition is its only reference. The
//! definition edit swallows whole lines (including the trailing newline)
//! when the declaration owns them, so deleting a top-level function does not
//! leave a blank hole behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lsp_types::{Location, Position, Range, TextEdit};
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::lsp::symbols::{SymbolMatch, find_symbols_by_name};
use crate::ops::Bridge;
use crate::ops::edits::apply_edits_to_file;
use crate::ops::navigate::locations_from_value;
use crate::uri::{path_to_uri, uri_to_path};

/// Everything the analysis learned about the symbol slated for deletion.
#[derive(Debug, Serialize)]
pub struct SymbolDeletionInfo {
    pub symbol: SymbolMatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<Location>,
    pub references: Vec<Location>,
    pub can_safely_delete: bool,
    pub notes: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeletionOutcome {
    /// Dry run: the plan, with nothing written.
    Preview {
        info: SymbolDeletionInfo,
        planned_changes: BTreeMap<String, Vec<String>>,
    },
    Deleted {
        info: SymbolDeletionInfo,
        files_changed: Vec<String>,
    },
    /// Unsafe and neither `delete_references` nor `force_delete` was set.
    Refused {
        info: SymbolDeletionInfo,
        message: String,
    },
    NotFound {
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
}

impl Bridge {
    pub async fn delete_symbol(
        &self,
        path: &Path,
        symbol_name: &str,
        symbol_kind: Option<&str>,
        delete_references: bool,
        dry_run: bool,
        force_delete: bool,
    ) -> Result<DeletionOutcome> {
        let server = self.registry.server_for_path(path).await?;
        let mut search = find_symbols_by_name(&server, path, symbol_name, symbol_kind).await?;
        let Some(symbol) = search.matches.first().cloned() else {
            return Ok(DeletionOutcome::NotFound {
                message: format!("no symbol named \"{symbol_name}\" in {}", path.display()),
                warnings: search.warnings,
            });
        };
        let mut notes = std::mem::take(&mut search.warnings);
        if search.matches.len() > 1 {
            notes.push(format!(
                "{} symbols matched \"{symbol_name}\", analyzing the first ({} at line {})",
                search.matches.len(),
                symbol.kind,
                symbol.position.line + 1
            ));
        }

        let uri = path_to_uri(path)?;
        let definition = server
            .request(
                "textDocument/definition",
                json!({"textDocument": {"uri": uri}, "position": symbol.position}),
            )
            .await
            .map(locations_from_value)
            .ok()
            .and_then(|locations| locations.into_iter().next())
            // A server that cannot answer still lets us fall back to the
            // declaration range the resolver already found.
            .or_else(|| Some(Location::new(uri.clone(), symbol.range)));

        let references: Vec<Location> = server
            .request(
                "textDocument/references",
                json!({
                    "textDocument": {"uri": uri},
                    "position": symbol.position,
                    "context": {"includeDeclaration": true},
                }),
            )
            .await
            .map(locations_from_value)
            .unwrap_or_default();

        let external: Vec<&Location> = references
            .iter()
            .filter(|r| !is_definition_site(r, definition.as_ref()))
            .collect();
        let can_safely_delete = references.len() <= 1;
        notes.push(match external.len() {
            0 => "no references outside the definition".to_string(),
            n => {
                let mut files: Vec<String> = external
                    .iter()
                    .filter_map(|r| uri_to_path(&r.uri).ok())
                    .map(|p| p.display().to_string())
                    .collect();
                files.sort();
                files.dedup();
                format!("{n} external reference(s) across {} file(s): {}", files.len(), files.join(", "))
            }
        });

        // Assemble the edits, definition first, then (optionally) every
        // external reference site.
        let mut edits_by_file: BTreeMap<PathBuf, Vec<TextEdit>> = BTreeMap::new();
        let definition_location = definition
            .clone()
            .unwrap_or_else(|| Location::new(uri.clone(), symbol.range));
        let definition_path = uri_to_path(&definition_location.uri)?;
        let definition_text = tokio::fs::read_to_string(&definition_path).await?;
        let delete_range = whole_line_range(&definition_text, &definition_location.range);
        edits_by_file
            .entry(definition_path)
            .or_default()
            .push(TextEdit {
                range: delete_range,
                new_text: String::new(),
            });

        if delete_references {
            for reference in &external {
                let ref_path = match uri_to_path(&reference.uri) {
                    Ok(path) => path,
                    Err(_) => continue,
                };
                edits_by_file.entry(ref_path).or_default().push(TextEdit {
                    range: reference.range,
                    new_text: String::new(),
                });
            }
        }

        let info = SymbolDeletionInfo {
            symbol,
            definition,
            references,
            can_safely_delete,
            notes,
        };

        if dry_run {
            let mut planned = BTreeMap::new();
            for (file, edits) in &edits_by_file {
                let applied = apply_edits_to_file(file, edits, true).await?;
                planned.insert(file.display().to_string(), applied.summary);
            }
            return Ok(DeletionOutcome::Preview {
                info,
                planned_changes: planned,
            });
        }

        if !info.can_safely_delete && !delete_references && !force_delete {
            return Ok(DeletionOutcome::Refused {
                message: format!(
                    "\"{symbol_name}\" has {} reference(s); re-run with dry_run=true to preview, \
                     delete_references=true to remove the usages too, or force_delete=true to \
                     delete the definition anyway",
                    info.references.len()
                ),
                info,
            });
        }

        let mut files_changed = Vec::new();
        for (file, edits) in &edits_by_file {
            apply_edits_to_file(file, edits, false).await?;
            files_changed.push(file.display().to_string());
        }
        Ok(DeletionOutcome::Deleted {
            info,
            files_changed,
        })
    }
}

fn is_definition_site(reference: &Location, definition: Option<&Location>) -> bool {
    let Some(definition) = definition else {
        return false;
    };
    reference.uri == definition.uri
        && position_within(&reference.range.start, &definition.range)
}

fn position_within(position: &Position, range: &Range) -> bool {
    let p = (position.line, position.character);
    p >= (range.start.line, range.start.character) && p <= (range.end.line, range.end.character)
}

/// Extends a declaration range to consume its whole lines (and the trailing
/// newline) when no other code shares those lines; otherwise the declared
/// range is deleted as-is.
fn whole_line_range(text: &str, range: &Range) -> Range {
    let lines: Vec<&str> = text.split('\n').collect();
    let Some(first_line) = lines.get(range.start.line as usize) else {
        return *range;
    };
    let Some(last_line) = lines.get(range.end.line as usize) else {
        return *range;
    };

    let prefix: String = first_line
        .chars()
        .take(range.start.character as usize)
        .collect();
    let suffix: String = last_line.chars().skip(range.end.character as usize).collect();
    if !prefix.trim().is_empty() || !suffix.trim().is_empty() {
        return *range;
    }

    if (range.end.line as usize) + 1 < lines.len() {
        // Consume the trailing newline so the surrounding lines close up.
        Range::new(
            Position::new(range.start.line, 0),
            Position::new(range.end.line + 1, 0),
        )
    } else {
        Range::new(
            Position::new(range.start.line, 0),
            Position::new(range.end.line, last_line.chars().count() as u32),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_line_declaration_consumes_trailing_newline() {
        let text = "function unused() {\n  return 1;\n}\nfunction used() {}\n";
        let range = Range::new(Position::new(0, 0), Position::new(2, 1));
        let extended = whole_line_range(text, &range);
        assert_eq!(extended.start, Position::new(0, 0));
        assert_eq!(extended.end, Position::new(3, 0));
    }

    #[test]
    fn inline_declaration_keeps_its_exact_range() {
        let text = "const a = 1; const unused = 2;\n";
        let range = Range::new(Position::new(0, 13), Position::new(0, 30));
        assert_eq!(whole_line_range(text, &range), range);
    }

    #[test]
    fn declaration_on_final_line_is_clamped_to_line_end() {
        let text = "const a = 1;\nconst unused = 2;";
        let range = Range::new(Position::new(1, 0), Position::new(1, 17));
        let extended = whole_line_range(text, &range);
        assert_eq!(extended.start, Position::new(1, 0));
        assert_eq!(extended.end, Position::new(1, 17));
    }

    #[test]
    fn reference_at_definition_is_not_external() {
        let definition = Location::new(
            "file:///w/a.ts".parse().unwrap(),
            Range::new(Position::new(0, 0), Position::new(2, 1)),
        );
        let at_definition = Location::new(
            "file:///w/a.ts".parse().unwrap(),
            Range::new(Position::new(0, 9), Position::new(0, 15)),
        );
        let elsewhere = Location::new(
            "file:///w/b.ts".parse().unwrap(),
            Range::new(Position::new(4, 2), Position::new(4, 8)),
        );
        assert!(is_definition_site(&at_definition, Some(&definition)));
        assert!(!is_definition_site(&elsewhere, Some(&definition)));
    }
}
