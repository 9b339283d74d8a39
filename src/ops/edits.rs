//! Client-side application of `TextEdit`s and `WorkspaceEdit`s, plus the
//! formatting operation that produces them.
//!
//! Servers hand back edits against the text they were shown; applying in
//! descending start order keeps earlier edits' coordinates valid without any
//! offset bookkeeping.

use std::collections::BTreeMap;
use std::path::Path;

use lsp_types::{
    DocumentChangeOperation, DocumentChanges, OneOf, Range, ResourceOp, TextEdit, WorkspaceEdit,
};
use serde::Serialize;
use serde_json::json;

use crate::error::{BridgeError, Result};
use crate::ops::Bridge;
use crate::uri::{path_to_uri, uri_to_path};

/// Result of applying a batch of edits to one in-memory text.
#[derive(Debug)]
pub struct AppliedEdits {
    pub text: String,
    pub summary: Vec<String>,
    pub rejected: usize,
}

/// Applies `edits` to `text`. Input order does not matter: edits are sorted
/// descending by start coordinate and applied back to front, which makes the
/// output deterministic. Edits whose range lies outside the current line
/// count are rejected and counted, and the rest still apply.
pub fn apply_text_edits(text: &str, edits: &[TextEdit]) -> AppliedEdits {
    if edits.is_empty() {
        return AppliedEdits {
            text: text.to_string(),
            summary: vec!["No formatting changes needed".to_string()],
            rejected: 0,
        };
    }

    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    let mut sorted: Vec<&TextEdit> = edits.iter().collect();
    sorted.sort_by(|a, b| {
        (b.range.start.line, b.range.start.character)
            .cmp(&(a.range.start.line, a.range.start.character))
    });

    let mut summary = Vec::new();
    let mut rejected = 0;
    for edit in sorted {
        let start = edit.range.start;
        let end = edit.range.end;
        if start.line as usize >= lines.len() || end.line as usize >= lines.len() {
            rejected += 1;
            continue;
        }

        let prefix = char_prefix(&lines[start.line as usize], start.character as usize);
        let suffix = char_suffix(&lines[end.line as usize], end.character as usize);
        let removed = removed_text(&lines, &edit.range);
        let combined = format!("{prefix}{}{suffix}", edit.new_text);
        let replacement: Vec<String> = combined.split('\n').map(str::to_string).collect();
        lines.splice(start.line as usize..=end.line as usize, replacement);

        summary.push(describe_edit(&edit.range, &removed, &edit.new_text));
    }
    // Application runs bottom-up; report top-down.
    summary.reverse();

    AppliedEdits {
        text: lines.join("\n"),
        summary,
        rejected,
    }
}

fn removed_text(lines: &[String], range: &Range) -> String {
    let start = range.start;
    let end = range.end;
    if start.line == end.line {
        let line = &lines[start.line as usize];
        let head = char_prefix(line, end.character as usize);
        return char_suffix(&head, start.character as usize);
    }
    let mut parts = vec![char_suffix(&lines[start.line as usize], start.character as usize)];
    for line_no in (start.line + 1)..end.line {
        parts.push(lines[line_no as usize].clone());
    }
    parts.push(char_prefix(&lines[end.line as usize], end.character as usize));
    parts.join("\n")
}

fn describe_edit(range: &Range, removed: &str, inserted: &str) -> String {
    let line = range.start.line + 1;
    if range.start.line != range.end.line {
        return format!("Lines {}-{}: multi-line edit", line, range.end.line + 1);
    }
    let label = if removed.is_empty() && !inserted.is_empty() {
        "added content"
    } else if !removed.is_empty() && inserted.is_empty() {
        "removed content"
    } else if removed.trim().is_empty() && inserted.trim().is_empty() {
        "adjusted indentation"
    } else {
        "modified content"
    };
    format!("Line {line}: {label}")
}

fn char_prefix(s: &str, col: usize) -> String {
    s.chars().take(col).collect()
}

fn char_suffix(s: &str, col: usize) -> String {
    s.chars().skip(col).collect()
}

/// Applies edits to a file on disk. With `preview` set, the file is left
/// untouched and only the would-be summary is returned.
pub async fn apply_edits_to_file(
    path: &Path,
    edits: &[TextEdit],
    preview: bool,
) -> Result<AppliedEdits> {
    let text = tokio::fs::read_to_string(path).await?;
    let applied = apply_text_edits(&text, edits);
    if !preview && applied.text != text {
        tokio::fs::write(path, &applied.text).await?;
    }
    Ok(applied)
}

/// Outcome of applying a workspace edit across files.
#[derive(Debug, Default, Serialize)]
pub struct WorkspaceApplyOutcome {
    pub files_changed: Vec<String>,
    /// Per-file human-readable change summaries, keyed by path.
    pub summaries: BTreeMap<String, Vec<String>>,
    /// Reported-but-not-executed entries (file create/rename/delete).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Applies a `WorkspaceEdit`, honoring both the legacy `changes` map and the
/// newer `documentChanges` list. File create/rename/delete operations are
/// reported in `notes` but not executed.
pub async fn apply_workspace_edit(
    edit: &WorkspaceEdit,
    preview: bool,
) -> Result<WorkspaceApplyOutcome> {
    let mut outcome = WorkspaceApplyOutcome::default();

    // Per the protocol a server sends one representation or the other;
    // documentChanges is the richer one and wins when both are present.
    if let Some(document_changes) = &edit.document_changes {
        let text_edits = match document_changes {
            DocumentChanges::Edits(edits) => edits.iter().collect::<Vec<_>>(),
            DocumentChanges::Operations(ops) => {
                let mut edits = Vec::new();
                for op in ops {
                    match op {
                        DocumentChangeOperation::Edit(edit) => edits.push(edit),
                        DocumentChangeOperation::Op(op) => outcome.notes.push(describe_resource_op(op)),
                    }
                }
                edits
            }
        };
        for doc_edit in text_edits {
            let path = uri_to_path(&doc_edit.text_document.uri)?;
            let edits: Vec<TextEdit> = doc_edit
                .edits
                .iter()
                .map(|e| match e {
                    OneOf::Left(edit) => edit.clone(),
                    OneOf::Right(annotated) => annotated.text_edit.clone(),
                })
                .collect();
            let applied = apply_edits_to_file(&path, &edits, preview).await?;
            record(&mut outcome, &path, applied);
        }
        return Ok(outcome);
    }

    if let Some(changes) = &edit.changes {
        for (uri, edits) in changes {
            let path = uri_to_path(uri)?;
            let applied = apply_edits_to_file(&path, edits, preview).await?;
            record(&mut outcome, &path, applied);
        }
    }
    Ok(outcome)
}

fn record(outcome: &mut WorkspaceApplyOutcome, path: &Path, applied: AppliedEdits) {
    let display = path.display().to_string();
    outcome.files_changed.push(display.clone());
    outcome.summaries.insert(display, applied.summary);
}

fn describe_resource_op(op: &ResourceOp) -> String {
    match op {
        ResourceOp::Create(create) => {
            format!("file creation reported but not executed: {}", create.uri.as_str())
        }
        ResourceOp::Rename(rename) => format!(
            "file rename reported but not executed: {} -> {}",
            rename.old_uri.as_str(),
            rename.new_uri.as_str()
        ),
        ResourceOp::Delete(delete) => {
            format!("file deletion reported but not executed: {}", delete.uri.as_str())
        }
    }
}

/// Formatting options forwarded to the server.
#[derive(Debug, Clone, Serialize)]
pub struct FormatOptions {
    pub tab_size: u32,
    pub insert_spaces: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            tab_size: 2,
            insert_spaces: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FormatOutcome {
    pub edit_count: usize,
    pub summary: Vec<String>,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_edits: Option<usize>,
}

impl Bridge {
    /// `textDocument/formatting` (or `rangeFormatting` when a range is
    /// given), with the returned edits applied client-side.
    pub async fn format_document(
        &self,
        path: &Path,
        range: Option<Range>,
        options: FormatOptions,
        apply: bool,
    ) -> Result<FormatOutcome> {
        let server = self.registry.server_for_path(path).await?;
        server.ensure_file_open(path).await?;
        let uri = path_to_uri(path)?;

        let wire_options = json!({
            "tabSize": options.tab_size,
            "insertSpaces": options.insert_spaces,
        });
        let raw = match range {
            Some(range) => {
                server
                    .request(
                        "textDocument/rangeFormatting",
                        json!({"textDocument": {"uri": uri}, "range": range, "options": wire_options}),
                    )
                    .await?
            }
            None => {
                server
                    .request(
                        "textDocument/formatting",
                        json!({"textDocument": {"uri": uri}, "options": wire_options}),
                    )
                    .await?
            }
        };
        let edits: Vec<TextEdit> = match raw {
            serde_json::Value::Null => Vec::new(),
            value => serde_json::from_value(value)
                .map_err(|e| BridgeError::Protocol(format!("bad formatting response: {e}")))?,
        };

        let applied_edits = apply_edits_to_file(path, &edits, !apply).await?;
        Ok(FormatOutcome {
            edit_count: edits.len(),
            summary: applied_edits.summary,
            applied: apply && !edits.is_empty(),
            rejected_edits: (applied_edits.rejected > 0).then_some(applied_edits.rejected),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Position;

    fn edit(start: (u32, u32), end: (u32, u32), new_text: &str) -> TextEdit {
        TextEdit {
            range: Range::new(
                Position::new(start.0, start.1),
                Position::new(end.0, end.1),
            ),
            new_text: new_text.to_string(),
        }
    }

    #[test]
    fn empty_edit_list_is_identity() {
        let text = "fn main() {}\n";
        let applied = apply_text_edits(text, &[]);
        assert_eq!(applied.text, text);
        assert_eq!(applied.summary, vec!["No formatting changes needed"]);
    }

    #[test]
    fn single_line_splice() {
        let applied = apply_text_edits("let x=1;\n", &[edit((0, 5), (0, 6), " = ")]);
        assert_eq!(applied.text, "let x = 1;\n");
        assert_eq!(applied.summary, vec!["Line 1: modified content"]);
    }

    #[test]
    fn multi_line_splice() {
        let text = "function a() {\n  return 1;\n}\nfunction b() {}\n";
        let applied = apply_text_edits(text, &[edit((0, 0), (2, 1), "const a = () => 1;")]);
        assert_eq!(applied.text, "const a = () => 1;\nfunction b() {}\n");
        assert_eq!(applied.summary, vec!["Lines 1-3: multi-line edit"]);
    }

    #[test]
    fn insertion_with_newlines_adds_lines() {
        let applied = apply_text_edits("ab\n", &[edit((0, 1), (0, 1), "X\nY")]);
        assert_eq!(applied.text, "aX\nYb\n");
    }

    #[test]
    fn input_order_does_not_matter() {
        let text = "aaa bbb ccc\n";
        let forward = [edit((0, 0), (0, 3), "111"), edit((0, 8), (0, 11), "333")];
        let backward = [edit((0, 8), (0, 11), "333"), edit((0, 0), (0, 3), "111")];
        assert_eq!(
            apply_text_edits(text, &forward).text,
            apply_text_edits(text, &backward).text
        );
        assert_eq!(apply_text_edits(text, &forward).text, "111 bbb 333\n");
    }

    #[test]
    fn out_of_range_edit_is_rejected_but_rest_apply() {
        let applied = apply_text_edits(
            "one\ntwo\n",
            &[edit((10, 0), (10, 4), "nope"), edit((0, 0), (0, 3), "ONE")],
        );
        assert_eq!(applied.text, "ONE\ntwo\n");
        assert_eq!(applied.rejected, 1);
    }

    #[test]
    fn classification_covers_the_four_shapes() {
        let added = apply_text_edits("x\n", &[edit((0, 1), (0, 1), "y")]);
        assert_eq!(added.summary, vec!["Line 1: added content"]);

        let removed = apply_text_edits("xy\n", &[edit((0, 1), (0, 2), "")]);
        assert_eq!(removed.summary, vec!["Line 1: removed content"]);

        let indent = apply_text_edits("    x\n", &[edit((0, 0), (0, 4), "  ")]);
        assert_eq!(indent.summary, vec!["Line 1: adjusted indentation"]);

        let modified = apply_text_edits("abc\n", &[edit((0, 0), (0, 3), "def")]);
        assert_eq!(modified.summary, vec!["Line 1: modified content"]);
    }

    #[test]
    fn summaries_read_top_down() {
        let applied = apply_text_edits(
            "aa\nbb\ncc\n",
            &[edit((2, 0), (2, 2), "CC"), edit((0, 0), (0, 2), "AA")],
        );
        assert_eq!(
            applied.summary,
            vec!["Line 1: modified content", "Line 3: modified content"]
        );
    }

    #[tokio::test]
    async fn workspace_edit_changes_map_applies_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ts");
        tokio::fs::write(&file, "const old = 1;\n").await.unwrap();

        let uri = path_to_uri(&file).unwrap();
        let mut changes = std::collections::HashMap::new();
        changes.insert(uri, vec![edit((0, 6), (0, 9), "fresh")]);
        let edit = WorkspaceEdit {
            changes: Some(changes),
            document_changes: None,
            change_annotations: None,
        };

        let outcome = apply_workspace_edit(&edit, false).await.unwrap();
        assert_eq!(outcome.files_changed.len(), 1);
        let text = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(text, "const fresh = 1;\n");
    }

    #[tokio::test]
    async fn workspace_edit_preview_leaves_disk_alone() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ts");
        tokio::fs::write(&file, "const old = 1;\n").await.unwrap();

        let uri = path_to_uri(&file).unwrap();
        let mut changes = std::collections::HashMap::new();
        changes.insert(uri, vec![edit((0, 6), (0, 9), "fresh")]);
        let edit = WorkspaceEdit {
            changes: Some(changes),
            document_changes: None,
            change_annotations: None,
        };

        apply_workspace_edit(&edit, true).await.unwrap();
        let text = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(text, "const old = 1;\n");
    }
}
