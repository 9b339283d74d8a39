//! Code actions: listing what the server offers for a range, and optionally
//! applying one action picked by its exact title.

use std::path::Path;

use lsp_types::{CodeAction, CodeActionOrCommand, Command, Range};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{BridgeError, Result};
use crate::ops::Bridge;
use crate::ops::edits::{WorkspaceApplyOutcome, apply_workspace_edit};
use crate::uri::path_to_uri;

#[derive(Debug, Serialize)]
pub struct CodeActionSummary {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub is_preferred: bool,
    pub has_edit: bool,
    pub has_command: bool,
    pub addresses_diagnostics: usize,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AppliedAction {
    /// The action's embedded workspace edit was applied client-side.
    EditApplied {
        title: String,
        outcome: WorkspaceApplyOutcome,
    },
    /// The action only carried a command, which was forwarded to the server.
    CommandExecuted { title: String, command: String },
    NotApplied { message: String },
}

#[derive(Debug, Serialize)]
pub struct CodeActionsResult {
    pub actions: Vec<CodeActionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<AppliedAction>,
}

impl Bridge {
    /// `textDocument/codeAction` for a range, with the file's overlapping
    /// cached diagnostics supplied as context.
    pub async fn get_code_actions(
        &self,
        path: &Path,
        range: Range,
        kinds: Option<Vec<String>>,
        only_preferred: bool,
        apply_title: Option<&str>,
    ) -> Result<CodeActionsResult> {
        let server = self.registry.server_for_path(path).await?;
        server.ensure_file_open(path).await?;
        let uri = path_to_uri(path)?;

        let overlapping: Vec<lsp_types::Diagnostic> = server
            .diagnostics
            .get(&uri)
            .unwrap_or_default()
            .into_iter()
            .filter(|d| ranges_overlap(&d.range, &range))
            .collect();

        let mut context = json!({"diagnostics": overlapping});
        if let Some(kinds) = &kinds {
            context["only"] = json!(kinds);
        }
        let raw = server
            .request(
                "textDocument/codeAction",
                json!({"textDocument": {"uri": uri}, "range": range, "context": context}),
            )
            .await?;
        let actions: Vec<CodeActionOrCommand> = match raw {
            Value::Null => Vec::new(),
            value => serde_json::from_value(value)
                .map_err(|e| BridgeError::Protocol(format!("bad codeAction response: {e}")))?,
        };

        let actions: Vec<CodeActionOrCommand> = if only_preferred {
            actions
                .into_iter()
                .filter(|a| matches!(a, CodeActionOrCommand::CodeAction(action) if action.is_preferred == Some(true)))
                .collect()
        } else {
            actions
        };

        let applied = match apply_title {
            Some(title) => Some(self.apply_action(&server, &actions, title).await?),
            None => None,
        };

        Ok(CodeActionsResult {
            actions: actions.iter().map(summarize_action).collect(),
            applied,
        })
    }

    async fn apply_action(
        &self,
        server: &crate::lsp::server::LanguageServer,
        actions: &[CodeActionOrCommand],
        title: &str,
    ) -> Result<AppliedAction> {
        let Some(action) = actions.iter().find(|a| action_title(a) == title) else {
            let titles: Vec<&str> = actions.iter().map(action_title).collect();
            return Ok(AppliedAction::NotApplied {
                message: format!(
                    "no action titled \"{title}\"; available: {}",
                    if titles.is_empty() { "(none)".to_string() } else { titles.join(", ") }
                ),
            });
        };

        match action {
            CodeActionOrCommand::CodeAction(CodeAction {
                edit: Some(edit), ..
            }) => {
                let outcome = apply_workspace_edit(edit, false).await?;
                Ok(AppliedAction::EditApplied {
                    title: title.to_string(),
                    outcome,
                })
            }
            CodeActionOrCommand::CodeAction(CodeAction {
                command: Some(command),
                ..
            })
            | CodeActionOrCommand::Command(command) => {
                self.execute_command(server, command).await?;
                Ok(AppliedAction::CommandExecuted {
                    title: title.to_string(),
                    command: command.command.clone(),
                })
            }
            CodeActionOrCommand::CodeAction(_) => Ok(AppliedAction::NotApplied {
                message: format!("action \"{title}\" carries neither an edit nor a command"),
            }),
        }
    }

    async fn execute_command(
        &self,
        server: &crate::lsp::server::LanguageServer,
        command: &Command,
    ) -> Result<Value> {
        server
            .request(
                "workspace/executeCommand",
                json!({
                    "command": command.command,
                    "arguments": command.arguments.clone().unwrap_or_default(),
                }),
            )
            .await
    }
}

fn action_title(action: &CodeActionOrCommand) -> &str {
    match action {
        CodeActionOrCommand::Command(command) => &command.title,
        CodeActionOrCommand::CodeAction(action) => &action.title,
    }
}

fn summarize_action(action: &CodeActionOrCommand) -> CodeActionSummary {
    match action {
        CodeActionOrCommand::Command(command) => CodeActionSummary {
            title: command.title.clone(),
            kind: None,
            is_preferred: false,
            has_edit: false,
            has_command: true,
            addresses_diagnostics: 0,
        },
        CodeActionOrCommand::CodeAction(action) => CodeActionSummary {
            title: action.title.clone(),
            kind: action.kind.as_ref().map(|k| k.as_str().to_string()),
            is_preferred: action.is_preferred.unwrap_or(false),
            has_edit: action.edit.is_some(),
            has_command: action.command.is_some(),
            addresses_diagnostics: action.diagnostics.as_ref().map(Vec::len).unwrap_or(0),
        },
    }
}

fn ranges_overlap(a: &Range, b: &Range) -> bool {
    let starts_before_b_ends =
        (a.start.line, a.start.character) <= (b.end.line, b.end.character);
    let ends_after_b_starts =
        (a.end.line, a.end.character) >= (b.start.line, b.start.character);
    starts_before_b_ends && ends_after_b_starts
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Position;

    fn range(start: (u32, u32), end: (u32, u32)) -> Range {
        Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1))
    }

    #[test]
    fn overlap_is_inclusive() {
        assert!(ranges_overlap(&range((0, 0), (0, 5)), &range((0, 5), (0, 9))));
        assert!(ranges_overlap(&range((1, 0), (3, 0)), &range((2, 2), (2, 4))));
        assert!(!ranges_overlap(&range((0, 0), (0, 4)), &range((1, 0), (1, 2))));
    }

    #[test]
    fn summaries_carry_the_apply_surface() {
        let action = CodeActionOrCommand::CodeAction(CodeAction {
            title: "Remove unused import".to_string(),
            kind: Some("quickfix".into()),
            is_preferred: Some(true),
            ..CodeAction::default()
        });
        let summary = summarize_action(&action);
        assert_eq!(summary.title, "Remove unused import");
        assert_eq!(summary.kind.as_deref(), Some("quickfix"));
        assert!(summary.is_preferred);
        assert!(!summary.has_edit);
    }
}
