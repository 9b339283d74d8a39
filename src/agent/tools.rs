//! Tool descriptors and dispatch for the agent channel.
//!
//! Every tool maps 1:1 onto an operation-layer method. Line/character inputs
//! are 1-indexed on this boundary (editors and agents both think that way)
//! and are converted exactly once, here, clamping at zero.

use std::path::PathBuf;

use lsp_types::{Position, Range};
use serde_json::{Value, json};

use crate::ops::Bridge;
use crate::ops::edits::FormatOptions;
use crate::ops::probe::DEFAULT_COMPLETION_LIMIT;

pub enum DispatchOutcome {
    /// The tool ran; the payload is its serialized result.
    Success(Value),
    /// The tool ran and failed in a way worth showing to the agent.
    ToolError(String),
    UnknownTool,
    BadArguments(String),
}

/// Descriptors for `tools/list`, in the order the operations are documented.
pub fn tool_descriptors() -> Value {
    let position_args = json!({
        "line": {"type": "number", "description": "1-indexed line number"},
        "character": {"type": "number", "description": "1-indexed character"},
    });
    json!([
        {
            "name": "find_definition",
            "description": "Find the definition locations of a symbol by name",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "symbol_name": {"type": "string"},
                    "symbol_kind": {"type": "string", "description": "Optional LSP kind (class, function, method, ...)"},
                },
                "required": ["file_path", "symbol_name"],
            },
        },
        {
            "name": "find_references",
            "description": "Find all references to a symbol by name",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "symbol_name": {"type": "string"},
                    "symbol_kind": {"type": "string"},
                    "include_declaration": {"type": "boolean", "default": true},
                },
                "required": ["file_path", "symbol_name"],
            },
        },
        {
            "name": "rename_symbol",
            "description": "Rename a symbol by name; ambiguous matches are listed instead of renamed",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "symbol_name": {"type": "string"},
                    "symbol_kind": {"type": "string"},
                    "new_name": {"type": "string"},
                },
                "required": ["file_path", "symbol_name", "new_name"],
            },
        },
        {
            "name": "rename_symbol_strict",
            "description": "Rename the symbol at an exact 1-indexed position",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "line": position_args["line"],
                    "character": position_args["character"],
                    "new_name": {"type": "string"},
                },
                "required": ["file_path", "line", "character", "new_name"],
            },
        },
        {
            "name": "get_diagnostics",
            "description": "Diagnostics for one file",
            "inputSchema": {
                "type": "object",
                "properties": {"file_path": {"type": "string"}},
                "required": ["file_path"],
            },
        },
        {
            "name": "get_all_diagnostics",
            "description": "Diagnostics swept across every configured server's workspace",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "include_globs": {"type": "array", "items": {"type": "string"}},
                    "exclude_globs": {"type": "array", "items": {"type": "string"}},
                    "max_per_file": {"type": "number", "default": 50},
                    "group_by_severity": {"type": "boolean", "default": false, "description": "Include a per-severity count breakdown"},
                    "include_source": {"type": "boolean", "default": false},
                },
            },
        },
        {
            "name": "get_hover",
            "description": "Hover documentation for a symbol by name",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "symbol_name": {"type": "string"},
                    "symbol_kind": {"type": "string"},
                },
                "required": ["file_path", "symbol_name"],
            },
        },
        {
            "name": "get_signature_help",
            "description": "Signature help for a callable symbol by name",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "symbol_name": {"type": "string"},
                    "symbol_kind": {"type": "string"},
                },
                "required": ["file_path", "symbol_name"],
            },
        },
        {
            "name": "get_completion",
            "description": "Completion items at a 1-indexed position",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "line": position_args["line"],
                    "character": position_args["character"],
                    "max_results": {"type": "number", "default": DEFAULT_COMPLETION_LIMIT},
                },
                "required": ["file_path", "line", "character"],
            },
        },
        {
            "name": "get_class_members",
            "description": "Members of a class, with recovered type information",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "class_name": {"type": "string"},
                },
                "required": ["file_path", "class_name"],
            },
        },
        {
            "name": "get_method_signature",
            "description": "Full signature of a method, optionally scoped to a class",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "method_name": {"type": "string"},
                    "class_name": {"type": "string"},
                },
                "required": ["file_path", "method_name"],
            },
        },
        {
            "name": "get_workspace_symbols",
            "description": "Search symbols across every configured server; supports * and ? wildcards",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "symbol_kind": {"type": "string"},
                    "case_sensitive": {"type": "boolean", "default": false},
                    "max_results": {"type": "number", "default": 50},
                },
                "required": ["query"],
            },
        },
        {
            "name": "format_document",
            "description": "Format a file (or a range of it) and apply the edits",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "apply": {"type": "boolean", "default": false, "description": "false previews, true writes"},
                    "tab_size": {"type": "number", "default": 2},
                    "insert_spaces": {"type": "boolean", "default": true},
                    "start_line": {"type": "number", "description": "1-indexed; with end_line selects range formatting"},
                    "end_line": {"type": "number"},
                },
                "required": ["file_path"],
            },
        },
        {
            "name": "get_code_actions",
            "description": "Code actions for a 1-indexed range, optionally applying one by title",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "start_line": {"type": "number"},
                    "start_character": {"type": "number"},
                    "end_line": {"type": "number"},
                    "end_character": {"type": "number"},
                    "kinds": {"type": "array", "items": {"type": "string"}},
                    "only_preferred": {"type": "boolean", "default": false},
                    "apply_title": {"type": "string"},
                },
                "required": ["file_path", "start_line", "start_character", "end_line", "end_character"],
            },
        },
        {
            "name": "delete_symbol",
            "description": "Delete a symbol after checking whether anything still references it",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "symbol_name": {"type": "string"},
                    "symbol_kind": {"type": "string"},
                    "delete_references": {"type": "boolean", "default": false},
                    "dry_run": {"type": "boolean", "default": true},
                    "force_delete": {"type": "boolean", "default": false},
                },
                "required": ["file_path", "symbol_name"],
            },
        },
    ])
}

pub async fn dispatch(bridge: &Bridge, name: &str, args: &Value) -> DispatchOutcome {
    match dispatch_inner(bridge, name, args).await {
        Ok(Some(value)) => DispatchOutcome::Success(value),
        Ok(None) => DispatchOutcome::UnknownTool,
        Err(DispatchError::BadArguments(message)) => DispatchOutcome::BadArguments(message),
        Err(DispatchError::Tool(message)) => DispatchOutcome::ToolError(message),
    }
}

enum DispatchError {
    BadArguments(String),
    Tool(String),
}

impl From<crate::error::BridgeError> for DispatchError {
    fn from(e: crate::error::BridgeError) -> Self {
        DispatchError::Tool(e.to_string())
    }
}

async fn dispatch_inner(
    bridge: &Bridge,
    name: &str,
    args: &Value,
) -> std::result::Result<Option<Value>, DispatchError> {
    let result = match name {
        "find_definition" => serialize(
            bridge
                .find_definition(&path_arg(args)?, str_arg(args, "symbol_name")?, opt_str(args, "symbol_kind"))
                .await?,
        ),
        "find_references" => serialize(
            bridge
                .find_references(
                    &path_arg(args)?,
                    str_arg(args, "symbol_name")?,
                    opt_str(args, "symbol_kind"),
                    bool_arg(args, "include_declaration", true),
                )
                .await?,
        ),
        "rename_symbol" => serialize(
            bridge
                .rename_symbol(
                    &path_arg(args)?,
                    str_arg(args, "symbol_name")?,
                    opt_str(args, "symbol_kind"),
                    str_arg(args, "new_name")?,
                )
                .await?,
        ),
        "rename_symbol_strict" => serialize(
            bridge
                .rename_symbol_strict(
                    &path_arg(args)?,
                    u32_arg(args, "line")?,
                    u32_arg(args, "character")?,
                    str_arg(args, "new_name")?,
                )
                .await?,
        ),
        "get_diagnostics" => serialize(bridge.get_diagnostics(&path_arg(args)?).await?),
        "get_all_diagnostics" => serialize(
            bridge
                .get_all_diagnostics(
                    &string_list(args, "include_globs"),
                    &string_list(args, "exclude_globs"),
                    usize_arg(args, "max_per_file", 50),
                    bool_arg(args, "group_by_severity", false),
                    bool_arg(args, "include_source", false),
                )
                .await?,
        ),
        "get_hover" => serialize(
            bridge
                .get_hover(&path_arg(args)?, str_arg(args, "symbol_name")?, opt_str(args, "symbol_kind"))
                .await?,
        ),
        "get_signature_help" => serialize(
            bridge
                .get_signature_help(&path_arg(args)?, str_arg(args, "symbol_name")?, opt_str(args, "symbol_kind"))
                .await?,
        ),
        "get_completion" => serialize(
            bridge
                .get_completion(
                    &path_arg(args)?,
                    to_position(u32_arg(args, "line")?, u32_arg(args, "character")?),
                    args.get("max_results").and_then(Value::as_u64).map(|n| n as usize),
                )
                .await?,
        ),
        "get_class_members" => serialize(
            bridge
                .get_class_members(&path_arg(args)?, str_arg(args, "class_name")?)
                .await?,
        ),
        "get_method_signature" => serialize(
            bridge
                .get_method_signature(
                    &path_arg(args)?,
                    str_arg(args, "method_name")?,
                    opt_str(args, "class_name"),
                )
                .await?,
        ),
        "get_workspace_symbols" => serialize(
            bridge
                .get_workspace_symbols(
                    str_arg(args, "query")?,
                    opt_str(args, "symbol_kind"),
                    bool_arg(args, "case_sensitive", false),
                    usize_arg(args, "max_results", 50),
                )
                .await?,
        ),
        "format_document" => {
            let range = match (args.get("start_line"), args.get("end_line")) {
                (Some(start), Some(end)) => {
                    let start = start.as_u64().ok_or_else(|| {
                        DispatchError::BadArguments("start_line must be a number".to_string())
                    })? as u32;
                    let end = end.as_u64().ok_or_else(|| {
                        DispatchError::BadArguments("end_line must be a number".to_string())
                    })? as u32;
                    Some(Range::new(
                        Position::new(start.saturating_sub(1), 0),
                        Position::new(end.saturating_sub(1), u32::MAX),
                    ))
                }
                _ => None,
            };
            serialize(
                bridge
                    .format_document(
                        &path_arg(args)?,
                        range,
                        FormatOptions {
                            tab_size: u32_arg_or(args, "tab_size", 2),
                            insert_spaces: bool_arg(args, "insert_spaces", true),
                        },
                        bool_arg(args, "apply", false),
                    )
                    .await?,
            )
        }
        "get_code_actions" => serialize(
            bridge
                .get_code_actions(
                    &path_arg(args)?,
                    Range::new(
                        to_position(u32_arg(args, "start_line")?, u32_arg(args, "start_character")?),
                        to_position(u32_arg(args, "end_line")?, u32_arg(args, "end_character")?),
                    ),
                    args.get("kinds").and_then(Value::as_array).map(|kinds| {
                        kinds
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    }),
                    bool_arg(args, "only_preferred", false),
                    opt_str(args, "apply_title"),
                )
                .await?,
        ),
        "delete_symbol" => serialize(
            bridge
                .delete_symbol(
                    &path_arg(args)?,
                    str_arg(args, "symbol_name")?,
                    opt_str(args, "symbol_kind"),
                    bool_arg(args, "delete_references", false),
                    bool_arg(args, "dry_run", true),
                    bool_arg(args, "force_delete", false),
                )
                .await?,
        ),
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn serialize<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({"error": e.to_string()}))
}

/// Agent-channel positions are 1-indexed; clamp at zero after conversion.
fn to_position(line: u32, character: u32) -> Position {
    Position::new(line.saturating_sub(1), character.saturating_sub(1))
}

fn path_arg(args: &Value) -> std::result::Result<PathBuf, DispatchError> {
    str_arg(args, "file_path").map(PathBuf::from)
}

fn str_arg<'a>(args: &'a Value, name: &str) -> std::result::Result<&'a str, DispatchError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::BadArguments(format!("missing required argument {name}")))
}

fn opt_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn u32_arg(args: &Value, name: &str) -> std::result::Result<u32, DispatchError> {
    args.get(name)
        .and_then(Value::as_u64)
        .map(|n| n as u32)
        .ok_or_else(|| DispatchError::BadArguments(format!("missing numeric argument {name}")))
}

fn u32_arg_or(args: &Value, name: &str, default: u32) -> u32 {
    args.get(name).and_then(Value::as_u64).map(|n| n as u32).unwrap_or(default)
}

fn usize_arg(args: &Value, name: &str, default: usize) -> usize {
    args.get(name).and_then(Value::as_u64).map(|n| n as usize).unwrap_or(default)
}

fn bool_arg(args: &Value, name: &str, default: bool) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(default)
}

fn string_list(args: &Value, name: &str) -> Vec<String> {
    args.get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
