//! End-to-end operation tests against scripted language servers.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indoc::indoc;
use lsp_types::Position;
use serde_json::{Value, json};

use common::{
    MockReply, MockServerSpec, build_bridge, file_uri, location_json, nested_symbol, range_json,
    write_file,
};
use lsp_bridge::ops::delete::DeletionOutcome;
use lsp_bridge::ops::navigate::RenameOutcome;

const CLASS: u32 = 5;
const METHOD: u32 = 6;
const PROPERTY: u32 = 7;
const FUNCTION: u32 = 12;

#[tokio::test]
async fn find_definition_returns_identifier_location() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "a.ts", "export class Foo {}\n");
    let uri = file_uri(&path);

    let symbols = json!([nested_symbol(
        "Foo",
        CLASS,
        ((0, 0), (0, 19)),
        ((0, 13), (0, 16)),
        json!([]),
    )]);
    let definition = location_json(&uri, ((0, 13), (0, 16)));
    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], {
            let uri = uri.clone();
            Arc::new(move |method, params| match method {
                "textDocument/documentSymbol" => MockReply::Result(symbols.clone()),
                "textDocument/definition" => {
                    // The resolver must aim at the identifier, not the keyword.
                    assert_eq!(params["position"], json!({"line": 0, "character": 13}));
                    assert_eq!(params["textDocument"]["uri"], uri);
                    MockReply::Result(json!([definition.clone()]))
                }
                _ => MockReply::Result(Value::Null),
            })
        })],
    )
    .await;

    let result = bridge
        .find_definition(&path, "Foo", Some("class"))
        .await
        .unwrap();
    assert_eq!(result.locations.len(), 1);
    assert_eq!(result.locations[0].uri.as_str(), uri);
    assert_eq!(result.locations[0].range.start, Position::new(0, 13));
    assert!(result.message.is_none());
}

#[tokio::test]
async fn ambiguous_rename_lists_candidates_and_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = indoc! {"
        function handle() {}

        class Bar {
          handle() {}
        }
    "};
    let path = write_file(dir.path(), "a.ts", source);

    let symbols = json!([
        nested_symbol("handle", FUNCTION, ((0, 0), (0, 20)), ((0, 9), (0, 15)), json!([])),
        nested_symbol(
            "Bar",
            CLASS,
            ((2, 0), (4, 1)),
            ((2, 6), (2, 9)),
            json!([nested_symbol("handle", METHOD, ((3, 2), (3, 13)), ((3, 2), (3, 8)), json!([]))]),
        ),
    ]);
    let rename_reached_server = Arc::new(AtomicBool::new(false));
    let rename_flag = rename_reached_server.clone();
    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], Arc::new(move |method, _| {
            match method {
                "textDocument/documentSymbol" => MockReply::Result(symbols.clone()),
                "textDocument/rename" => {
                    rename_flag.store(true, Ordering::SeqCst);
                    MockReply::Result(Value::Null)
                }
                _ => MockReply::Result(Value::Null),
            }
        }))],
    )
    .await;

    let outcome = bridge
        .rename_symbol(&path, "handle", None, "handleFoo")
        .await
        .unwrap();
    match outcome {
        RenameOutcome::Ambiguous { candidates, .. } => {
            assert_eq!(candidates.len(), 2);
            // 1-indexed positions, ready to paste into the strict variant.
            assert_eq!((candidates[0].line, candidates[0].character), (1, 10));
            assert_eq!((candidates[1].line, candidates[1].character), (4, 3));
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }
    assert!(!rename_reached_server.load(Ordering::SeqCst));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), source);
}

#[tokio::test]
async fn strict_rename_returns_the_workspace_edit() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "a.ts", "export class Foo {}\n");
    let uri = file_uri(&path);

    let edit = json!({
        "changes": {
            (uri.clone()): [{"range": range_json(((0, 13), (0, 16))), "newText": "Bar"}]
        }
    });
    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], {
            let edit = edit.clone();
            Arc::new(move |method, params| match method {
                "textDocument/rename" => {
                    // 1-indexed (1, 14) converts to 0-indexed (0, 13).
                    assert_eq!(params["position"], json!({"line": 0, "character": 13}));
                    assert_eq!(params["newName"], "Bar");
                    MockReply::Result(edit.clone())
                }
                _ => MockReply::Result(Value::Null),
            })
        })],
    )
    .await;

    let outcome = bridge
        .rename_symbol_strict(&path, 1, 14, "Bar")
        .await
        .unwrap();
    match outcome {
        RenameOutcome::Renamed { edit, .. } => {
            let changes = edit.changes.unwrap();
            assert_eq!(changes.len(), 1);
            let edits = changes.values().next().unwrap();
            assert_eq!(edits[0].new_text, "Bar");
        }
        other => panic!("expected a rename, got {other:?}"),
    }
    // The rename tool reports the edit; applying it is the caller's call.
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "export class Foo {}\n"
    );
}

#[tokio::test]
async fn diagnostics_fall_back_to_push_when_pull_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "a.ts", "const x: number = \"oops\";\n");
    let uri = file_uri(&path);

    let push_uri = uri.clone();
    let bridge = build_bridge(
        dir.path(),
        vec![
            MockServerSpec::new(&["ts"], Arc::new(|method, _| match method {
                "textDocument/diagnostic" => {
                    MockReply::Error(-32601, "method not found".to_string())
                }
                _ => MockReply::Result(Value::Null),
            }))
            .with_notifications(Arc::new(move |method, params| {
                if method != "textDocument/didOpen" {
                    return Vec::new();
                }
                assert_eq!(params["textDocument"]["uri"], push_uri.clone());
                vec![(
                    "textDocument/publishDiagnostics".to_string(),
                    json!({
                        "uri": push_uri,
                        "diagnostics": [{
                            "range": range_json(((0, 18), (0, 24))),
                            "severity": 1,
                            "message": "Type 'string' is not assignable to type 'number'."
                        }]
                    }),
                )]
            })),
        ],
    )
    .await;

    let started = std::time::Instant::now();
    let result = bridge.get_diagnostics(&path).await.unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(
        result.diagnostics[0].severity,
        Some(lsp_types::DiagnosticSeverity::ERROR)
    );
}

#[tokio::test]
async fn cached_empty_diagnostics_are_authoritative() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "clean.ts", "export const ok = 1;\n");
    let uri = file_uri(&path);

    let push_uri = uri.clone();
    let bridge = build_bridge(
        dir.path(),
        vec![
            MockServerSpec::new(&["ts"], Arc::new(|method, _| match method {
                // Pull succeeding would bypass the push path entirely.
                "textDocument/diagnostic" => {
                    MockReply::Error(-32601, "method not found".to_string())
                }
                _ => MockReply::Result(Value::Null),
            }))
            .with_notifications(Arc::new(move |method, _| {
                if method != "textDocument/didOpen" {
                    return Vec::new();
                }
                vec![(
                    "textDocument/publishDiagnostics".to_string(),
                    json!({"uri": push_uri, "diagnostics": []}),
                )]
            })),
        ],
    )
    .await;

    let result = bridge.get_diagnostics(&path).await.unwrap();
    assert!(result.diagnostics.is_empty());
}

#[tokio::test]
async fn safe_delete_removes_whole_lines_and_the_trailing_newline() {
    let dir = tempfile::tempdir().unwrap();
    let source = indoc! {"
        function unused() {
          return 1;
        }
        function used() {}
    "};
    let path = write_file(dir.path(), "a.ts", source);
    let uri = file_uri(&path);

    let symbols = json!([
        nested_symbol("unused", FUNCTION, ((0, 0), (2, 1)), ((0, 9), (0, 15)), json!([])),
        nested_symbol("used", FUNCTION, ((3, 0), (3, 18)), ((3, 9), (3, 13)), json!([])),
    ]);
    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], {
            let uri = uri.clone();
            Arc::new(move |method, _| match method {
                "textDocument/documentSymbol" => MockReply::Result(symbols.clone()),
                "textDocument/definition" => {
                    MockReply::Result(json!([location_json(&uri, ((0, 0), (2, 1)))]))
                }
                "textDocument/references" => {
                    MockReply::Result(json!([location_json(&uri, ((0, 9), (0, 15)))]))
                }
                _ => MockReply::Result(Value::Null),
            })
        })],
    )
    .await;

    let outcome = bridge
        .delete_symbol(&path, "unused", Some("function"), false, false, false)
        .await
        .unwrap();
    match outcome {
        DeletionOutcome::Deleted { info, files_changed } => {
            assert!(info.can_safely_delete);
            assert_eq!(files_changed.len(), 1);
        }
        other => panic!("expected deletion, got {other:?}"),
    }
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "function used() {}\n"
    );
}

#[tokio::test]
async fn unsafe_delete_is_refused_with_guidance() {
    let dir = tempfile::tempdir().unwrap();
    let source = "export function helper() {}\n";
    let path = write_file(dir.path(), "a.ts", source);
    let other = write_file(dir.path(), "b.ts", "helper();\nhelper();\n");
    let uri = file_uri(&path);
    let other_uri = file_uri(&other);

    let symbols = json!([nested_symbol(
        "helper",
        FUNCTION,
        ((0, 0), (0, 27)),
        ((0, 16), (0, 22)),
        json!([]),
    )]);
    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], {
            let uri = uri.clone();
            let other_uri = other_uri.clone();
            Arc::new(move |method, _| match method {
                "textDocument/documentSymbol" => MockReply::Result(symbols.clone()),
                "textDocument/definition" => {
                    MockReply::Result(json!([location_json(&uri, ((0, 0), (0, 27)))]))
                }
                "textDocument/references" => MockReply::Result(json!([
                    location_json(&uri, ((0, 16), (0, 22))),
                    location_json(&other_uri, ((0, 0), (0, 6))),
                    location_json(&other_uri, ((1, 0), (1, 6))),
                ])),
                _ => MockReply::Result(Value::Null),
            })
        })],
    )
    .await;

    let outcome = bridge
        .delete_symbol(&path, "helper", None, false, false, false)
        .await
        .unwrap();
    match outcome {
        DeletionOutcome::Refused { info, message } => {
            assert!(!info.can_safely_delete);
            assert_eq!(info.references.len(), 3);
            assert!(message.contains("delete_references=true"));
            assert!(message.contains("force_delete=true"));
            assert!(message.contains("dry_run=true"));
        }
        other => panic!("expected refusal, got {other:?}"),
    }
    assert_eq!(std::fs::read_to_string(&path).unwrap(), source);
    assert_eq!(
        std::fs::read_to_string(&other).unwrap(),
        "helper();\nhelper();\n"
    );
}

#[tokio::test]
async fn workspace_symbols_merge_across_servers() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.ts", "export class Data {}\n");
    write_file(dir.path(), "b.py", "class Data: pass\n");
    let ts_uri = file_uri(&dir.path().join("a.ts"));
    let py_uri = file_uri(&dir.path().join("b.py"));

    let ts_symbols = json!([{
        "name": "Data",
        "kind": CLASS,
        "location": location_json(&ts_uri, ((0, 13), (0, 17)))
    }]);
    let py_symbols = json!([{
        "name": "Data",
        "kind": CLASS,
        "location": location_json(&py_uri, ((0, 6), (0, 10)))
    }]);

    let bridge = build_bridge(
        dir.path(),
        vec![
            MockServerSpec::new(&["ts"], Arc::new(move |method, _| match method {
                "workspace/symbol" => MockReply::Result(ts_symbols.clone()),
                _ => MockReply::Result(Value::Null),
            })),
            MockServerSpec::new(&["py"], Arc::new(move |method, _| match method {
                "workspace/symbol" => MockReply::Result(py_symbols.clone()),
                _ => MockReply::Result(Value::Null),
            })),
        ],
    )
    .await;

    let result = bridge
        .get_workspace_symbols("Data", None, false, 50)
        .await
        .unwrap();
    assert_eq!(result.symbols.len(), 2);
    let uris: Vec<&str> = result.symbols.iter().map(|s| s.uri.as_str()).collect();
    assert!(uris.contains(&ts_uri.as_str()));
    assert!(uris.contains(&py_uri.as_str()));
    assert_eq!(result.debug.servers_queried, 2);
}

#[tokio::test]
async fn workspace_sweep_groups_by_severity_only_on_request() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "bad.ts", "const x: number = \"oops\";\n");
    write_file(dir.path(), "clean.ts", "export const ok = 1;\n");

    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], Arc::new(|method, params| match method {
            "textDocument/diagnostic" => {
                let uri = params["textDocument"]["uri"].as_str().unwrap_or("");
                if uri.ends_with("bad.ts") {
                    MockReply::Result(json!({
                        "kind": "full",
                        "items": [
                            {
                                "range": range_json(((0, 18), (0, 24))),
                                "severity": 1,
                                "message": "type mismatch",
                                "source": "mock"
                            },
                            {
                                "range": range_json(((0, 6), (0, 7))),
                                "severity": 2,
                                "message": "unused variable",
                                "source": "mock"
                            }
                        ]
                    }))
                } else {
                    MockReply::Result(json!({"kind": "full", "items": []}))
                }
            }
            _ => MockReply::Result(Value::Null),
        }))],
    )
    .await;

    let grouped = bridge
        .get_all_diagnostics(&[], &[], 50, true, false)
        .await
        .unwrap();
    assert_eq!(grouped.files_scanned, 2);
    assert_eq!(grouped.files.len(), 1);
    assert!(grouped.files[0].file.ends_with("bad.ts"));
    assert_eq!(grouped.total_diagnostics, 2);
    let counts = grouped.by_severity.as_ref().unwrap();
    assert_eq!(counts.get("error"), Some(&1));
    assert_eq!(counts.get("warning"), Some(&1));
    // include_source=false drops the source even though the server sent one.
    assert!(grouped.files[0].diagnostics[0].source.is_none());

    let flat = bridge
        .get_all_diagnostics(&[], &[], 50, false, false)
        .await
        .unwrap();
    assert!(flat.by_severity.is_none());
    assert_eq!(flat.total_diagnostics, 2);
}

#[tokio::test]
async fn hover_probes_neighboring_positions() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "a.ts", "export class Foo {}\n");

    let symbols = json!([nested_symbol(
        "Foo",
        CLASS,
        ((0, 0), (0, 19)),
        ((0, 13), (0, 16)),
        json!([]),
    )]);
    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], Arc::new(move |method, params| {
            match method {
                "textDocument/documentSymbol" => MockReply::Result(symbols.clone()),
                "textDocument/hover" => {
                    // Only answers one column to the left of the identifier,
                    // the way off-by-one servers behave in the wild.
                    if params["position"] == json!({"line": 0, "character": 12}) {
                        MockReply::Result(json!({
                            "contents": {"kind": "markdown", "value": "class Foo"}
                        }))
                    } else {
                        MockReply::Result(Value::Null)
                    }
                }
                _ => MockReply::Result(Value::Null),
            }
        }))],
    )
    .await;

    let result = bridge.get_hover(&path, "Foo", None).await.unwrap();
    assert_eq!(result.contents.as_deref(), Some("class Foo"));
    assert_eq!(result.position, Some(Position::new(0, 12)));
}

#[tokio::test]
async fn class_members_recover_type_information() {
    let dir = tempfile::tempdir().unwrap();
    let source = indoc! {"
        class Config {
          retries: number = 3;
          load(path: string): Promise<void> {}
        }
    "};
    let path = write_file(dir.path(), "a.ts", source);

    let symbols = json!([nested_symbol(
        "Config",
        CLASS,
        ((0, 0), (3, 1)),
        ((0, 6), (0, 12)),
        json!([
            nested_symbol("retries", PROPERTY, ((1, 2), (1, 22)), ((1, 2), (1, 9)), json!([])),
            nested_symbol("load", METHOD, ((2, 2), (2, 38)), ((2, 2), (2, 6)), json!([])),
        ]),
    )]);
    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], Arc::new(move |method, params| {
            match method {
                "textDocument/documentSymbol" => MockReply::Result(symbols.clone()),
                "textDocument/signatureHelp" => {
                    if params["position"]["line"] == 2 {
                        MockReply::Result(json!({
                            "signatures": [{
                                "label": "load(path: string): Promise<void>",
                                "parameters": [{"label": "path: string"}]
                            }]
                        }))
                    } else {
                        MockReply::Result(Value::Null)
                    }
                }
                "textDocument/hover" => {
                    if params["position"]["line"] == 1 {
                        MockReply::Result(json!({
                            "contents": {"kind": "plaintext", "value": "(property) Config.retries: number"}
                        }))
                    } else {
                        MockReply::Result(Value::Null)
                    }
                }
                _ => MockReply::Result(Value::Null),
            }
        }))],
    )
    .await;

    let result = bridge.get_class_members(&path, "Config").await.unwrap();
    assert_eq!(result.members.len(), 2);

    let retries = result.members.iter().find(|m| m.name == "retries").unwrap();
    assert_eq!(retries.kind, "property");
    assert_eq!(
        retries.type_info.as_ref().unwrap().return_type.as_deref(),
        Some("number")
    );

    let load = result.members.iter().find(|m| m.name == "load").unwrap();
    assert_eq!(load.kind, "method");
    let info = load.type_info.as_ref().unwrap();
    assert_eq!(info.return_type.as_deref(), Some("Promise<void>"));
    let params = info.parameters.as_ref().unwrap();
    assert_eq!(params[0].name, "path");
    assert_eq!(params[0].type_name, "string");
}

#[tokio::test]
async fn format_document_applies_edits_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "a.ts", "const x=1;\n");

    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], Arc::new(|method, _| match method {
            "textDocument/formatting" => MockReply::Result(json!([
                {"range": range_json(((0, 7), (0, 8))), "newText": " = "}
            ])),
            _ => MockReply::Result(Value::Null),
        }))],
    )
    .await;

    let preview = bridge
        .format_document(&path, None, Default::default(), false)
        .await
        .unwrap();
    assert!(!preview.applied);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "const x=1;\n");

    let outcome = bridge
        .format_document(&path, None, Default::default(), true)
        .await
        .unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.edit_count, 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "const x = 1;\n");
}

#[tokio::test]
async fn code_action_applied_by_exact_title() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "a.ts", "import unused from 'x';\nexport {};\n");
    let uri = file_uri(&path);

    let action = json!([{
        "title": "Remove unused import",
        "kind": "quickfix",
        "isPreferred": true,
        "edit": {
            "changes": {
                (uri.clone()): [{"range": range_json(((0, 0), (1, 0))), "newText": ""}]
            }
        }
    }]);
    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], {
            let action = action.clone();
            Arc::new(move |method, _| match method {
                "textDocument/codeAction" => MockReply::Result(action.clone()),
                _ => MockReply::Result(Value::Null),
            })
        })],
    )
    .await;

    let result = bridge
        .get_code_actions(
            &path,
            lsp_types::Range::new(Position::new(0, 0), Position::new(0, 10)),
            None,
            false,
            Some("Remove unused import"),
        )
        .await
        .unwrap();
    assert_eq!(result.actions.len(), 1);
    assert!(matches!(
        result.applied,
        Some(lsp_bridge::ops::actions::AppliedAction::EditApplied { .. })
    ));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "export {};\n");
}

#[tokio::test]
async fn kind_mismatch_falls_back_with_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let source = indoc! {"
        class Bar {
          handle() {}
        }
    "};
    let path = write_file(dir.path(), "a.ts", source);
    let uri = file_uri(&path);

    let symbols = json!([nested_symbol(
        "Bar",
        CLASS,
        ((0, 0), (2, 1)),
        ((0, 6), (0, 9)),
        json!([nested_symbol("handle", METHOD, ((1, 2), (1, 13)), ((1, 2), (1, 8)), json!([]))]),
    )]);
    let bridge = build_bridge(
        dir.path(),
        vec![MockServerSpec::new(&["ts"], {
            let uri = uri.clone();
            Arc::new(move |method, params| match method {
                "textDocument/documentSymbol" => MockReply::Result(symbols.clone()),
                "textDocument/references" => {
                    assert_eq!(params["position"], json!({"line": 1, "character": 2}));
                    MockReply::Result(json!([location_json(&uri, ((1, 2), (1, 8)))]))
                }
                _ => MockReply::Result(Value::Null),
            })
        })],
    )
    .await;

    // The caller says "function" but the server reports a method; the
    // fallback still finds it and says what actually exists.
    let result = bridge
        .find_references(&path, "handle", Some("function"), true)
        .await
        .unwrap();
    assert_eq!(result.locations.len(), 1);
    assert!(result.warnings.iter().any(|w| w.contains("method")));
}
