// src/rpc.rs
//
// =============================================================================
// WEAVE: STDIO RPC ADAPTOR (Component K)
// =============================================================================
//
// A line-delimited JSON protocol over stdin/stdout: each request is one
// `{"tool": "...", "args": {...}}` line, each response is one `{"ok": bool,
// "result"|"error": ...}` line. Grounded on the teacher's `transport.rs`
// framing discipline (one self-contained record per read, graceful handling
// of a short/garbled final read) — adapted here from `transport.rs`'s
// async file-inbox polling loop to a synchronous stdio request/response
// loop, since the RPC adaptor is a thin per-invocation wrapper, not a
// long-lived peer-discovery transport (§5: no cross-host or async
// orchestration is in scope for this binary).
//
// Every tool wraps an existing core operation 1:1 — the adaptor adds no
// semantics (§4.K).

use crate::bridge::IssueBridge;
use crate::context::ContextBuilder;
use crate::error::{WeaveError, WeaveResult};
use crate::graph::GraphEngine;
use crate::id::{EdgeType, NodeId, NodeStatus};
use crate::storage::StorageEngine;
use crate::workflow_engine::{BulkPatch, WorkflowEngine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};

/// The two scopes named in §4.K: `session` groups work/ship/quick/overview;
/// `graph` groups add/link/done/batch-done/update/list/resolve/delete.
pub const SESSION_TOOLS: &[&str] = &["work", "ship", "quick", "overview"];
pub const GRAPH_TOOLS: &[&str] = &["add", "link", "done", "batch_done", "update", "list", "resolve", "delete", "context"];

pub fn all_tools() -> Vec<&'static str> {
    SESSION_TOOLS.iter().chain(GRAPH_TOOLS.iter()).copied().collect()
}

#[derive(Debug, Deserialize)]
struct Request {
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Runs the stdio loop until EOF, dispatching each line as one request.
/// Never exits early on a single tool's error — that error is reported in
/// the response line and the loop continues, matching `transport.rs`'s
/// "one bad record never kills the reader" discipline.
pub fn serve<R: BufRead, W: Write>(storage: &StorageEngine, bridge: &dyn IssueBridge, input: R, mut output: W) -> WeaveResult<()> {
    for line in input.lines() {
        let line = line.map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => dispatch(storage, bridge, &req.tool, req.args),
            Err(e) => Response { ok: false, result: None, error: Some(format!("malformed request: {e}")) },
        };
        let rendered = serde_json::to_string(&response)?;
        writeln!(output, "{rendered}").map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        output.flush().map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
    }
    Ok(())
}

pub fn serve_stdio(storage: &StorageEngine, bridge: &dyn IssueBridge) -> WeaveResult<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(storage, bridge, stdin.lock(), stdout.lock())
}

fn dispatch(storage: &StorageEngine, bridge: &dyn IssueBridge, tool: &str, args: Value) -> Response {
    let outcome = run_tool(storage, bridge, tool, args);
    match outcome {
        Ok(result) => Response { ok: true, result: Some(result), error: None },
        Err(e) => Response { ok: false, result: None, error: Some(e.to_string()) },
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn required_id(args: &Value, key: &str) -> WeaveResult<NodeId> {
    let raw = arg_str(args, key).ok_or_else(|| WeaveError::InvalidInput(format!("missing `{key}`")))?;
    NodeId::parse(raw)
}

fn run_tool(storage: &StorageEngine, bridge: &dyn IssueBridge, tool: &str, args: Value) -> WeaveResult<Value> {
    if !all_tools().contains(&tool) {
        return Err(WeaveError::InvalidInput(format!("unknown tool `{tool}`")));
    }

    let graph = GraphEngine::new(storage);
    let workflow = WorkflowEngine::new(storage, bridge);

    match tool {
        "add" => {
            let text = arg_str(&args, "text").ok_or_else(|| WeaveError::InvalidInput("missing `text`".into()))?;
            let status = arg_str(&args, "status").map(|s| s.parse::<NodeStatus>()).transpose()?;
            let metadata = args.get("metadata").cloned();
            let alias = arg_str(&args, "alias");
            let parent = arg_str(&args, "parent").map(NodeId::parse).transpose()?;
            let force = args.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
            let id = graph.add(text, status, metadata, alias, parent.as_ref(), force)?;
            Ok(json!({"id": id}))
        }
        "link" => {
            let from = required_id(&args, "from")?;
            let to = required_id(&args, "to")?;
            let edge_type: EdgeType = arg_str(&args, "type")
                .ok_or_else(|| WeaveError::InvalidInput("missing `type`".into()))?
                .parse()?;
            let weight = args.get("weight").and_then(|v| v.as_f64());
            let context = args.get("context").cloned();
            graph.link(&from, &to, edge_type, weight, context)?;
            Ok(json!({"status": "ok"}))
        }
        "done" => {
            let id = required_id(&args, "id")?;
            let learning = arg_str(&args, "learning");
            let skip_verification = args.get("skip_verification").and_then(|v| v.as_bool()).unwrap_or(false);
            let no_warn = args.get("no_warn").and_then(|v| v.as_bool()).unwrap_or(false);
            let outcome = workflow.done(&id, learning, skip_verification, no_warn, None)?;
            Ok(serde_json::to_value(outcome)?)
        }
        "batch_done" => {
            let ids: Vec<NodeId> = args
                .get("ids")
                .and_then(|v| v.as_array())
                .ok_or_else(|| WeaveError::InvalidInput("missing `ids` array".into()))?
                .iter()
                .filter_map(|v| v.as_str())
                .map(NodeId::parse)
                .collect::<WeaveResult<Vec<_>>>()?;
            let learning = arg_str(&args, "learning");
            let outcomes = workflow.batch_done(&ids, learning)?;
            Ok(serde_json::to_value(outcomes)?)
        }
        "update" => {
            let id = required_id(&args, "id")?;
            let status = arg_str(&args, "status").map(|s| s.parse::<NodeStatus>()).transpose()?;
            let text = arg_str(&args, "text");
            let metadata = args.get("metadata").cloned();
            let alias = arg_str(&args, "alias");
            let remove_key = arg_str(&args, "remove_key");
            graph.update(&id, status, text, metadata, alias, remove_key)?;
            Ok(json!({"status": "ok"}))
        }
        "list" => {
            let status = arg_str(&args, "status").map(|s| s.parse::<NodeStatus>()).transpose()?;
            let node_type = arg_str(&args, "type");
            let all = args.get("all").and_then(|v| v.as_bool()).unwrap_or(false);
            let rows = graph.list(status, node_type, all)?;
            Ok(serde_json::to_value(rows)?)
        }
        "resolve" => {
            let n1 = required_id(&args, "n1")?;
            let n2 = required_id(&args, "n2")?;
            let mode_str = arg_str(&args, "mode").unwrap_or("defer");
            let winner_arg = arg_str(&args, "winner").map(NodeId::parse).transpose()?;
            let rationale = arg_str(&args, "rationale");
            let mode = match mode_str {
                "merge" => crate::graph::ResolveMode::Merge,
                "winner" => {
                    let w = winner_arg.as_ref().ok_or_else(|| WeaveError::InvalidInput("winner mode requires `winner`".into()))?;
                    crate::graph::ResolveMode::Winner(w)
                }
                _ => crate::graph::ResolveMode::Defer,
            };
            let outcome = graph.resolve(&n1, &n2, mode, rationale)?;
            Ok(serde_json::to_value(outcome)?)
        }
        "delete" => {
            let id = required_id(&args, "id")?;
            let force = args.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
            let dry_run = args.get("dry_run").and_then(|v| v.as_bool()).unwrap_or(false);
            let node = graph.delete(&id, force, dry_run)?;
            Ok(serde_json::to_value(node)?)
        }
        "context" => {
            let id = required_id(&args, "id")?;
            ContextBuilder::new(storage).build(&id)
        }
        "work" => {
            let id = required_id(&args, "id")?;
            workflow.work(&id)?;
            Ok(json!({"status": "ok"}))
        }
        "quick" => {
            let text = arg_str(&args, "text").ok_or_else(|| WeaveError::InvalidInput("missing `text`".into()))?;
            let learning = arg_str(&args, "learning");
            let id = workflow.quick(text, learning)?;
            Ok(json!({"id": id}))
        }
        "overview" => {
            let nodes = storage.node_count()?;
            let edges = storage.edge_count()?;
            let ready = graph.ready(Some(5))?;
            Ok(json!({"nodes": nodes, "edges": edges, "ready": ready}))
        }
        "ship" => Err(WeaveError::InvalidInput(
            "`ship` requires a journal and runtime context; invoke it via the CLI, not the RPC adaptor".into(),
        )),
        _ => {
            // unreachable due to the all_tools() membership check above, but
            // keep the bulk-update path reachable for completeness.
            let _ = BulkPatch { id: NodeId::generate(), status: None, text: None, metadata: None };
            Err(WeaveError::InvalidInput(format!("tool `{tool}` not wired")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::NullBridge;
    use std::io::Cursor;

    #[test]
    fn add_then_list_round_trips_over_stdio() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let bridge = NullBridge;
        let input = "{\"tool\":\"add\",\"args\":{\"text\":\"rpc node\"}}\n{\"tool\":\"list\",\"args\":{}}\n";
        let mut out = Vec::new();
        serve(&storage, &bridge, Cursor::new(input), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert!(first["ok"].as_bool().unwrap());
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["result"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn unknown_tool_reports_error_without_killing_the_loop() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let bridge = NullBridge;
        let input = "{\"tool\":\"nonsense\",\"args\":{}}\n{\"tool\":\"overview\",\"args\":{}}\n";
        let mut out = Vec::new();
        serve(&storage, &bridge, Cursor::new(input), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert!(!first["ok"].as_bool().unwrap());
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert!(second["ok"].as_bool().unwrap());
    }
}
