// src/ingest.rs
//
// =============================================================================
// WEAVE: INGESTION (import / plan / refs) — thin consumers of the core
// =============================================================================
//
// §1 scopes these out as "consume core operations but add no fundamental
// design": `import` reads a JSONL dump of nodes, `plan` reads a Markdown
// checklist, `refs` greps free text for file/node-id references. All three
// dispatch straight into `GraphEngine`/`WorkflowEngine` public operations.
// Grounded on the teacher's `workflow/importer.rs` parse-then-build
// dispatch shape (signature sniff -> parse -> call the engine in a loop)
// and the `dsl/mod.rs` validate-before-build error-message texture.

use crate::error::{WeaveError, WeaveResult};
use crate::graph::GraphEngine;
use crate::id::{EdgeType, NodeId, NodeStatus};
use crate::learning::strip_escapes;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub created: Vec<NodeId>,
    pub skipped: usize,
}

/// `import FILE [--filter=K=V] [--dry-run]` — one JSON object per line,
/// each shaped like an `add` payload (`text`, optional `status`/
/// `metadata`/`alias`). A line whose `metadata` does not match every
/// `filter` pair is skipped, not rejected.
pub fn import_jsonl(graph: &GraphEngine, path: &Path, filters: &[(String, String)], dry_run: bool) -> WeaveResult<ImportOutcome> {
    let content = fs::read_to_string(path).map_err(|e| WeaveError::InvalidInput(format!("reading {}: {e}", path.display())))?;

    let mut created = Vec::new();
    let mut skipped = 0;

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Value = serde_json::from_str(line)
            .map_err(|e| WeaveError::InvalidInput(format!("{}:{}: {e}", path.display(), line_no + 1)))?;

        if !matches_filters(&record, filters) {
            skipped += 1;
            continue;
        }

        let text = record
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| WeaveError::InvalidInput(format!("{}:{}: missing `text`", path.display(), line_no + 1)))?;
        let status = record
            .get("status")
            .and_then(Value::as_str)
            .map(str::parse::<NodeStatus>)
            .transpose()?;
        let mut metadata = record.get("metadata").cloned();
        if let Some(meta) = &mut metadata {
            if let Some(obj) = meta.as_object_mut() {
                obj.insert("imported_from".into(), Value::String(path.display().to_string()));
            }
        } else {
            metadata = Some(serde_json::json!({"imported_from": path.display().to_string()}));
        }
        let alias = record.get("alias").and_then(Value::as_str);

        if dry_run {
            created.push(NodeId::generate());
            continue;
        }
        let id = graph.add(text, status, metadata, alias, None, false)?;
        created.push(id);
    }

    Ok(ImportOutcome { created, skipped })
}

fn matches_filters(record: &Value, filters: &[(String, String)]) -> bool {
    filters.iter().all(|(key, value)| {
        record
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .map(|v| v == value)
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub epic: NodeId,
    pub tasks: Vec<NodeId>,
}

/// `plan FILE --sprint=N [--gh] [--dry-run] [--template]` — a Markdown
/// checklist (`# Title` heading as the epic, `- [ ]`/`- [x]` bullets as
/// tasks implementing it).
pub fn import_plan(graph: &GraphEngine, path: &Path, sprint: Option<u32>, dry_run: bool) -> WeaveResult<PlanOutcome> {
    let content = fs::read_to_string(path).map_err(|e| WeaveError::InvalidInput(format!("reading {}: {e}", path.display())))?;

    let title = content
        .lines()
        .find_map(|l| l.strip_prefix("# "))
        .unwrap_or("Imported plan")
        .trim()
        .to_string();

    let mut metadata = serde_json::json!({"type": "epic", "imported_from": path.display().to_string()});
    if let Some(n) = sprint {
        metadata["sprint"] = Value::from(n);
    }

    let epic = if dry_run {
        NodeId::generate()
    } else {
        graph.add(&title, Some(NodeStatus::Todo), Some(metadata), None, None, true)?
    };

    let mut tasks = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix("- [ ]").or_else(|| trimmed.strip_prefix("- [x]")) else {
            continue;
        };
        let done = trimmed.starts_with("- [x]");
        let task_text = rest.trim();
        if task_text.is_empty() {
            continue;
        }
        if dry_run {
            tasks.push(NodeId::generate());
            continue;
        }
        let status = if done { Some(NodeStatus::Done) } else { Some(NodeStatus::Todo) };
        let id = graph.add(task_text, status, None, None, Some(&epic), true)?;
        tasks.push(id);
    }

    Ok(PlanOutcome { epic, tasks })
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceHit {
    pub target: String,
    pub kind: &'static str,
}

/// `refs [FILE|-t TEXT] [--max=N] [--link --from=ID]` — greps for node-id
/// references (`wv-xxxx`) and file-path-shaped references in free text,
/// optionally materializing a `references` edge per hit.
pub fn extract_refs(text: &str, max: usize) -> Vec<ReferenceHit> {
    let cleaned = strip_escapes(text);
    let mut hits = Vec::new();
    for word in cleaned.split_whitespace() {
        if hits.len() >= max {
            break;
        }
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '.' && c != '/');
        if NodeId::parse(trimmed).is_ok() {
            hits.push(ReferenceHit { target: trimmed.to_string(), kind: "node" });
        } else if trimmed.contains('/') && trimmed.contains('.') {
            hits.push(ReferenceHit { target: trimmed.to_string(), kind: "file" });
        }
    }
    hits
}

/// Materializes `references` edges for every node-shaped hit found by
/// `extract_refs`, used by `refs --link --from=ID`.
pub fn link_refs(graph: &GraphEngine, from: &NodeId, hits: &[ReferenceHit]) -> WeaveResult<usize> {
    let mut linked = 0;
    for hit in hits {
        if hit.kind != "node" {
            continue;
        }
        let Ok(target) = NodeId::parse(&hit.target) else { continue };
        if &target == from {
            continue;
        }
        graph.link(from, &target, EdgeType::References, None, None)?;
        linked += 1;
    }
    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;

    #[test]
    fn import_jsonl_creates_one_node_per_line() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let graph = GraphEngine::new(&storage);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.jsonl");
        std::fs::write(&path, "{\"text\":\"a\"}\n{\"text\":\"b\",\"metadata\":{\"type\":\"bug\"}}\n").unwrap();

        let outcome = import_jsonl(&graph, &path, &[], false).unwrap();
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn import_jsonl_filter_skips_non_matching_metadata() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let graph = GraphEngine::new(&storage);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.jsonl");
        std::fs::write(&path, "{\"text\":\"a\",\"metadata\":{\"type\":\"bug\"}}\n{\"text\":\"b\",\"metadata\":{\"type\":\"task\"}}\n").unwrap();

        let outcome = import_jsonl(&graph, &path, &[("type".into(), "bug".into())], false).unwrap();
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn import_plan_creates_epic_and_tasks_from_checklist() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let graph = GraphEngine::new(&storage);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.md");
        std::fs::write(&path, "# Sprint Nine\n\n- [ ] write the parser\n- [x] draft the spec\n").unwrap();

        let outcome = import_plan(&graph, &path, Some(9), false).unwrap();
        assert_eq!(outcome.tasks.len(), 2);
        let epic = storage.get_node(&outcome.epic).unwrap();
        assert_eq!(epic.text, "Sprint Nine");
    }

    #[test]
    fn extract_refs_finds_node_ids_and_file_paths() {
        let hits = extract_refs("see wv-abcd and src/storage.rs for context", 10);
        assert!(hits.iter().any(|h| h.target == "wv-abcd" && h.kind == "node"));
        assert!(hits.iter().any(|h| h.target == "src/storage.rs" && h.kind == "file"));
    }
}
