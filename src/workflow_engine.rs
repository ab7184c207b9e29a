// src/workflow_engine.rs
//
// =============================================================================
// WEAVE: WORKFLOW ENGINE (Component E)
// =============================================================================
//
// The status lifecycle: `done`'s multi-step close sequence, auto-unblock,
// commit-SHA harvesting from the VCS log, and the `ship` composite wrapped
// in the durable journal. Grounded on the teacher's `guardian.rs`
// "optimistic DB write, log on failure" lifecycle-mutation idiom
// (`execute_lifecycle`: write status=Running, dispatch, write result, never
// let a downstream failure corrupt the already-committed state) and
// `drivers/external.rs`'s subprocess-shelling idiom, here applied to `git`
// instead of a Python adapter.

use crate::bridge::IssueBridge;
use crate::cache::ContextCache;
use crate::error::{WeaveError, WeaveResult};
use crate::graph::GraphEngine;
use crate::id::{NodeId, NodeStatus};
use crate::journal::{run_journaled_op, Journal};
use crate::learning::{score_quality, strip_escapes};
use crate::runtime::Runtime;
use crate::storage::StorageEngine;
use serde_json::{json, Value};
use std::process::Command;

const MAX_HARVESTED_SHAS: usize = 10;
const COMMIT_LOOKBACK_DAYS: i64 = 90;

/// Write-time hints surfaced on `done` unless `no_warn` (§4.E step 10).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DoneHints {
    pub missing_learning: bool,
    pub missing_verification_method: bool,
    pub orphan_node: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DoneOutcome {
    pub id: NodeId,
    pub unblocked: Vec<NodeId>,
    pub next_ready: Option<NodeId>,
    pub quality: Option<i64>,
    pub hints: DoneHints,
}

pub struct WorkflowEngine<'a> {
    storage: &'a StorageEngine,
    graph: GraphEngine<'a>,
    bridge: &'a dyn IssueBridge,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(storage: &'a StorageEngine, bridge: &'a dyn IssueBridge) -> Self {
        Self { storage, graph: GraphEngine::new(storage), bridge }
    }

    /// `done(id, learning?, skip_verification?, no_warn?)` (§4.E).
    pub fn done(
        &self,
        id: &NodeId,
        learning: Option<&str>,
        skip_verification: bool,
        no_warn: bool,
        repo_root: Option<&std::path::Path>,
    ) -> WeaveResult<DoneOutcome> {
        let mut node = self.storage.get_node(id)?;
        if node.status.is_done() {
            return Err(WeaveError::Conflict(format!("node {id} is already done")));
        }

        if let Some(raw) = learning {
            let cleaned = strip_escapes(raw);
            node.metadata.set("learning", Value::String(cleaned));
        }

        let quality = if skip_verification {
            None
        } else {
            let combined = node.metadata.learning_text();
            Some(score_quality(&combined))
        };
        if let Some(q) = quality {
            node.metadata.set("learning_quality", json!(q));
        }

        node.status = NodeStatus::Done;
        node.touch();
        self.storage.replace_metadata(id, &node.metadata)?;
        self.storage.set_status(id, NodeStatus::Done)?;

        if let Some(root) = repo_root {
            self.harvest_commit_shas(id, root)?;
        }

        // Auto-unblock (§4.E step 6): for every outgoing `blocks` edge,
        // flip the target back to `todo` iff no non-done blocker remains.
        let mut unblocked = Vec::new();
        for target in self.storage.blocked_targets_of(id)? {
            if !self.storage.has_non_done_blocker(&target)? {
                self.storage.set_status(&target, NodeStatus::Todo)?;
                unblocked.push(target);
            }
        }

        let bridge_comment = learning.map(|l| format!("Closed. {l}")).unwrap_or_else(|| "Closed.".to_string());
        if let Some(issue) = node.metadata.gh_issue() {
            let _ = self.bridge.close_issue(issue, &bridge_comment);
        }

        let mut invalidate_ids = unblocked.clone();
        invalidate_ids.push(id.clone());
        ContextCache::new(self.storage.raw_connection())?.invalidate(&invalidate_ids)?;

        let next_ready = self.graph.ready(Some(1))?.into_iter().next().map(|n| n.id);

        let hints = if no_warn {
            DoneHints::default()
        } else {
            DoneHints {
                missing_learning: node.metadata.learning().is_none() && learning.is_none(),
                missing_verification_method: node.metadata.verification_method().is_none(),
                orphan_node: self
                    .storage
                    .edges_of(id, None, crate::core::Direction::Both)
                    .map(|e| e.is_empty())
                    .unwrap_or(false),
            }
        };

        Ok(DoneOutcome { id: id.clone(), unblocked, next_ready, quality, hints })
    }

    /// `work(id, quiet?)` — claim a node (§4.E).
    pub fn work(&self, id: &NodeId) -> WeaveResult<()> {
        self.storage.set_status(id, NodeStatus::Active)?;
        ContextCache::new(self.storage.raw_connection())?.invalidate(&[id.clone()])?;
        Ok(())
    }

    /// `quick(text, learning?)` — atomic create-and-close.
    pub fn quick(&self, text: &str, learning: Option<&str>) -> WeaveResult<NodeId> {
        let id = self.graph.add(text, Some(NodeStatus::Todo), None, None, None, true)?;
        self.done(&id, learning, false, true, None)?;
        Ok(id)
    }

    pub fn batch_done(&self, ids: &[NodeId], learning: Option<&str>) -> WeaveResult<Vec<DoneOutcome>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.done(id, learning, false, true, None)?);
        }
        Ok(out)
    }

    /// `bulk_update(json_array_on_stdin, dry_run?)` — validates every id
    /// up front; applies only if all resolve (§4.E).
    pub fn bulk_update(&self, patches: &[BulkPatch], dry_run: bool) -> WeaveResult<usize> {
        for patch in patches {
            if !self.storage.node_exists(&patch.id)? {
                return Err(WeaveError::NotFound(format!("node {} not found; no patches applied", patch.id)));
            }
        }
        if dry_run {
            return Ok(patches.len());
        }
        for patch in patches {
            self.graph.update(&patch.id, patch.status, patch.text.as_deref(), patch.metadata.clone(), None, None)?;
        }
        Ok(patches.len())
    }

    /// `ship(id, learning?, gh?)` — done → sync → commit → push, wrapped in
    /// one journal operation so a crash between steps is resumable (§4.E,
    /// §4.G). `done` is itself journal step 1: a crash before `sync`
    /// completes must still recover with `done` marked done. The
    /// `sync`/`commit`/`push` steps are supplied by the caller
    /// (persistence.rs owns VCS/file-sync machinery); this function only
    /// owns the sequencing and the journal wrap.
    pub fn ship<SyncFn, CommitFn, PushFn>(
        &self,
        id: &NodeId,
        learning: Option<&str>,
        journal: &Journal,
        runtime: &Runtime,
        mut sync_step: SyncFn,
        mut commit_step: CommitFn,
        mut push_step: PushFn,
    ) -> WeaveResult<DoneOutcome>
    where
        SyncFn: FnMut() -> WeaveResult<()>,
        CommitFn: FnMut() -> WeaveResult<()>,
        PushFn: FnMut() -> WeaveResult<()>,
    {
        let mut node = self.storage.get_node(id)?;
        node.metadata.set("ship_pending", Value::Bool(true));
        self.storage.replace_metadata(id, &node.metadata)?;

        let mut outcome: Option<DoneOutcome> = None;
        run_journaled_op(
            journal,
            runtime,
            "ship",
            json!({"id": id.to_string()}),
            &["done", "sync", "commit", "push"],
            |_step, action| match action {
                "done" => {
                    outcome = Some(self.done(id, learning, false, true, None)?);
                    Ok(())
                }
                "sync" => sync_step(),
                "commit" => commit_step(),
                "push" => push_step(),
                _ => Ok(()),
            },
        )?;

        let mut node = self.storage.get_node(id)?;
        node.metadata.remove("ship_pending");
        self.storage.replace_metadata(id, &node.metadata)?;

        Ok(outcome.expect("run_journaled_op always runs the \"done\" step before returning"))
    }

    /// Harvests commit SHAs whose message contains the node's id or a
    /// `Weave-ID: id` trailer in the last 90 days, storing up to ten on the
    /// node; re-aggregates onto the `implements` parent if one exists
    /// (§4.E step 5). Shells out to `git log`, in the spirit of the
    /// teacher's subprocess-driven external-tool calls.
    fn harvest_commit_shas(&self, id: &NodeId, repo_root: &std::path::Path) -> WeaveResult<()> {
        let since = format!("--since={COMMIT_LOOKBACK_DAYS} days ago");
        let output = Command::new("git")
            .arg("-C")
            .arg(repo_root)
            .arg("log")
            .arg(&since)
            .arg(format!("--grep={id}"))
            .arg(format!("--grep=Weave-ID: {id}"))
            .arg("--regexp-ignore-case")
            .arg("--format=%h")
            .output();

        let Ok(output) = output else {
            return Ok(());
        };
        if !output.status.success() {
            return Ok(());
        }
        let shas: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .take(MAX_HARVESTED_SHAS)
            .collect();
        if shas.is_empty() {
            return Ok(());
        }

        let mut node = self.storage.get_node(id)?;
        node.metadata.set("commits", json!(shas));
        self.storage.replace_metadata(id, &node.metadata)?;

        if let Some(parent) = self.storage.parent_of(id)? {
            self.reaggregate_child_commits(&parent)?;
        }
        Ok(())
    }

    fn reaggregate_child_commits(&self, parent: &NodeId) -> WeaveResult<()> {
        let mut union: Vec<String> = Vec::new();
        for child in self.storage.children_of(parent)? {
            let child_node = self.storage.get_node(&child)?;
            for sha in child_node.metadata.commits() {
                if !union.contains(&sha) {
                    union.push(sha);
                }
            }
        }
        if union.is_empty() {
            return Ok(());
        }
        let mut parent_node = self.storage.get_node(parent)?;
        parent_node.metadata.set("commits", json!(union));
        self.storage.replace_metadata(parent, &parent_node.metadata)
    }
}

#[derive(Debug, Clone)]
pub struct BulkPatch {
    pub id: NodeId,
    pub status: Option<NodeStatus>,
    pub text: Option<String>,
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::NullBridge;
    use crate::id::EdgeType;

    fn engine() -> StorageEngine {
        StorageEngine::open_in_memory().unwrap()
    }

    #[test]
    fn done_auto_unblocks_single_blocker_target() {
        let storage = engine();
        let bridge = NullBridge;
        let wf = WorkflowEngine::new(&storage, &bridge);
        let g = GraphEngine::new(&storage);

        let a = g.add("blocker", None, None, None, None, false).unwrap();
        let b = g.add("blocked", None, None, None, None, false).unwrap();
        g.block(&b, &a).unwrap();

        let outcome = wf.done(&a, None, true, true, None).unwrap();
        assert_eq!(outcome.unblocked, vec![b.clone()]);
        assert_eq!(storage.get_node(&b).unwrap().status, NodeStatus::Todo);
    }

    #[test]
    fn done_does_not_unblock_while_another_blocker_remains() {
        let storage = engine();
        let bridge = NullBridge;
        let wf = WorkflowEngine::new(&storage, &bridge);
        let g = GraphEngine::new(&storage);

        let a = g.add("blocker a", None, None, None, None, false).unwrap();
        let b = g.add("blocker b", None, None, None, None, false).unwrap();
        let c = g.add("blocked", None, None, None, None, false).unwrap();
        g.link(&a, &c, EdgeType::Blocks, None, None).unwrap();
        g.link(&b, &c, EdgeType::Blocks, None, None).unwrap();
        storage.set_status(&c, NodeStatus::Blocked).unwrap();

        let outcome = wf.done(&a, None, true, true, None).unwrap();
        assert!(outcome.unblocked.is_empty());
        assert_eq!(storage.get_node(&c).unwrap().status, NodeStatus::Blocked);
    }

    #[test]
    fn quick_creates_and_closes_atomically() {
        let storage = engine();
        let bridge = NullBridge;
        let wf = WorkflowEngine::new(&storage, &bridge);
        let id = wf.quick("trivial fix", None).unwrap();
        assert_eq!(storage.get_node(&id).unwrap().status, NodeStatus::Done);
    }

    #[test]
    fn bulk_update_applies_nothing_if_any_id_is_invalid() {
        let storage = engine();
        let bridge = NullBridge;
        let wf = WorkflowEngine::new(&storage, &bridge);
        let g = GraphEngine::new(&storage);
        let a = g.add("a", None, None, None, None, false).unwrap();
        let bogus = NodeId::parse("wv-dead").unwrap();

        let patches = vec![
            BulkPatch { id: a.clone(), status: Some(NodeStatus::Active), text: None, metadata: None },
            BulkPatch { id: bogus, status: Some(NodeStatus::Active), text: None, metadata: None },
        ];
        assert!(wf.bulk_update(&patches, false).is_err());
        assert_eq!(storage.get_node(&a).unwrap().status, NodeStatus::Todo);
    }

    #[test]
    fn ship_wraps_steps_in_a_recoverable_journal_op() {
        let storage = engine();
        let bridge = NullBridge;
        let wf = WorkflowEngine::new(&storage, &bridge);
        let g = GraphEngine::new(&storage);
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        let runtime = Runtime::from_env();

        let id = g.add("ship me", None, None, None, None, false).unwrap();
        let mut calls = Vec::new();
        wf.ship(
            &id,
            None,
            &journal,
            &runtime,
            || { calls.push("sync"); Ok(()) },
            || { calls.push("commit"); Ok(()) },
            || { calls.push("push"); Ok(()) },
        )
        .unwrap();

        assert_eq!(calls, vec!["sync", "commit", "push"]);
        assert!(!journal.has_incomplete().unwrap());
        assert_eq!(storage.get_node(&id).unwrap().status, NodeStatus::Done);
        assert!(!storage.get_node(&id).unwrap().metadata.ship_pending());
    }
}
