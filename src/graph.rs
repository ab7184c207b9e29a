// src/graph.rs
//
// =============================================================================
// WEAVE: GRAPH ENGINE (Component D)
// =============================================================================
//
// CRUD for nodes/edges plus the traversal queries (ancestry, tree, related,
// ready, search). This is the layer that enforces the invariants in §3 —
// `storage.rs` is a dumb typed-query layer; `graph.rs` is where "no ghost
// edges", "no self-block", "no symmetric blocks pair" are actually checked
// before a write reaches the store.
//
// Traversal (`path`, `tree`) is iterative with an explicit visited set and
// a depth cap rather than a recursive CTE with a delimited visited string —
// the one deliberate re-architecture the design calls out (§9: "replace
// with an iterative traversal using an explicit visited set + depth cap;
// retain the same semantics").

use crate::cache::{neighborhood_stamp, ContextCache};
use crate::core::{Direction, Edge, Metadata, Node, NodeSummary};
use crate::error::{WeaveError, WeaveResult};
use crate::id::{validate_metadata_shape, validate_weight, Alias, EdgeType, NodeId, NodeStatus};
use crate::storage::StorageEngine;
use serde_json::Value;

const PATH_DEPTH_CAP: usize = 100;
const TREE_DEPTH_CAP: usize = 99;
const NEAR_DUPLICATE_MIN_SHARED_TOKENS: usize = 2;

pub struct GraphEngine<'a> {
    storage: &'a StorageEngine,
}

/// One row of a `tree` response (§4.D).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TreeRow {
    pub id: NodeId,
    pub text: String,
    pub status: NodeStatus,
    pub node_type: Option<String>,
    pub depth: usize,
    pub root_id: NodeId,
}

/// The three `resolve` modes (§4.D).
#[derive(Debug, Clone, Copy)]
pub enum ResolveMode<'a> {
    Winner(&'a NodeId),
    Merge,
    Defer,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResolveOutcome {
    pub kind: &'static str,
    pub new_node_id: Option<NodeId>,
}

impl<'a> GraphEngine<'a> {
    pub fn new(storage: &'a StorageEngine) -> Self {
        Self { storage }
    }

    // -------------------------------------------------------------------
    // add / delete / update
    // -------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        text: &str,
        status: Option<NodeStatus>,
        metadata: Option<Value>,
        alias: Option<&str>,
        parent: Option<&NodeId>,
        force: bool,
    ) -> WeaveResult<NodeId> {
        if text.trim().is_empty() {
            return Err(WeaveError::InvalidInput("text must not be empty".into()));
        }
        let metadata_map = match metadata {
            Some(v) => {
                validate_metadata_shape(&v)?;
                v.as_object().cloned().unwrap_or_default()
            }
            None => serde_json::Map::new(),
        };
        let alias = alias.map(Alias::parse).transpose()?;

        if !force {
            let dupes = self
                .storage
                .near_duplicate_open_nodes(text, NEAR_DUPLICATE_MIN_SHARED_TOKENS)?;
            if !dupes.is_empty() {
                return Err(WeaveError::Conflict(format!(
                    "duplicate: text shares tokens with open node(s) {} (use --force to override)",
                    dupes
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }

        if let Some(parent_id) = parent {
            if !self.storage.node_exists(parent_id)? {
                return Err(WeaveError::NotFound(format!("parent {parent_id} not found")));
            }
        }

        let node = Node::new(
            text.to_string(),
            status.unwrap_or(NodeStatus::Todo),
            Metadata(metadata_map),
            alias,
        );
        self.storage.insert_node(&node)?;

        if let Some(parent_id) = parent {
            self.storage.upsert_edge(&Edge::new(
                node.id.clone(),
                parent_id.clone(),
                EdgeType::Implements,
                1.0,
                Value::Object(Default::default()),
            ))?;
        }
        Ok(node.id)
    }

    /// Archives the node as a JSONL line (caller supplies the archive
    /// writer — persistence.rs owns the file) then removes it and its
    /// incident edges, invalidating the neighbor closure.
    pub fn delete(&self, id: &NodeId, force: bool, dry_run: bool) -> WeaveResult<Node> {
        let node = self.storage.get_node(id)?;
        if !force && self.storage.has_children(id)? {
            return Err(WeaveError::Conflict(format!(
                "node {id} has children; use --force to delete with its subtree intact but detached"
            )));
        }
        if dry_run {
            return Ok(node);
        }

        let neighbors = self.neighbor_ids(id)?;
        self.storage.delete_node(id)?;
        self.cache().invalidate(&neighbors)?;
        Ok(node)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        id: &NodeId,
        status: Option<NodeStatus>,
        text: Option<&str>,
        metadata: Option<Value>,
        alias: Option<Option<&str>>,
        remove_key: Option<&str>,
    ) -> WeaveResult<()> {
        let patch = match &metadata {
            Some(v) => {
                validate_metadata_shape(v)?;
                Some(v.as_object().cloned().unwrap_or_default())
            }
            None => None,
        };
        self.storage
            .update_node(id, status, text, patch.as_ref(), alias, remove_key)?;
        self.cache().invalidate(&[id.clone()])?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // block / link / resolve
    // -------------------------------------------------------------------

    pub fn block(&self, id: &NodeId, blocker: &NodeId) -> WeaveResult<()> {
        if id == blocker {
            return Err(WeaveError::Conflict("a node cannot block itself".into()));
        }
        if !self.storage.node_exists(id)? {
            return Err(WeaveError::NotFound(format!("node {id} not found")));
        }
        if !self.storage.node_exists(blocker)? {
            return Err(WeaveError::NotFound(format!("node {blocker} not found")));
        }
        if self.storage.edge_exists(id, blocker, EdgeType::Blocks)? {
            return Err(WeaveError::Conflict(format!(
                "immediate counter-cycle: {id} already blocks {blocker}"
            )));
        }

        self.storage.upsert_edge(&Edge::new(
            blocker.clone(),
            id.clone(),
            EdgeType::Blocks,
            1.0,
            Value::Object(Default::default()),
        ))?;
        self.storage.set_status(id, NodeStatus::Blocked)?;
        self.cache().invalidate(&[id.clone(), blocker.clone()])?;
        Ok(())
    }

    pub fn link(
        &self,
        from: &NodeId,
        to: &NodeId,
        edge_type: EdgeType,
        weight: Option<f64>,
        context: Option<Value>,
    ) -> WeaveResult<()> {
        if from == to {
            return Err(WeaveError::InvalidInput("no self-edges".into()));
        }
        if !self.storage.node_exists(from)? {
            return Err(WeaveError::NotFound(format!("node {from} not found")));
        }
        if !self.storage.node_exists(to)? {
            return Err(WeaveError::NotFound(format!("node {to} not found")));
        }
        let weight = validate_weight(weight.unwrap_or(1.0))?;
        if let Some(ctx) = &context {
            validate_metadata_shape(ctx)?;
        }
        if matches!(edge_type, EdgeType::Blocks) && self.storage.edge_exists(to, from, EdgeType::Blocks)? {
            return Err(WeaveError::Conflict(format!(
                "symmetric blocks pair rejected: {to} already blocks {from}"
            )));
        }

        self.storage.upsert_edge(&Edge::new(
            from.clone(),
            to.clone(),
            edge_type,
            weight,
            context.unwrap_or(Value::Object(Default::default())),
        ))?;
        self.cache().invalidate(&[from.clone(), to.clone()])?;
        Ok(())
    }

    pub fn resolve(
        &self,
        n1: &NodeId,
        n2: &NodeId,
        mode: ResolveMode,
        rationale: Option<&str>,
    ) -> WeaveResult<ResolveOutcome> {
        self.storage.delete_edge(n1, n2, EdgeType::Contradicts)?;
        self.storage.delete_edge(n2, n1, EdgeType::Contradicts)?;

        let mut context = serde_json::Map::new();
        if let Some(r) = rationale {
            context.insert("rationale".into(), Value::String(r.to_string()));
        }

        let outcome = match mode {
            ResolveMode::Winner(winner) => {
                let loser = if winner == n1 { n2 } else { n1 };
                self.storage.upsert_edge(&Edge::new(
                    winner.clone(),
                    loser.clone(),
                    EdgeType::Supersedes,
                    1.0,
                    Value::Object(context),
                ))?;
                self.storage.set_status(loser, NodeStatus::Done)?;
                ResolveOutcome {
                    kind: "winner",
                    new_node_id: None,
                }
            }
            ResolveMode::Merge => {
                let merged_text = format!(
                    "{} (merged)",
                    rationale.unwrap_or("merged contradiction").to_string()
                );
                let merged_id = self.add(&merged_text, Some(NodeStatus::Todo), None, None, None, true)?;
                self.storage.upsert_edge(&Edge::new(
                    merged_id.clone(),
                    n1.clone(),
                    EdgeType::Obsoletes,
                    1.0,
                    Value::Object(context.clone()),
                ))?;
                self.storage.upsert_edge(&Edge::new(
                    merged_id.clone(),
                    n2.clone(),
                    EdgeType::Obsoletes,
                    1.0,
                    Value::Object(context),
                ))?;
                self.storage.set_status(n1, NodeStatus::Done)?;
                self.storage.set_status(n2, NodeStatus::Done)?;
                ResolveOutcome {
                    kind: "merge",
                    new_node_id: Some(merged_id),
                }
            }
            ResolveMode::Defer => {
                self.storage
                    .upsert_edge(&Edge::new(n1.clone(), n2.clone(), EdgeType::RelatesTo, 0.5, Value::Object(context.clone())))?;
                self.storage
                    .upsert_edge(&Edge::new(n2.clone(), n1.clone(), EdgeType::RelatesTo, 0.5, Value::Object(context)))?;
                ResolveOutcome {
                    kind: "defer",
                    new_node_id: None,
                }
            }
        };

        self.cache().invalidate(&[n1.clone(), n2.clone()])?;
        Ok(outcome)
    }

    // -------------------------------------------------------------------
    // traversal / query
    // -------------------------------------------------------------------

    pub fn related(&self, id: &NodeId, edge_type: Option<EdgeType>, direction: Direction) -> WeaveResult<Vec<Edge>> {
        self.storage.edges_of(id, edge_type, direction)
    }

    pub fn edges(&self, id: &NodeId, edge_type: Option<EdgeType>) -> WeaveResult<Vec<Edge>> {
        self.storage.edges_of(id, edge_type, Direction::Both)
    }

    /// `path(id)` — the ancestry chain over `blocks` edges. Iterative,
    /// visited-set guarded, depth-capped at 100 (§4.D, §9 redesign).
    pub fn path(&self, id: &NodeId) -> WeaveResult<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut current = id.clone();
        visited.insert(current.clone());

        for _ in 0..PATH_DEPTH_CAP {
            let blockers = self.storage.blockers_of(&current)?;
            let Some(next) = blockers.into_iter().map(|b| b.id).find(|b| !visited.contains(b)) else {
                break;
            };
            chain.push(next.clone());
            visited.insert(next.clone());
            current = next;
        }
        Ok(chain)
    }

    /// `tree(root?, active?, depth?)` — iterative BFS over `implements`
    /// children, depth-capped at 99, ordered `(root_id, depth, id)`.
    pub fn tree(&self, root: Option<&NodeId>, active_only: bool, max_depth: Option<usize>) -> WeaveResult<Vec<TreeRow>> {
        let roots = match root {
            Some(r) => vec![r.clone()],
            None => self.storage.root_nodes()?,
        };
        let depth_cap = max_depth.unwrap_or(TREE_DEPTH_CAP).min(TREE_DEPTH_CAP);

        let mut rows = Vec::new();
        for root_id in roots {
            let mut visited = std::collections::HashSet::new();
            let mut queue = std::collections::VecDeque::new();
            queue.push_back((root_id.clone(), 0usize));
            visited.insert(root_id.clone());

            while let Some((current, depth)) = queue.pop_front() {
                let node = self.storage.get_node(&current)?;
                if !active_only || matches!(node.status, NodeStatus::Active | NodeStatus::Todo) {
                    rows.push(TreeRow {
                        id: current.clone(),
                        text: node.text.clone(),
                        status: node.status,
                        node_type: node.metadata.node_type().map(str::to_string),
                        depth,
                        root_id: root_id.clone(),
                    });
                }
                if depth >= depth_cap {
                    continue;
                }
                for child in self.storage.children_of(&current)? {
                    if visited.insert(child.clone()) {
                        queue.push_back((child, depth + 1));
                    }
                }
            }
        }
        rows.sort_by(|a, b| {
            (a.root_id.as_str(), a.depth, a.id.as_str()).cmp(&(b.root_id.as_str(), b.depth, b.id.as_str()))
        });
        Ok(rows)
    }

    pub fn ready(&self, count: Option<i64>) -> WeaveResult<Vec<NodeSummary>> {
        self.storage.ready_nodes(count)
    }

    pub fn list(&self, status: Option<NodeStatus>, node_type: Option<&str>, all: bool) -> WeaveResult<Vec<NodeSummary>> {
        self.storage.list_nodes(status, node_type, all)
    }

    pub fn search(&self, query: &str, limit: i64, status: Option<NodeStatus>) -> WeaveResult<Vec<NodeSummary>> {
        self.storage.search(query, limit, status)
    }

    /// All ids reachable in one hop from `id`, plus `id` itself — the cache
    /// invalidation closure used by `delete`/`prune`.
    fn neighbor_ids(&self, id: &NodeId) -> WeaveResult<Vec<NodeId>> {
        let mut ids = vec![id.clone()];
        for edge in self.storage.edges_of(id, None, Direction::Both)? {
            let other = if &edge.source == id { edge.target } else { edge.source };
            if !ids.contains(&other) {
                ids.push(other);
            }
        }
        Ok(ids)
    }

    fn cache(&self) -> ContextCache {
        // SAFETY-free note: ContextCache owns no state beyond the connection
        // reference; constructing it is a cheap `CREATE TABLE IF NOT EXISTS`.
        ContextCache::new(self.connection()).expect("context_cache table")
    }

    fn connection(&self) -> &rusqlite::Connection {
        self.storage.raw_connection()
    }
}

pub fn neighborhood_mtime(storage: &StorageEngine, id: &NodeId) -> WeaveResult<chrono::DateTime<chrono::Utc>> {
    neighborhood_stamp(storage, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> StorageEngine {
        StorageEngine::open_in_memory().unwrap()
    }

    #[test]
    fn block_sets_status_and_rejects_self_block() {
        let storage = engine();
        let g = GraphEngine::new(&storage);
        let a = g.add("a", None, None, None, None, false).unwrap();
        let b = g.add("b", None, None, None, None, false).unwrap();
        g.block(&b, &a).unwrap();
        assert_eq!(storage.get_node(&b).unwrap().status, NodeStatus::Blocked);
        assert!(g.block(&a, &a).is_err());
    }

    #[test]
    fn block_rejects_symmetric_counter_cycle() {
        let storage = engine();
        let g = GraphEngine::new(&storage);
        let a = g.add("a", None, None, None, None, false).unwrap();
        let b = g.add("b", None, None, None, None, false).unwrap();
        g.block(&b, &a).unwrap();
        assert!(g.block(&a, &b).is_err());
    }

    #[test]
    fn link_upserts_on_collision() {
        let storage = engine();
        let g = GraphEngine::new(&storage);
        let a = g.add("a", None, None, None, None, false).unwrap();
        let b = g.add("b2", None, None, None, None, false).unwrap();
        g.link(&a, &b, EdgeType::RelatesTo, Some(0.3), None).unwrap();
        g.link(&a, &b, EdgeType::RelatesTo, Some(0.9), None).unwrap();
        let edges = g.edges(&a, Some(EdgeType::RelatesTo)).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, 0.9);
    }

    #[test]
    fn resolve_defer_creates_bidirectional_relates_to() {
        let storage = engine();
        let g = GraphEngine::new(&storage);
        let a = g.add("a", None, None, None, None, false).unwrap();
        let b = g.add("b3", None, None, None, None, false).unwrap();
        g.link(&a, &b, EdgeType::Contradicts, None, None).unwrap();
        g.resolve(&a, &b, ResolveMode::Defer, None).unwrap();
        assert!(g.edges(&a, Some(EdgeType::Contradicts)).unwrap().is_empty());
        let related = g.edges(&a, Some(EdgeType::RelatesTo)).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].weight, 0.5);
    }

    #[test]
    fn path_terminates_and_is_cycle_safe() {
        let storage = engine();
        let g = GraphEngine::new(&storage);
        let a = g.add("a", None, None, None, None, false).unwrap();
        let b = g.add("b4", None, None, None, None, false).unwrap();
        g.block(&b, &a).unwrap();
        let chain = g.path(&b).unwrap();
        assert_eq!(chain, vec![a]);
    }

    #[test]
    fn tree_roots_are_nodes_without_implements() {
        let storage = engine();
        let g = GraphEngine::new(&storage);
        let parent = g.add("epic", None, None, None, None, false).unwrap();
        let _child = g
            .add("task", None, None, None, Some(&parent), false)
            .unwrap();
        let rows = g.tree(None, false, None).unwrap();
        assert!(rows.iter().any(|r| r.id == parent && r.depth == 0));
    }
}
