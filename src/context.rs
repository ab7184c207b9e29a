// src/context.rs
//
// =============================================================================
// WEAVE: CONTEXT-PACK BUILDER (Component J)
// =============================================================================
//
// Composes node + blockers + ancestry + related + scoped pitfalls +
// contradictions into the single JSON document that primes an agent before
// it starts work (§4.J). Every set is cache-backed (Component C):
// `build()` probes the cache first and recomputes+stores on a miss.
//
// Grounded on the teacher's `workflow.rs` graph-traversal style
// (`prune_subgraph`'s BFS-with-visited-set), generalized here to the
// ancestry/pitfall-scoping walk the spec describes.

use crate::cache::{neighborhood_stamp, ContextCache};
use crate::error::WeaveResult;
use crate::id::{EdgeType, NodeId};
use crate::storage::StorageEngine;
use serde_json::{json, Value};
use std::collections::HashSet;

const ANCESTOR_DEPTH_CAP: usize = 100;
const RELATED_CAP: i64 = 5;
const PITFALL_CAP: usize = 3;

pub struct ContextBuilder<'a> {
    storage: &'a StorageEngine,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(storage: &'a StorageEngine) -> Self {
        Self { storage }
    }

    /// `context(id)` — cache-backed; returns strictly the JSON shape in
    /// §4.J: `{node, blockers[], ancestors[], related[≤5], pitfalls[≤3],
    /// contradictions[]}`.
    pub fn build(&self, id: &NodeId) -> WeaveResult<Value> {
        let stamp = neighborhood_stamp(self.storage, id)?;
        let cache = ContextCache::new(self.storage.raw_connection())?;
        if let Some(cached) = cache.get(id, stamp)? {
            return Ok(cached);
        }

        let pack = self.compute(id)?;
        cache.put(id, stamp, &pack)?;
        Ok(pack)
    }

    fn compute(&self, id: &NodeId) -> WeaveResult<Value> {
        let node = self.storage.get_node(id)?;

        let blockers: Vec<Value> = self
            .storage
            .blockers_of(id)?
            .into_iter()
            .map(|b| json!({"id": b.id, "text": b.text, "status": b.status}))
            .collect();

        let (ancestor_ids, ancestors) = self.ancestors_with_learnings(id)?;

        let related: Vec<Value> = self
            .storage
            .related_edges(id, RELATED_CAP)?
            .into_iter()
            .map(|e| {
                let other = if &e.source == id { &e.target } else { &e.source };
                json!({"id": other, "type": e.edge_type, "weight": e.weight})
            })
            .collect();

        let pitfalls = self.scoped_pitfalls(id, &ancestor_ids)?;

        let contradictions: Vec<Value> = self
            .storage
            .contradictions_of(id)?
            .into_iter()
            .map(|cid| json!(cid))
            .collect();

        Ok(json!({
            "node": {
                "id": node.id,
                "text": node.text,
                "status": node.status,
                "metadata": node.metadata.0,
            },
            "blockers": blockers,
            "ancestors": ancestors,
            "related": related,
            "pitfalls": pitfalls,
            "contradictions": contradictions,
        }))
    }

    /// Walks the `blocks` ancestry chain iteratively (depth-capped,
    /// visited-set guarded, same redesign as `graph::path`), carrying each
    /// ancestor's nested `learnings{decision?,pattern?,pitfall?}` (§4.J).
    fn ancestors_with_learnings(&self, id: &NodeId) -> WeaveResult<(HashSet<NodeId>, Vec<Value>)> {
        let mut visited = HashSet::new();
        visited.insert(id.clone());
        let mut out = Vec::new();
        let mut current = id.clone();

        for _ in 0..ANCESTOR_DEPTH_CAP {
            let blockers = self.storage.blockers_of(&current)?;
            let Some(next) = blockers.into_iter().map(|b| b.id).find(|b| !visited.contains(b)) else {
                break;
            };
            visited.insert(next.clone());
            let node = self.storage.get_node(&next)?;
            out.push(json!({
                "id": node.id,
                "text": node.text,
                "status": node.status,
                "learnings": {
                    "decision": node.metadata.decision(),
                    "pattern": node.metadata.pattern(),
                    "pitfall": node.metadata.pitfall(),
                },
            }));
            current = next;
        }
        Ok((visited, out))
    }

    /// Pitfalls scoped to the node's `blocks`-ancestry or one step away
    /// from an ancestor (edge source or target), capped at 3 — prevents
    /// unrelated global pitfalls from leaking into the pack (§4.J).
    fn scoped_pitfalls(&self, id: &NodeId, ancestors: &HashSet<NodeId>) -> WeaveResult<Vec<Value>> {
        let mut scope: HashSet<NodeId> = ancestors.clone();
        for ancestor in ancestors {
            for edge in self.storage.edges_of(ancestor, None, crate::core::Direction::Both)? {
                scope.insert(edge.source);
                scope.insert(edge.target);
            }
        }
        scope.remove(id);

        let mut pitfalls = Vec::new();
        for candidate in scope {
            if pitfalls.len() >= PITFALL_CAP {
                break;
            }
            if let Ok(node) = self.storage.get_node(&candidate) {
                if let Some(pitfall) = node.metadata.pitfall() {
                    pitfalls.push(json!({"id": node.id, "pitfall": pitfall}));
                }
            }
        }
        // bound by cap, not by scan order stability — callers treat this
        // as a set, matching the spec's "capped at 3" wording exactly.
        pitfalls.truncate(PITFALL_CAP);
        Ok(pitfalls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphEngine;
    use crate::id::EdgeType;
    use serde_json::Value;

    #[test]
    fn context_scoping_excludes_unrelated_pitfalls() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let g = GraphEngine::new(&storage);
        let builder = ContextBuilder::new(&storage);

        let e1 = g.add("epic one", None, None, None, None, false).unwrap();
        let p1 = g
            .add("pitfall one", None, Some(json!({"pitfall": "watch the cache"})), None, None, false)
            .unwrap();
        g.link(&p1, &e1, EdgeType::Addresses, None, None).unwrap();

        let e2 = g.add("epic two", None, None, None, None, false).unwrap();
        let p2 = g
            .add("pitfall two", None, Some(json!({"pitfall": "watch the queue"})), None, None, false)
            .unwrap();
        g.link(&p2, &e2, EdgeType::Addresses, None, None).unwrap();

        let t1 = g.add("task under e1", None, None, None, Some(&e1), false).unwrap();
        g.link(&t1, &e1, EdgeType::Implements, None, None).unwrap();
        g.block(&t1, &e1).unwrap();

        let pack = builder.build(&t1).unwrap();
        let pitfall_ids: Vec<&Value> = pack["pitfalls"].as_array().unwrap().iter().map(|p| &p["id"]).collect();
        let p1_str = serde_json::to_value(&p1).unwrap();
        let p2_str = serde_json::to_value(&p2).unwrap();
        assert!(pitfall_ids.contains(&&p1_str));
        assert!(!pitfall_ids.contains(&&p2_str));
    }

    #[test]
    fn context_cache_serves_repeat_reads() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let g = GraphEngine::new(&storage);
        let builder = ContextBuilder::new(&storage);
        let id = g.add("solo node", None, None, None, None, false).unwrap();
        let first = builder.build(&id).unwrap();
        let second = builder.build(&id).unwrap();
        assert_eq!(first, second);
    }
}
