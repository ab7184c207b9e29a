// src/cache.rs
//
// =============================================================================
// WEAVE: CACHE LAYER (Component C)
// =============================================================================
//
// Per-node context-pack cache. A cached entry is a JSON blob (§4.C) keyed by
// node id, stored as a side table in the hot store alongside a stamped
// "valid-through" mtime. A read is a probe: if the entry's mtime is still
// ≥ the max `updated_at` across the node and its one-hop edge neighborhood,
// return it; otherwise the caller recomputes and `put`s the fresh value.
//
// Modeled on the teacher's `workflow.rs` content-hash dedup (`cache_map`
// keyed by a derived fingerprint, checked before doing real work) and the
// checkpoint store's "store JSON, read JSON back" idiom in `checkpoint.rs`.

use crate::error::{WeaveError, WeaveResult};
use crate::id::NodeId;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

pub struct ContextCache<'a> {
    conn: &'a Connection,
}

impl<'a> ContextCache<'a> {
    pub fn new(conn: &'a Connection) -> WeaveResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS context_cache (
                node_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                valid_through TEXT NOT NULL
            );",
        )
        .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(Self { conn })
    }

    /// Returns the cached context pack iff `stamp` (the max mtime across the
    /// node and its one-hop neighborhood) is no newer than the entry's
    /// `valid_through` — i.e. nothing has changed since it was computed.
    pub fn get(&self, id: &NodeId, stamp: DateTime<Utc>) -> WeaveResult<Option<Value>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT payload, valid_through FROM context_cache WHERE node_id=?1",
                params![id.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;

        let Some((payload, valid_through)) = row else {
            return Ok(None);
        };
        let valid_through: DateTime<Utc> = valid_through
            .parse()
            .map_err(|_| WeaveError::Persistence(anyhow::anyhow!("corrupt cache timestamp")))?;

        if valid_through >= stamp {
            Ok(Some(serde_json::from_str(&payload)?))
        } else {
            Ok(None)
        }
    }

    pub fn put(&self, id: &NodeId, stamp: DateTime<Utc>, payload: &Value) -> WeaveResult<()> {
        let json = serde_json::to_string(payload)?;
        self.conn
            .execute(
                "INSERT INTO context_cache (node_id, payload, valid_through) VALUES (?1, ?2, ?3)
                 ON CONFLICT(node_id) DO UPDATE SET payload=excluded.payload, valid_through=excluded.valid_through",
                params![id.as_str(), json, stamp.to_rfc3339()],
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Invalidates the union of affected ids. Writes to nodes/edges call
    /// this with every id that could appear in another node's one-hop
    /// neighborhood — best-effort, since a stale miss just recomputes.
    pub fn invalidate(&self, ids: &[NodeId]) -> WeaveResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders: Vec<String> = ids.iter().map(|_| "?".to_string()).collect();
        let sql = format!("DELETE FROM context_cache WHERE node_id IN ({})", placeholders.join(","));
        let params: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        self.conn
            .execute(&sql, rusqlite::params_from_iter(params))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn invalidate_all(&self) -> WeaveResult<()> {
        self.conn
            .execute_batch("DELETE FROM context_cache;")
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

/// Computes the mtime stamp a context-pack cache entry must be valid
/// through: the max `updated_at` of the node itself and every node reached
/// by exactly one edge (source or target), per §4.C.
pub fn neighborhood_stamp(
    storage: &crate::storage::StorageEngine,
    id: &NodeId,
) -> WeaveResult<DateTime<Utc>> {
    let node = storage.get_node(id)?;
    let mut max = node.updated_at;

    for edge in storage.edges_of(id, None, crate::core::Direction::Both)? {
        let neighbor_id = if &edge.source == id { &edge.target } else { &edge.source };
        if let Ok(neighbor) = storage.get_node(neighbor_id) {
            if neighbor.updated_at > max {
                max = neighbor.updated_at;
            }
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Edge, Metadata, Node};
    use crate::id::{EdgeType, NodeStatus};
    use crate::storage::StorageEngine;
    use serde_json::json;

    #[test]
    fn stale_entry_is_not_returned_after_neighbor_write() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let a = Node::new("a".into(), NodeStatus::Todo, Metadata::new(), None);
        let b = Node::new("b".into(), NodeStatus::Todo, Metadata::new(), None);
        storage.insert_node(&a).unwrap();
        storage.insert_node(&b).unwrap();
        storage
            .upsert_edge(&Edge::new(a.id.clone(), b.id.clone(), EdgeType::RelatesTo, 1.0, json!({})))
            .unwrap();

        let conn = Connection::open_in_memory().unwrap();
        let cache = ContextCache::new(&conn).unwrap();

        let stamp = neighborhood_stamp(&storage, &a.id).unwrap();
        cache.put(&a.id, stamp, &json!({"cached": true})).unwrap();
        assert!(cache.get(&a.id, stamp).unwrap().is_some());

        std::thread::sleep(std::time::Duration::from_millis(5));
        storage.set_status(&b.id, NodeStatus::Active).unwrap();
        let fresh_stamp = neighborhood_stamp(&storage, &a.id).unwrap();
        assert!(fresh_stamp > stamp);
        assert!(cache.get(&a.id, fresh_stamp).unwrap().is_none());
    }

    #[test]
    fn invalidate_removes_listed_ids_only() {
        let conn = Connection::open_in_memory().unwrap();
        let cache = ContextCache::new(&conn).unwrap();
        let id_a = NodeId::generate();
        let id_b = NodeId::generate();
        let now = Utc::now();
        cache.put(&id_a, now, &json!({})).unwrap();
        cache.put(&id_b, now, &json!({})).unwrap();
        cache.invalidate(&[id_a.clone()]).unwrap();
        assert!(cache.get(&id_a, now).unwrap().is_none());
        assert!(cache.get(&id_b, now).unwrap().is_some());
    }
}
