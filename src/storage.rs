// src/storage.rs
//
// =============================================================================
// WEAVE: STORAGE ENGINE (Component B)
// =============================================================================
//
// Hybrid-relational SQLite store: status/priority/type/alias are indexed
// columns, everything else is the `metadata` JSON blob. A `nodes_fts` FTS5
// index mirrors `nodes.text` via triggers. Migrations are idempotent and
// additive — `StorageEngine::open` always leaves the schema current.

use crate::core::{Edge, Metadata, Node, NodeSummary};
use crate::error::{WeaveError, WeaveResult};
use crate::id::{EdgeType, NodeId, NodeStatus};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

/// Schema version bumped whenever a migration is added. Stored in
/// `meta(key='schema_version')`.
const SCHEMA_VERSION: i64 = 1;

pub struct StorageEngine {
    conn: Connection,
    path: PathBuf,
}

impl StorageEngine {
    /// Opens (creating if absent) the hot database at `path` and runs every
    /// migration. Safe to call repeatedly — a current schema is a no-op.
    pub fn open(path: impl AsRef<Path>) -> WeaveResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!("opening hot DB: {e}")))?;
        let mut engine = Self { conn, path };
        engine.configure_pragmas()?;
        engine.migrate()?;
        Ok(engine)
    }

    /// Opens a private in-memory store, used by tests and by `load`'s
    /// validate-before-swap step.
    pub fn open_in_memory() -> WeaveResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!("opening memory DB: {e}")))?;
        let mut engine = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        engine.configure_pragmas()?;
        engine.migrate()?;
        Ok(engine)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Escape hatch for sibling modules (cache.rs) that need to attach a
    /// side table to the same connection.
    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    fn configure_pragmas(&self) -> WeaveResult<()> {
        self.conn
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA busy_timeout=5000;
                 PRAGMA mmap_size=268435456;
                 PRAGMA foreign_keys=ON;",
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!("pragma setup: {e}")))?;
        Ok(())
    }

    /// Caps the page count to bound hot-zone disk use (§4.F capacity guard).
    /// `page_limit` is derived by the caller from the hot zone's free space.
    pub fn set_page_limit(&self, page_limit: i64) -> WeaveResult<()> {
        self.conn
            .pragma_update(None, "max_page_count", page_limit)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!("max_page_count: {e}")))?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // MIGRATIONS
    // -------------------------------------------------------------------

    fn migrate(&mut self) -> WeaveResult<()> {
        self.conn
            .execute_batch("CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT);")
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!("meta table: {e}")))?;

        let current: i64 = self
            .conn
            .query_row("SELECT value FROM meta WHERE key='schema_version'", [], |r| {
                r.get::<_, String>(0)
            })
            .optional()
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        if current < 1 {
            self.migrate_v1()?;
        }
        if current < SCHEMA_VERSION {
            self.conn
                .execute(
                    "INSERT INTO meta(key, value) VALUES ('schema_version', ?1)
                     ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                    params![SCHEMA_VERSION.to_string()],
                )
                .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        }
        Ok(())
    }

    fn migrate_v1(&mut self) -> WeaveResult<()> {
        self.conn
            .execute_batch(
                "BEGIN;
                CREATE TABLE IF NOT EXISTS nodes (
                    id TEXT PRIMARY KEY,
                    text TEXT NOT NULL,
                    status TEXT NOT NULL,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    alias TEXT UNIQUE,
                    priority INTEGER GENERATED ALWAYS AS (json_extract(metadata, '$.priority')) VIRTUAL,
                    node_type TEXT GENERATED ALWAYS AS (json_extract(metadata, '$.type')) VIRTUAL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status);
                CREATE INDEX IF NOT EXISTS idx_nodes_priority ON nodes(priority);
                CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);
                CREATE INDEX IF NOT EXISTS idx_nodes_type_priority ON nodes(node_type, priority);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_alias ON nodes(alias) WHERE alias IS NOT NULL;

                CREATE TABLE IF NOT EXISTS edges (
                    source TEXT NOT NULL,
                    target TEXT NOT NULL,
                    type TEXT NOT NULL,
                    weight REAL NOT NULL DEFAULT 1.0,
                    context TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (source, target, type),
                    FOREIGN KEY (source) REFERENCES nodes(id),
                    FOREIGN KEY (target) REFERENCES nodes(id)
                );
                CREATE INDEX IF NOT EXISTS idx_edges_source_type ON edges(source, type);
                CREATE INDEX IF NOT EXISTS idx_edges_target_type ON edges(target, type);
                CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
                CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(type);

                CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
                    id UNINDEXED,
                    text,
                    content='',
                    tokenize='unicode61'
                );

                CREATE TRIGGER IF NOT EXISTS nodes_ai AFTER INSERT ON nodes BEGIN
                    INSERT INTO nodes_fts(rowid, id, text) VALUES (new.rowid, new.id, new.text);
                END;
                CREATE TRIGGER IF NOT EXISTS nodes_ad AFTER DELETE ON nodes BEGIN
                    INSERT INTO nodes_fts(nodes_fts, rowid, id, text) VALUES ('delete', old.rowid, old.id, old.text);
                END;
                CREATE TRIGGER IF NOT EXISTS nodes_au AFTER UPDATE ON nodes BEGIN
                    INSERT INTO nodes_fts(nodes_fts, rowid, id, text) VALUES ('delete', old.rowid, old.id, old.text);
                    INSERT INTO nodes_fts(rowid, id, text) VALUES (new.rowid, new.id, new.text);
                END;
                COMMIT;",
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!("migration v1: {e}")))?;
        Ok(())
    }

    /// Rebuilds the FTS index from scratch, for `reindex` / schema-drift
    /// repair (§4.B: "the core rebuilds the FTS index via reindex rather
    /// than failing").
    pub fn reindex(&self) -> WeaveResult<()> {
        self.conn
            .execute_batch(
                "INSERT INTO nodes_fts(nodes_fts) VALUES ('delete-all');
                 INSERT INTO nodes_fts(rowid, id, text) SELECT rowid, id, text FROM nodes;",
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!("reindex: {e}")))?;
        Ok(())
    }

    pub fn integrity_check(&self) -> WeaveResult<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(result == "ok")
    }

    // -------------------------------------------------------------------
    // NODE WRITES
    // -------------------------------------------------------------------

    pub fn insert_node(&self, node: &Node) -> WeaveResult<()> {
        let metadata_json = serde_json::to_string(&node.metadata.0)?;
        self.conn
            .execute(
                "INSERT INTO nodes (id, text, status, metadata, alias, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    node.id.as_str(),
                    node.text,
                    node.status.as_str(),
                    metadata_json,
                    node.alias.as_ref().map(|a| a.as_str()),
                    node.created_at.to_rfc3339(),
                    node.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| map_write_error(e, "alias"))?;
        Ok(())
    }

    /// Applies a shallow-merge update. `remove_key`, if set, deletes a
    /// single metadata key atomically with the rest of the patch.
    #[allow(clippy::too_many_arguments)]
    pub fn update_node(
        &self,
        id: &NodeId,
        status: Option<NodeStatus>,
        text: Option<&str>,
        metadata_patch: Option<&serde_json::Map<String, serde_json::Value>>,
        alias: Option<Option<&str>>,
        remove_key: Option<&str>,
    ) -> WeaveResult<()> {
        let mut node = self.get_node(id)?;
        if let Some(s) = status {
            node.status = s;
        }
        if let Some(t) = text {
            node.text = t.to_string();
        }
        if let Some(patch) = metadata_patch {
            node.metadata.merge(patch);
        }
        if let Some(key) = remove_key {
            node.metadata.remove(key);
        }
        if let Some(alias_opt) = alias {
            node.alias = match alias_opt {
                Some(a) => Some(crate::id::Alias::parse(a)?),
                None => None,
            };
        }
        node.touch();
        let metadata_json = serde_json::to_string(&node.metadata.0)?;
        self.conn
            .execute(
                "UPDATE nodes SET text=?2, status=?3, metadata=?4, alias=?5, updated_at=?6 WHERE id=?1",
                params![
                    node.id.as_str(),
                    node.text,
                    node.status.as_str(),
                    metadata_json,
                    node.alias.as_ref().map(|a| a.as_str()),
                    node.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| map_write_error(e, "alias"))?;
        Ok(())
    }

    pub fn set_status(&self, id: &NodeId, status: NodeStatus) -> WeaveResult<()> {
        let now = Utc::now().to_rfc3339();
        let n = self
            .conn
            .execute(
                "UPDATE nodes SET status=?2, updated_at=?3 WHERE id=?1",
                params![id.as_str(), status.as_str(), now],
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        if n == 0 {
            return Err(WeaveError::NotFound(format!("node {id} not found")));
        }
        Ok(())
    }

    /// Overwrites the stored metadata blob wholesale (used by the workflow
    /// engine after merging learning/commit fields) and bumps `updated_at`.
    pub fn replace_metadata(&self, id: &NodeId, metadata: &Metadata) -> WeaveResult<()> {
        let json = serde_json::to_string(&metadata.0)?;
        let now = Utc::now().to_rfc3339();
        let n = self
            .conn
            .execute(
                "UPDATE nodes SET metadata=?2, updated_at=?3 WHERE id=?1",
                params![id.as_str(), json, now],
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        if n == 0 {
            return Err(WeaveError::NotFound(format!("node {id} not found")));
        }
        Ok(())
    }

    pub fn delete_node(&self, id: &NodeId) -> WeaveResult<()> {
        self.conn
            .execute("DELETE FROM edges WHERE source=?1 OR target=?1", params![id.as_str()])
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let n = self
            .conn
            .execute("DELETE FROM nodes WHERE id=?1", params![id.as_str()])
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        if n == 0 {
            return Err(WeaveError::NotFound(format!("node {id} not found")));
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // NODE READS
    // -------------------------------------------------------------------

    pub fn get_node(&self, id: &NodeId) -> WeaveResult<Node> {
        self.conn
            .query_row("SELECT * FROM nodes WHERE id=?1", params![id.as_str()], row_to_node)
            .optional()
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?
            .ok_or_else(|| WeaveError::NotFound(format!("node {id} not found")))
    }

    pub fn get_node_by_alias(&self, alias: &str) -> WeaveResult<Node> {
        self.conn
            .query_row("SELECT * FROM nodes WHERE alias=?1", params![alias], row_to_node)
            .optional()
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?
            .ok_or_else(|| WeaveError::NotFound(format!("alias {alias} not found")))
    }

    /// Resolves either a `wv-...` id or a bare alias to a node, the way
    /// every CLI/RPC entry point that takes "ID" is specified to accept.
    pub fn resolve(&self, id_or_alias: &str) -> WeaveResult<Node> {
        if let Ok(id) = NodeId::parse(id_or_alias) {
            if let Ok(node) = self.get_node(&id) {
                return Ok(node);
            }
        }
        self.get_node_by_alias(id_or_alias)
    }

    pub fn node_exists(&self, id: &NodeId) -> WeaveResult<bool> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes WHERE id=?1", params![id.as_str()], |r| r.get(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(n > 0)
    }

    pub fn node_count(&self) -> WeaveResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))
    }

    pub fn edge_count(&self) -> WeaveResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))
    }

    /// `list(status?, priority?, type?, all?)` — ordered by priority desc
    /// then created_at desc (§4.D tie-break rule).
    pub fn list_nodes(
        &self,
        status: Option<NodeStatus>,
        node_type: Option<&str>,
        include_done: bool,
    ) -> WeaveResult<Vec<NodeSummary>> {
        let mut sql = String::from(
            "SELECT id, text, status, node_type, priority, alias, created_at, updated_at FROM nodes WHERE 1=1",
        );
        let mut bind: Vec<&dyn rusqlite::ToSql> = Vec::new();
        let status_str = status.map(|s| s.as_str().to_string());
        if let Some(s) = &status_str {
            sql.push_str(" AND status = ?");
            bind.push(s);
        } else if !include_done {
            sql.push_str(" AND status != 'done'");
        }
        if let Some(nt) = node_type {
            sql.push_str(" AND node_type = ?");
            bind.push(nt);
        }
        sql.push_str(" ORDER BY priority DESC, created_at DESC");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(bind.as_slice(), row_to_summary)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        collect_rows(rows)
    }

    /// `ready(count?)` — `todo` nodes with no incoming non-done `blocks`
    /// edge, ordered by `created_at` ascending.
    pub fn ready_nodes(&self, limit: Option<i64>) -> WeaveResult<Vec<NodeSummary>> {
        let sql = "SELECT n.id, n.text, n.status, n.node_type, n.priority, n.alias, n.created_at, n.updated_at
             FROM nodes n
             WHERE n.status = 'todo'
               AND NOT EXISTS (
                 SELECT 1 FROM edges e
                 JOIN nodes b ON b.id = e.source
                 WHERE e.target = n.id AND e.type = 'blocks' AND b.status != 'done'
               )
             ORDER BY n.created_at ASC
             LIMIT ?1";
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![limit.unwrap_or(i64::MAX)], row_to_summary)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        collect_rows(rows)
    }

    /// Non-done blockers of `id` — sources of incoming `blocks` edges whose
    /// own status is not `done`.
    pub fn blockers_of(&self, id: &NodeId) -> WeaveResult<Vec<NodeSummary>> {
        let sql = "SELECT n.id, n.text, n.status, n.node_type, n.priority, n.alias, n.created_at, n.updated_at
             FROM nodes n
             JOIN edges e ON e.source = n.id
             WHERE e.target = ?1 AND e.type = 'blocks' AND n.status != 'done'";
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![id.as_str()], row_to_summary)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        collect_rows(rows)
    }

    /// Targets of outgoing `blocks` edges from `id`, used by auto-unblock.
    pub fn blocked_targets_of(&self, id: &NodeId) -> WeaveResult<Vec<NodeId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT target FROM edges WHERE source=?1 AND type='blocks'")
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![id.as_str()], |r| r.get::<_, String>(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(NodeId::parse(&r.map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?)?);
        }
        Ok(out)
    }

    /// Whether `id` still has any remaining non-done `blocks` source.
    pub fn has_non_done_blocker(&self, id: &NodeId) -> WeaveResult<bool> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM edges e JOIN nodes b ON b.id = e.source
                 WHERE e.target=?1 AND e.type='blocks' AND b.status != 'done'",
                params![id.as_str()],
                |r| r.get(0),
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(n > 0)
    }

    /// FTS token-overlap probe for near-duplicate detection on `add`
    /// (§4.D: "≥2 shared tokens"). Returns ids of open (non-done) nodes
    /// whose text shares at least `min_shared` tokens with `text`.
    pub fn near_duplicate_open_nodes(&self, text: &str, min_shared: usize) -> WeaveResult<Vec<NodeId>> {
        let tokens = significant_tokens(text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let query = tokens.join(" OR ");
        let mut stmt = self
            .conn
            .prepare(
                "SELECT n.id, n.text FROM nodes_fts f
                 JOIN nodes n ON n.id = f.id
                 WHERE nodes_fts MATCH ?1 AND n.status != 'done'",
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![query], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let mut out = Vec::new();
        for r in rows {
            let (id, other_text) = r.map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
            let other_tokens = significant_tokens(&other_text);
            let shared = tokens.iter().filter(|t| other_tokens.contains(*t)).count();
            if shared >= min_shared {
                out.push(NodeId::parse(&id)?);
            }
        }
        Ok(out)
    }

    /// `search(query, limit, status?)` — BM25-ranked FTS, query wrapped as
    /// a phrase to neutralize FTS operator characters (§4.D).
    pub fn search(&self, query: &str, limit: i64, status: Option<NodeStatus>) -> WeaveResult<Vec<NodeSummary>> {
        let phrase = format!("\"{}\"", query.replace('"', "\"\""));
        let mut sql = String::from(
            "SELECT n.id, n.text, n.status, n.node_type, n.priority, n.alias, n.created_at, n.updated_at
             FROM nodes_fts f
             JOIN nodes n ON n.id = f.id
             WHERE nodes_fts MATCH ?",
        );
        let mut bind: Vec<&dyn rusqlite::ToSql> = vec![&phrase];
        let status_str = status.map(|s| s.as_str().to_string());
        if let Some(s) = &status_str {
            sql.push_str(" AND n.status = ?");
            bind.push(s);
        }
        sql.push_str(" ORDER BY bm25(nodes_fts) ASC LIMIT ?");
        bind.push(&limit);
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(bind.as_slice(), row_to_summary)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        collect_rows(rows)
    }

    /// Roots for `tree`: nodes with no outgoing `implements` edge.
    pub fn root_nodes(&self) -> WeaveResult<Vec<NodeId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id FROM nodes n
                 WHERE NOT EXISTS (SELECT 1 FROM edges e WHERE e.source = n.id AND e.type = 'implements')",
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(NodeId::parse(&r.map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?)?);
        }
        Ok(out)
    }

    /// Children of `id` via incoming `implements` edges (child --implements--> parent).
    pub fn children_of(&self, id: &NodeId) -> WeaveResult<Vec<NodeId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source FROM edges WHERE target=?1 AND type='implements'")
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![id.as_str()], |r| r.get::<_, String>(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(NodeId::parse(&r.map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?)?);
        }
        Ok(out)
    }

    pub fn has_children(&self, id: &NodeId) -> WeaveResult<bool> {
        Ok(!self.children_of(id)?.is_empty())
    }

    pub fn parent_of(&self, id: &NodeId) -> WeaveResult<Option<NodeId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT target FROM edges WHERE source=?1 AND type='implements' LIMIT 1")
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let row: Option<String> = stmt
            .query_row(params![id.as_str()], |r| r.get(0))
            .optional()
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        row.map(|s| NodeId::parse(&s)).transpose()
    }

    pub fn all_node_ids(&self) -> WeaveResult<Vec<NodeId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM nodes")
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(NodeId::parse(&r.map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?)?);
        }
        Ok(out)
    }

    pub fn all_nodes(&self) -> WeaveResult<Vec<Node>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM nodes")
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map([], row_to_node)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        collect_rows(rows)
    }

    // -------------------------------------------------------------------
    // EDGE WRITES
    // -------------------------------------------------------------------

    /// UPSERT on `(source,target,type)`, updating weight/context/created_at
    /// on collision (§4.D `link`).
    pub fn upsert_edge(&self, edge: &Edge) -> WeaveResult<()> {
        let context_json = serde_json::to_string(&edge.context)?;
        self.conn
            .execute(
                "INSERT INTO edges (source, target, type, weight, context, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(source, target, type) DO UPDATE SET
                    weight=excluded.weight, context=excluded.context, created_at=excluded.created_at",
                params![
                    edge.source.as_str(),
                    edge.target.as_str(),
                    edge.edge_type.as_str(),
                    edge.weight,
                    context_json,
                    edge.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn delete_edge(&self, source: &NodeId, target: &NodeId, edge_type: EdgeType) -> WeaveResult<()> {
        self.conn
            .execute(
                "DELETE FROM edges WHERE source=?1 AND target=?2 AND type=?3",
                params![source.as_str(), target.as_str(), edge_type.as_str()],
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn edge_exists(&self, source: &NodeId, target: &NodeId, edge_type: EdgeType) -> WeaveResult<bool> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM edges WHERE source=?1 AND target=?2 AND type=?3",
                params![source.as_str(), target.as_str(), edge_type.as_str()],
                |r| r.get(0),
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(n > 0)
    }

    // -------------------------------------------------------------------
    // EDGE READS
    // -------------------------------------------------------------------

    pub fn edges_of(
        &self,
        id: &NodeId,
        edge_type: Option<EdgeType>,
        direction: crate::core::Direction,
    ) -> WeaveResult<Vec<Edge>> {
        use crate::core::Direction;
        let mut sql = String::from("SELECT source, target, type, weight, context, created_at FROM edges WHERE ");
        match direction {
            Direction::Outbound => sql.push_str("source = ?1"),
            Direction::Inbound => sql.push_str("target = ?1"),
            Direction::Both => sql.push_str("(source = ?1 OR target = ?1)"),
        }
        let mut bind: Vec<&dyn rusqlite::ToSql> = vec![id.as_str()];
        let type_str = edge_type.map(|t| t.as_str().to_string());
        if let Some(t) = &type_str {
            sql.push_str(" AND type = ?2");
            bind.push(t);
        }
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(bind.as_slice(), row_to_edge)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        collect_rows(rows)
    }

    pub fn all_edges(&self) -> WeaveResult<Vec<Edge>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source, target, type, weight, context, created_at FROM edges")
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map([], row_to_edge)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        collect_rows(rows)
    }

    /// `related(id)` — non-`blocks` edges in both directions, weight desc.
    pub fn related_edges(&self, id: &NodeId, limit: i64) -> WeaveResult<Vec<Edge>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT source, target, type, weight, context, created_at FROM edges
                 WHERE (source=?1 OR target=?1) AND type != 'blocks'
                 ORDER BY weight DESC LIMIT ?2",
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![id.as_str(), limit], row_to_edge)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        collect_rows(rows)
    }

    pub fn contradictions_of(&self, id: &NodeId) -> WeaveResult<Vec<NodeId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT target FROM edges WHERE source=?1 AND type='contradicts'
                 UNION
                 SELECT source FROM edges WHERE target=?1 AND type='contradicts'",
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![id.as_str()], |r| r.get::<_, String>(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(NodeId::parse(&r.map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?)?);
        }
        Ok(out)
    }

    // -------------------------------------------------------------------
    // INTEGRITY / HOUSEKEEPING
    // -------------------------------------------------------------------

    /// Edges whose source or target is not a live node id (Ghost edges,
    /// §3 invariant 1 / §9 ambiguous-bug-risk note).
    pub fn ghost_edges(&self) -> WeaveResult<Vec<(String, String, String)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT e.source, e.target, e.type FROM edges e
                 WHERE NOT EXISTS (SELECT 1 FROM nodes n WHERE n.id = e.source)
                    OR NOT EXISTS (SELECT 1 FROM nodes n WHERE n.id = e.target)",
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        collect_rows(rows)
    }

    pub fn clean_ghost_edges(&self) -> WeaveResult<usize> {
        let n = self
            .conn
            .execute(
                "DELETE FROM edges WHERE NOT EXISTS (SELECT 1 FROM nodes n WHERE n.id = edges.source)
                    OR NOT EXISTS (SELECT 1 FROM nodes n WHERE n.id = edges.target)",
                [],
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        Ok(n)
    }

    /// Orphan nodes: no incident edge in either direction.
    pub fn orphan_nodes(&self) -> WeaveResult<Vec<NodeId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id FROM nodes n WHERE NOT EXISTS (
                    SELECT 1 FROM edges e WHERE e.source = n.id OR e.target = n.id
                 )",
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(NodeId::parse(&r.map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?)?);
        }
        Ok(out)
    }

    pub fn stale_active_nodes(&self, cutoff: DateTime<Utc>) -> WeaveResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM nodes WHERE status='active' AND updated_at < ?1",
                params![cutoff.to_rfc3339()],
                |r| r.get(0),
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))
    }

    pub fn invalid_status_count(&self) -> WeaveResult<i64> {
        let placeholders: Vec<String> = NodeStatus::ALL
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect();
        let sql = format!(
            "SELECT COUNT(*) FROM nodes WHERE status NOT IN ({})",
            placeholders.join(",")
        );
        self.conn
            .query_row(&sql, [], |r| r.get(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))
    }

    pub fn unresolved_contradicts_count(&self) -> WeaveResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM edges WHERE type='contradicts'", [], |r| r.get(0))
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))
    }

    /// Unaddressed pitfalls: `status='done'` nodes with `metadata.pitfall`
    /// set but no incoming addresses/implements/supersedes edge (§3
    /// invariant 7, §4.I health scoring).
    pub fn unaddressed_pitfall_count(&self) -> WeaveResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM nodes n
                 WHERE n.status='done' AND json_extract(n.metadata, '$.pitfall') IS NOT NULL
                 AND NOT EXISTS (
                    SELECT 1 FROM edges e
                    WHERE e.target = n.id AND e.type IN ('addresses','implements','supersedes')
                 )",
                [],
                |r| r.get(0),
            )
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))
    }

    // -------------------------------------------------------------------
    // TEXT DUMP / RESTORE (state.sql portable form, used by persistence.rs)
    // -------------------------------------------------------------------

    /// Dumps the live schema+data as a portable SQL text script (`.dump`
    /// equivalent), used by `sync()` for `state.sql`.
    pub fn dump_sql(&self) -> WeaveResult<String> {
        let mut out = String::new();
        out.push_str("PRAGMA foreign_keys=OFF;\nBEGIN TRANSACTION;\n");

        out.push_str(
            "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT);\n\
             CREATE TABLE IF NOT EXISTS nodes (id TEXT PRIMARY KEY, text TEXT NOT NULL, status TEXT NOT NULL, \
             metadata TEXT NOT NULL DEFAULT '{}', alias TEXT UNIQUE, created_at TEXT NOT NULL, updated_at TEXT NOT NULL);\n\
             CREATE TABLE IF NOT EXISTS edges (source TEXT NOT NULL, target TEXT NOT NULL, type TEXT NOT NULL, \
             weight REAL NOT NULL DEFAULT 1.0, context TEXT NOT NULL DEFAULT '{}', created_at TEXT NOT NULL, \
             PRIMARY KEY (source, target, type));\n",
        );

        for node in self.all_nodes()? {
            let metadata_json = serde_json::to_string(&node.metadata.0)?;
            out.push_str(&format!(
                "INSERT INTO nodes VALUES({},{},{},{},{},{},{});\n",
                sql_quote(node.id.as_str()),
                sql_quote(&node.text),
                sql_quote(node.status.as_str()),
                sql_quote(&metadata_json),
                node.alias.as_ref().map(|a| sql_quote(a.as_str())).unwrap_or_else(|| "NULL".into()),
                sql_quote(&node.created_at.to_rfc3339()),
                sql_quote(&node.updated_at.to_rfc3339()),
            ));
        }
        for edge in self.all_edges()? {
            let context_json = serde_json::to_string(&edge.context)?;
            out.push_str(&format!(
                "INSERT INTO edges VALUES({},{},{},{},{},{});\n",
                sql_quote(edge.source.as_str()),
                sql_quote(edge.target.as_str()),
                sql_quote(edge.edge_type.as_str()),
                edge.weight,
                sql_quote(&context_json),
                sql_quote(&edge.created_at.to_rfc3339()),
            ));
        }
        out.push_str("COMMIT;\n");
        Ok(out)
    }

    /// Restores from a `state.sql` text dump into the already-open (empty)
    /// store. Normalizes `\xHH` literals into literal characters first so
    /// dumps produced by an older SQLite still load (§4.F `load`).
    pub fn restore_sql(&mut self, script: &str) -> WeaveResult<()> {
        let normalized = normalize_hex_escapes(script);
        self.conn
            .execute_batch(&normalized)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!("restoring state.sql: {e}")))?;
        self.migrate()?;
        self.reindex()?;
        Ok(())
    }
}

fn map_write_error(err: rusqlite::Error, unique_hint: &str) -> WeaveError {
    let msg = err.to_string();
    if msg.contains("UNIQUE") && msg.contains(unique_hint) {
        WeaveError::Conflict(format!("duplicate {unique_hint}"))
    } else {
        WeaveError::Persistence(anyhow::anyhow!(err))
    }
}

fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Converts literal `\xHH` escape sequences some older SQLite dumps use for
/// non-ASCII bytes back into the UTF-8 character they represent.
fn normalize_hex_escapes(script: &str) -> String {
    if !script.contains("\\x") {
        return script.to_string();
    }
    let mut out = String::with_capacity(script.len());
    let mut chars = script.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'x') {
            chars.next();
            let digits: Vec<char> = chars.clone().take(2).collect();
            if digits.len() == 2 && digits[0].is_ascii_hexdigit() && digits[1].is_ascii_hexdigit() {
                let hex: String = digits.iter().collect();
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    out.push(byte as char);
                    chars.next();
                    chars.next();
                    continue;
                }
            }
            out.push('\\');
            out.push('x');
            continue;
        }
        out.push(c);
    }
    out
}

/// Tokens considered significant for near-duplicate / search-query shaping:
/// alphanumeric, length > 2, case-folded. Shared with the learning dedup
/// pass in `learning.rs`.
pub fn significant_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

fn row_to_node(row: &Row) -> rusqlite::Result<Node> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let metadata: String = row.get("metadata")?;
    let alias: Option<String> = row.get("alias")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Node {
        id: NodeId::parse(&id).unwrap_or_else(|_| NodeId::generate()),
        text: row.get("text")?,
        status: status.parse().unwrap_or(NodeStatus::Todo),
        metadata: Metadata(serde_json::from_str(&metadata).unwrap_or_default()),
        alias: alias.and_then(|a| crate::id::Alias::parse(&a).ok()),
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
    })
}

fn row_to_summary(row: &Row) -> rusqlite::Result<NodeSummary> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    let alias: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(NodeSummary {
        id: NodeId::parse(&id).unwrap_or_else(|_| NodeId::generate()),
        text: row.get(1)?,
        status: status.parse().unwrap_or(NodeStatus::Todo),
        node_type: row.get(3)?,
        priority: row.get(4)?,
        alias: alias.and_then(|a| crate::id::Alias::parse(&a).ok()),
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
    })
}

fn row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
    let source: String = row.get(0)?;
    let target: String = row.get(1)?;
    let edge_type: String = row.get(2)?;
    let context: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(Edge {
        source: NodeId::parse(&source).unwrap_or_else(|_| NodeId::generate()),
        target: NodeId::parse(&target).unwrap_or_else(|_| NodeId::generate()),
        edge_type: edge_type.parse().unwrap_or(EdgeType::RelatesTo),
        weight: row.get(3)?,
        context: serde_json::from_str(&context).unwrap_or(serde_json::Value::Null),
        created_at: parse_rfc3339(&created_at),
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap())
}

fn collect_rows<T>(rows: rusqlite::MappedRows<impl FnMut(&Row) -> rusqlite::Result<T>>) -> WeaveResult<Vec<T>> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Direction;
    use serde_json::json;

    fn new_node(text: &str, status: NodeStatus) -> Node {
        Node::new(text.to_string(), status, Metadata::new(), None)
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut engine = StorageEngine::open_in_memory().unwrap();
        engine.migrate().unwrap();
        engine.migrate().unwrap();
        assert_eq!(engine.node_count().unwrap(), 0);
    }

    #[test]
    fn insert_and_get_round_trips() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let node = new_node("write the thing", NodeStatus::Todo);
        engine.insert_node(&node).unwrap();
        let fetched = engine.get_node(&node.id).unwrap();
        assert_eq!(fetched.text, "write the thing");
        assert_eq!(fetched.status, NodeStatus::Todo);
    }

    #[test]
    fn duplicate_alias_is_conflict() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let mut a = new_node("a", NodeStatus::Todo);
        a.alias = Some(crate::id::Alias::parse("dup").unwrap());
        engine.insert_node(&a).unwrap();
        let mut b = new_node("b", NodeStatus::Todo);
        b.alias = Some(crate::id::Alias::parse("dup").unwrap());
        let err = engine.insert_node(&b).unwrap_err();
        assert!(matches!(err, WeaveError::Conflict(_)));
    }

    #[test]
    fn ready_excludes_blocked_nodes() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let blocker = new_node("blocker", NodeStatus::Todo);
        let blocked = new_node("blocked", NodeStatus::Blocked);
        engine.insert_node(&blocker).unwrap();
        engine.insert_node(&blocked).unwrap();
        engine
            .upsert_edge(&Edge::new(blocker.id.clone(), blocked.id.clone(), EdgeType::Blocks, 1.0, json!({})))
            .unwrap();

        let ready = engine.ready_nodes(None).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, blocker.id);
    }

    #[test]
    fn upsert_edge_updates_weight_on_collision() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let a = new_node("a", NodeStatus::Todo);
        let b = new_node("b", NodeStatus::Todo);
        engine.insert_node(&a).unwrap();
        engine.insert_node(&b).unwrap();
        engine
            .upsert_edge(&Edge::new(a.id.clone(), b.id.clone(), EdgeType::RelatesTo, 0.3, json!({})))
            .unwrap();
        engine
            .upsert_edge(&Edge::new(a.id.clone(), b.id.clone(), EdgeType::RelatesTo, 0.9, json!({})))
            .unwrap();
        let edges = engine.edges_of(&a.id, None, Direction::Outbound).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, 0.9);
    }

    #[test]
    fn ghost_edges_are_detected_and_cleanable() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let a = new_node("a", NodeStatus::Todo);
        engine.insert_node(&a).unwrap();
        // Bypass the FK guard deliberately to simulate a ghost, the way
        // integrity tests are specified to (§8 scenario 6-style drift).
        engine
            .conn
            .execute(
                "INSERT INTO edges (source, target, type, weight, context, created_at) VALUES (?1,'wv-ffff','blocks',1.0,'{}',?2)",
                params![a.id.as_str(), Utc::now().to_rfc3339()],
            )
            .unwrap();
        assert_eq!(engine.ghost_edges().unwrap().len(), 1);
        let removed = engine.clean_ghost_edges().unwrap();
        assert_eq!(removed, 1);
        assert!(engine.ghost_edges().unwrap().is_empty());
    }

    #[test]
    fn dump_and_restore_round_trips() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let a = new_node("node a", NodeStatus::Todo);
        let b = new_node("node b", NodeStatus::Todo);
        engine.insert_node(&a).unwrap();
        engine.insert_node(&b).unwrap();
        engine
            .upsert_edge(&Edge::new(a.id.clone(), b.id.clone(), EdgeType::RelatesTo, 0.5, json!({})))
            .unwrap();
        let dump = engine.dump_sql().unwrap();

        let mut restored = StorageEngine::open_in_memory().unwrap();
        restored.restore_sql(&dump).unwrap();
        assert_eq!(restored.node_count().unwrap(), 2);
        assert_eq!(restored.edge_count().unwrap(), 1);
    }

    #[test]
    fn search_finds_by_token() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let node = new_node("refactor the authentication middleware", NodeStatus::Todo);
        engine.insert_node(&node).unwrap();
        let hits = engine.search("authentication", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, node.id);
    }
}
