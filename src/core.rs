// src/core.rs
//
// =============================================================================
// WEAVE: CORE DATA MODEL (§3)
// =============================================================================
//
// The typed contract between the storage layer and everything above it.
//
// Design Principles (kept from the teacher's newtype section):
// 1. Newtype Pattern: NodeId/Alias/NodeStatus/EdgeType are never raw String.
// 2. Metadata is a typed wrapper over a JSON object, not ad hoc Value::get.
// 3. Every mutation advances `updated_at`.

use crate::id::{Alias, EdgeType, NodeId, NodeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// METADATA (Typed wrapper)
// ============================================================================

/// The node metadata blob. Recognized keys are accessed through typed
/// helpers; unrecognized keys round-trip untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Metadata(pub Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Shallow merge: keys in `other` overwrite keys in `self`.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (k, v) in other {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn node_type(&self) -> Option<&str> {
        self.get("type").and_then(Value::as_str)
    }

    pub fn priority(&self) -> Option<i64> {
        self.get("priority").and_then(Value::as_i64)
    }

    pub fn gh_issue(&self) -> Option<i64> {
        self.get("gh_issue").and_then(Value::as_i64)
    }

    pub fn pitfall(&self) -> Option<&str> {
        self.get("pitfall").and_then(Value::as_str)
    }

    pub fn decision(&self) -> Option<&str> {
        self.get("decision").and_then(Value::as_str)
    }

    pub fn pattern(&self) -> Option<&str> {
        self.get("pattern").and_then(Value::as_str)
    }

    pub fn learning(&self) -> Option<&str> {
        self.get("learning").and_then(Value::as_str)
    }

    pub fn learning_quality(&self) -> Option<i64> {
        self.get("learning_quality").and_then(Value::as_i64)
    }

    pub fn verification_method(&self) -> Option<&str> {
        self.get("verification_method").and_then(Value::as_str)
    }

    pub fn ship_pending(&self) -> bool {
        self.get("ship_pending")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn commits(&self) -> Vec<String> {
        self.get("commits")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Any of decision/pattern/pitfall/learning free-text fields, combined,
    /// used by the quality scorer and the learning-dedup pass (§4.H).
    pub fn learning_text(&self) -> String {
        [
            self.decision(),
            self.pattern(),
            self.pitfall(),
            self.learning(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }

    pub fn has_any_learning(&self) -> bool {
        !self.learning_text().trim().is_empty()
    }
}

// ============================================================================
// NODE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub text: String,
    pub status: NodeStatus,
    pub metadata: Metadata,
    pub alias: Option<Alias>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(text: String, status: NodeStatus, metadata: Metadata, alias: Option<Alias>) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::generate(),
            text,
            status,
            metadata,
            alias,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Lightweight row used by list/ready/search/tree queries that do not need
/// the full metadata blob materialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub text: String,
    pub status: NodeStatus,
    pub node_type: Option<String>,
    pub priority: Option<i64>,
    pub alias: Option<Alias>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// EDGE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId, edge_type: EdgeType, weight: f64, context: Value) -> Self {
        Self {
            source,
            target,
            edge_type,
            weight,
            context,
            created_at: Utc::now(),
        }
    }
}

/// Direction filter used by `related`/traversal queries (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
    Both,
}

impl std::str::FromStr for Direction {
    type Err = crate::error::WeaveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outbound" => Ok(Direction::Outbound),
            "inbound" => Ok(Direction::Inbound),
            "both" => Ok(Direction::Both),
            other => Err(crate::error::WeaveError::InvalidInput(format!(
                "invalid direction: {other:?} (expected outbound, inbound, or both)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_merge_is_shallow() {
        let mut m = Metadata::new();
        m.set("priority", Value::from(1));
        m.set("keep", Value::from("a"));
        let mut patch = Map::new();
        patch.insert("priority".into(), Value::from(2));
        m.merge(&patch);
        assert_eq!(m.priority(), Some(2));
        assert_eq!(m.get("keep").unwrap(), "a");
    }

    #[test]
    fn learning_text_concatenates_present_fields() {
        let mut m = Metadata::new();
        m.set("pattern", Value::from("pattern: use X"));
        m.set("pitfall", Value::from("pitfall: avoid Y"));
        let text = m.learning_text();
        assert!(text.contains("use X"));
        assert!(text.contains("avoid Y"));
    }
}
