// src/id.rs
//
// =============================================================================
// WEAVE: ID & VALIDATOR (Component A)
// =============================================================================
//
// Generates and validates short node ids, aliases, edge types and statuses.
// Nothing here touches storage; it is pure parsing/validation so the rest
// of the engine can trust a `NodeId`/`Alias`/`EdgeType`/`NodeStatus` value
// the moment it holds one.

use crate::error::{WeaveError, WeaveResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const ID_PREFIX: &str = "wv-";
const MIN_SUFFIX_LEN: usize = 4;
const MAX_SUFFIX_LEN: usize = 6;

/// An opaque, immutable node identifier: `wv-` + 4-6 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generates a fresh id from a non-predictable source (a UUID v4, which
    /// is backed by the OS RNG). Collisions are the caller's job to retry
    /// against storage — this function cannot see the database.
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        let suffix: String = raw.chars().take(MAX_SUFFIX_LEN).collect();
        NodeId(format!("{ID_PREFIX}{suffix}"))
    }

    /// Parses and validates an externally supplied id string.
    pub fn parse(s: &str) -> WeaveResult<Self> {
        if is_valid_id(s) {
            Ok(NodeId(s.to_ascii_lowercase()))
        } else {
            Err(WeaveError::InvalidInput(format!(
                "invalid id: {s:?} (expected wv-[0-9a-f]{{4,6}})"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = WeaveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeId::parse(s)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_valid_id(s: &str) -> bool {
    let Some(suffix) = s.strip_prefix(ID_PREFIX) else {
        return false;
    };
    let len = suffix.len();
    (MIN_SUFFIX_LEN..=MAX_SUFFIX_LEN).contains(&len)
        && suffix.chars().all(|c| c.is_ascii_hexdigit())
}

/// A human-readable identifier, unique among non-null aliases, resolvable
/// wherever an id is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alias(String);

impl Alias {
    pub fn parse(s: &str) -> WeaveResult<Self> {
        if is_valid_alias(s) {
            Ok(Alias(s.to_string()))
        } else {
            Err(WeaveError::InvalidInput(format!(
                "invalid alias: {s:?} (expected [A-Za-z][A-Za-z0-9_-]*)"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_valid_alias(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Closed status enum (§3). Any other value is a graph-integrity defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    Todo,
    Active,
    Blocked,
    BlockedExternal,
    Done,
    Pending,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 6] = [
        NodeStatus::Todo,
        NodeStatus::Active,
        NodeStatus::Blocked,
        NodeStatus::BlockedExternal,
        NodeStatus::Done,
        NodeStatus::Pending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Todo => "todo",
            NodeStatus::Active => "active",
            NodeStatus::Blocked => "blocked",
            NodeStatus::BlockedExternal => "blocked-external",
            NodeStatus::Done => "done",
            NodeStatus::Pending => "pending",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, NodeStatus::Done)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = WeaveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(NodeStatus::Todo),
            "active" => Ok(NodeStatus::Active),
            "blocked" => Ok(NodeStatus::Blocked),
            "blocked-external" => Ok(NodeStatus::BlockedExternal),
            "done" => Ok(NodeStatus::Done),
            "pending" => Ok(NodeStatus::Pending),
            other => Err(WeaveError::InvalidInput(format!(
                "invalid status: {other:?} (expected one of: todo, active, blocked, blocked-external, done, pending)"
            ))),
        }
    }
}

/// Closed edge-type enum (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Blocks,
    RelatesTo,
    Implements,
    Contradicts,
    Supersedes,
    References,
    Obsoletes,
    Addresses,
}

impl EdgeType {
    pub const ALL: [EdgeType; 8] = [
        EdgeType::Blocks,
        EdgeType::RelatesTo,
        EdgeType::Implements,
        EdgeType::Contradicts,
        EdgeType::Supersedes,
        EdgeType::References,
        EdgeType::Obsoletes,
        EdgeType::Addresses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Blocks => "blocks",
            EdgeType::RelatesTo => "relates_to",
            EdgeType::Implements => "implements",
            EdgeType::Contradicts => "contradicts",
            EdgeType::Supersedes => "supersedes",
            EdgeType::References => "references",
            EdgeType::Obsoletes => "obsoletes",
            EdgeType::Addresses => "addresses",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = WeaveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocks" => Ok(EdgeType::Blocks),
            "relates_to" => Ok(EdgeType::RelatesTo),
            "implements" => Ok(EdgeType::Implements),
            "contradicts" => Ok(EdgeType::Contradicts),
            "supersedes" => Ok(EdgeType::Supersedes),
            "references" => Ok(EdgeType::References),
            "obsoletes" => Ok(EdgeType::Obsoletes),
            "addresses" => Ok(EdgeType::Addresses),
            other => Err(WeaveError::InvalidInput(format!(
                "invalid edge type: {other:?}"
            ))),
        }
    }
}

/// Validates a JSON metadata blob is a top-level object (never an array or
/// scalar) before it is merged into a node.
pub fn validate_metadata_shape(value: &serde_json::Value) -> WeaveResult<()> {
    if value.is_object() {
        Ok(())
    } else {
        Err(WeaveError::InvalidInput(
            "metadata must be a JSON object".into(),
        ))
    }
}

/// Parses an edge weight, enforcing the [0.0, 1.0] range from §3.
pub fn validate_weight(w: f64) -> WeaveResult<f64> {
    if (0.0..=1.0).contains(&w) {
        Ok(w)
    } else {
        Err(WeaveError::InvalidInput(format!(
            "weight must be within [0.0, 1.0], got {w}"
        )))
    }
}

/// Parses a prune/age spec of the form `Nh` or `Nd`, N > 0 (§4.F).
#[derive(Debug, Clone, Copy)]
pub enum AgeSpec {
    Hours(u64),
    Days(u64),
}

impl AgeSpec {
    pub fn as_duration(&self) -> chrono::Duration {
        match self {
            AgeSpec::Hours(h) => chrono::Duration::hours(*h as i64),
            AgeSpec::Days(d) => chrono::Duration::days(*d as i64),
        }
    }
}

impl FromStr for AgeSpec {
    type Err = WeaveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || {
            WeaveError::InvalidInput(format!(
                "invalid age spec: {s:?} (expected Nh or Nd, N > 0)"
            ))
        };
        if s.len() < 2 {
            return Err(bad());
        }
        let (digits, unit) = s.split_at(s.len() - 1);
        let n: u64 = digits.parse().map_err(|_| bad())?;
        if n == 0 {
            return Err(bad());
        }
        match unit {
            "h" => Ok(AgeSpec::Hours(n)),
            "d" => Ok(AgeSpec::Days(n)),
            _ => Err(bad()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_validate() {
        for _ in 0..50 {
            let id = NodeId::generate();
            assert!(is_valid_id(id.as_str()), "{id} should be valid");
        }
    }

    #[test]
    fn id_parse_rejects_bad_shapes() {
        assert!(NodeId::parse("wv-abcd").is_ok());
        assert!(NodeId::parse("wv-abcdef").is_ok());
        assert!(NodeId::parse("wv-ABCD").is_ok());
        assert!(NodeId::parse("wv-abc").is_err());
        assert!(NodeId::parse("wv-abcdefg").is_err());
        assert!(NodeId::parse("xx-abcd").is_err());
        assert!(NodeId::parse("wv-zzzz").is_err());
    }

    #[test]
    fn alias_rejects_leading_digit() {
        assert!(Alias::parse("a1").is_ok());
        assert!(Alias::parse("1a").is_err());
        assert!(Alias::parse("my_alias-2").is_ok());
        assert!(Alias::parse("bad alias").is_err());
    }

    #[test]
    fn status_round_trips() {
        for s in NodeStatus::ALL {
            assert_eq!(s.as_str().parse::<NodeStatus>().unwrap(), s);
        }
        assert!("banana".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn age_spec_parses() {
        assert!(matches!("3h".parse::<AgeSpec>(), Ok(AgeSpec::Hours(3))));
        assert!(matches!("7d".parse::<AgeSpec>(), Ok(AgeSpec::Days(7))));
        assert!("0h".parse::<AgeSpec>().is_err());
        assert!("3x".parse::<AgeSpec>().is_err());
        assert!("h".parse::<AgeSpec>().is_err());
    }

    #[test]
    fn weight_range_enforced() {
        assert!(validate_weight(0.0).is_ok());
        assert!(validate_weight(1.0).is_ok());
        assert!(validate_weight(1.1).is_err());
        assert!(validate_weight(-0.1).is_err());
    }
}
