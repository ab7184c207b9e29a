// src/learning.rs
//
// =============================================================================
// WEAVE: LEARNING SUBSYSTEM (Component H)
// =============================================================================
//
// Learning fields (`decision`, `pattern`, `pitfall`, `learning`,
// `learning_quality`) live in node metadata; this module is the scorer and
// the query/dedup surface over them. Grounded on the teacher's
// `provenance.rs` hashing idiom (treat free text as content to fingerprint)
// and `checkpoint.rs`'s partial-JSON query style for listing.

use crate::core::Node;
use crate::storage::{significant_tokens, StorageEngine};
use regex::Regex;
use std::sync::OnceLock;

/// Quality markers scanned for in combined learning text (§4.H).
const QUALITY_MARKERS: [&str; 4] = ["pattern:", "pitfall:", "decision:", "technique:"];

fn file_ref_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?x)
            [\w./-]+\.[a-zA-Z]{1,5}\b   # a path or filename with an extension
            | \b\w+\([^)]*\)            # or a function-call-looking reference
        ")
        .expect("valid regex")
    })
}

/// Strips ANSI/terminal escape bytes from free-form learning text before
/// it is stored (§4.E `done` step 1).
pub fn strip_escapes(text: &str) -> String {
    text.chars().filter(|c| !c.is_control() || *c == '\n' || *c == '\t').collect()
}

/// Scores combined learning text `0..=4` per the additive rule in §4.H.
pub fn score_quality(combined_text: &str) -> i64 {
    let mut score = 0i64;
    if combined_text.trim().len() > 20 {
        score += 1;
    }
    let lower = combined_text.to_lowercase();
    if QUALITY_MARKERS.iter().any(|m| lower.contains(m)) {
        score += 2;
    }
    if file_ref_pattern().is_match(combined_text) {
        score += 1;
    }
    score.min(4)
}

/// Category filter for `learnings --category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningCategory {
    Decision,
    Pattern,
    Pitfall,
    Learning,
}

impl std::str::FromStr for LearningCategory {
    type Err = crate::error::WeaveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(Self::Decision),
            "pattern" => Ok(Self::Pattern),
            "pitfall" => Ok(Self::Pitfall),
            "learning" => Ok(Self::Learning),
            other => Err(crate::error::WeaveError::InvalidInput(format!(
                "invalid learning category: {other:?}"
            ))),
        }
    }
}

pub struct LearningQuery<'a> {
    pub node: Option<&'a crate::id::NodeId>,
    pub category: Option<LearningCategory>,
    pub grep: Option<&'a str>,
    pub recent: Option<usize>,
    pub min_quality: Option<i64>,
}

/// `learnings [...]` listing: every node carrying at least one learning
/// field, filtered per the query, most-recent first.
pub fn list_learnings(storage: &StorageEngine, query: &LearningQuery) -> crate::error::WeaveResult<Vec<Node>> {
    let mut nodes: Vec<Node> = storage
        .all_nodes()?
        .into_iter()
        .filter(|n| n.metadata.has_any_learning())
        .filter(|n| query.node.map_or(true, |id| &n.id == id))
        .filter(|n| match query.category {
            None => true,
            Some(LearningCategory::Decision) => n.metadata.decision().is_some(),
            Some(LearningCategory::Pattern) => n.metadata.pattern().is_some(),
            Some(LearningCategory::Pitfall) => n.metadata.pitfall().is_some(),
            Some(LearningCategory::Learning) => n.metadata.learning().is_some(),
        })
        .filter(|n| {
            query
                .grep
                .map_or(true, |needle| n.metadata.learning_text().to_lowercase().contains(&needle.to_lowercase()))
        })
        .filter(|n| query.min_quality.map_or(true, |q| n.metadata.learning_quality().unwrap_or(0) >= q))
        .collect();

    nodes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    if let Some(n) = query.recent {
        nodes.truncate(n);
    }
    Ok(nodes)
}

/// Pairs of node ids whose combined learning text has Jaccard token
/// overlap ≥ 0.6 (§4.H dedup).
pub fn find_duplicate_pairs(nodes: &[Node]) -> Vec<(crate::id::NodeId, crate::id::NodeId, f64)> {
    let mut token_sets: Vec<(crate::id::NodeId, std::collections::HashSet<String>)> = Vec::new();
    for n in nodes {
        let tokens: std::collections::HashSet<String> = significant_tokens(&n.metadata.learning_text()).into_iter().collect();
        if !tokens.is_empty() {
            token_sets.push((n.id.clone(), tokens));
        }
    }

    let mut pairs = Vec::new();
    for i in 0..token_sets.len() {
        for j in (i + 1)..token_sets.len() {
            let (id_a, set_a) = &token_sets[i];
            let (id_b, set_b) = &token_sets[j];
            let intersection = set_a.intersection(set_b).count();
            let union = set_a.union(set_b).count();
            if union == 0 {
                continue;
            }
            let jaccard = intersection as f64 / union as f64;
            if jaccard >= 0.6 {
                pairs.push((id_a.clone(), id_b.clone(), jaccard));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_scorer_adds_length_marker_and_ref_points() {
        let text = "pattern: retry with backoff in src/client.rs handles transient errors nicely";
        assert_eq!(score_quality(text), 4);
    }

    #[test]
    fn quality_scorer_short_text_scores_zero() {
        assert_eq!(score_quality("ok"), 0);
    }

    #[test]
    fn jaccard_dedup_flags_near_identical_text() {
        let a = Node::new(
            "a".into(),
            crate::id::NodeStatus::Done,
            {
                let mut m = crate::core::Metadata::new();
                m.set("pattern", serde_json::Value::from("pattern: use exponential backoff retries"));
                m
            },
            None,
        );
        let b = Node::new(
            "b".into(),
            crate::id::NodeStatus::Done,
            {
                let mut m = crate::core::Metadata::new();
                m.set("pattern", serde_json::Value::from("pattern: use exponential backoff retry logic"));
                m
            },
            None,
        );
        let pairs = find_duplicate_pairs(&[a, b]);
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].2 >= 0.6);
    }

    #[test]
    fn strip_escapes_removes_control_bytes() {
        let raw = "hello\x1b[31mworld\x1b[0m";
        assert_eq!(strip_escapes(raw), "hello[31mworld[0m");
    }
}
