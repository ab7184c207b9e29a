// src/health.rs
//
// =============================================================================
// WEAVE: HEALTH, DIGEST, SESSION SUMMARY (Component I)
// =============================================================================
//
// Scores the graph's integrity starting at 100 and deducting per-defect
// penalties (§4.I), appends a TSV line to `health.log`, and diffs live
// counts against a snapshot taken at `load` time for `session-summary`.
// Grounded on the teacher's `logs.rs` buffered-diagnostics pattern (a
// bounded append sink written on every event) and `checkpoint.rs`'s
// aggregate-query style.

use crate::error::WeaveResult;
use crate::storage::StorageEngine;
use chrono::{DateTime, Duration, Utc};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

const STALE_ACTIVE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthBucket {
    Healthy,
    Warning,
    Unhealthy,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub score: i64,
    pub bucket: &'static str,
    pub nodes: i64,
    pub edges: i64,
    pub orphans: i64,
    pub ghost_edges: i64,
    pub invalid_statuses: i64,
    pub unaddressed_pitfalls: i64,
    pub stale_active: i64,
    pub unresolved_contradicts: i64,
}

impl HealthReport {
    pub fn bucket(&self) -> HealthBucket {
        if self.score >= 90 {
            HealthBucket::Healthy
        } else if self.score >= 70 {
            HealthBucket::Warning
        } else {
            HealthBucket::Unhealthy
        }
    }
}

/// `health` (§4.I): computes the score, appends a TSV log line, and
/// returns the full report.
pub fn compute_health(storage: &StorageEngine, log_path: &Path) -> WeaveResult<HealthReport> {
    let nodes = storage.node_count()?;
    let edges = storage.edge_count()?;
    let orphans = storage.orphan_nodes()?.len() as i64;
    let ghost_edges = storage.ghost_edges()?.len() as i64;
    let invalid_statuses = storage.invalid_status_count()?;
    let unaddressed_pitfalls = storage.unaddressed_pitfall_count()?;
    let cutoff = Utc::now() - Duration::days(STALE_ACTIVE_DAYS);
    let stale_active = storage.stale_active_nodes(cutoff)?;
    let unresolved_contradicts = storage.unresolved_contradicts_count()?;

    let mut score = 100i64;
    score -= 20 * invalid_statuses;
    score -= 10 * unaddressed_pitfalls;
    score -= 5 * stale_active;
    score -= 15 * unresolved_contradicts;
    if ghost_edges > 0 && edges > 0 {
        score -= ((ghost_edges * 30 / edges).max(5)).min(30);
    }
    if orphans > 5 && nodes > 0 {
        score -= ((orphans * 15 / nodes).max(3)).min(15);
    }
    let score = score.clamp(0, 100);

    let report = HealthReport {
        score,
        bucket: match score {
            s if s >= 90 => "healthy",
            s if s >= 70 => "warning",
            _ => "unhealthy",
        },
        nodes,
        edges,
        orphans,
        ghost_edges,
        invalid_statuses,
        unaddressed_pitfalls,
        stale_active,
        unresolved_contradicts,
    };

    append_history_line(log_path, &report)?;
    Ok(report)
}

fn append_history_line(log_path: &Path, report: &HealthReport) -> WeaveResult<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| crate::error::WeaveError::Persistence(anyhow::anyhow!(e)))?;
    writeln!(
        file,
        "{}\t{}\t{}\t{}\t{}\t{}",
        Utc::now().to_rfc3339(),
        report.score,
        report.nodes,
        report.edges,
        report.orphans,
        report.ghost_edges,
    )
    .map_err(|e| crate::error::WeaveError::Persistence(anyhow::anyhow!(e)))?;
    Ok(())
}

/// `health --history[=N]` — the last N TSV lines, most recent last (file
/// order), parsed into structured rows.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthHistoryRow {
    pub timestamp: String,
    pub score: i64,
    pub nodes: i64,
    pub edges: i64,
    pub orphans: i64,
    pub ghost_edges: i64,
}

pub fn read_history(log_path: &Path, limit: usize) -> WeaveResult<Vec<HealthHistoryRow>> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(log_path).map_err(|e| crate::error::WeaveError::Persistence(anyhow::anyhow!(e)))?;
    let mut rows: Vec<HealthHistoryRow> = content
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() != 6 {
                return None;
            }
            Some(HealthHistoryRow {
                timestamp: cols[0].to_string(),
                score: cols[1].parse().ok()?,
                nodes: cols[2].parse().ok()?,
                edges: cols[3].parse().ok()?,
                orphans: cols[4].parse().ok()?,
                ghost_edges: cols[5].parse().ok()?,
            })
        })
        .collect();
    if rows.len() > limit {
        rows = rows.split_off(rows.len() - limit);
    }
    Ok(rows)
}

/// `digest` — one-line summary with alerts.
pub fn digest(report: &HealthReport) -> String {
    let mut alerts = Vec::new();
    if report.ghost_edges > 0 {
        alerts.push(format!("{} ghost edges", report.ghost_edges));
    }
    if report.invalid_statuses > 0 {
        alerts.push(format!("{} invalid statuses", report.invalid_statuses));
    }
    if report.unaddressed_pitfalls > 0 {
        alerts.push(format!("{} unaddressed pitfalls", report.unaddressed_pitfalls));
    }
    if alerts.is_empty() {
        format!("health={} ({}) nodes={} edges={}", report.score, report.bucket, report.nodes, report.edges)
    } else {
        format!(
            "health={} ({}) nodes={} edges={} — {}",
            report.score,
            report.bucket,
            report.nodes,
            report.edges,
            alerts.join(", ")
        )
    }
}

/// A snapshot of live totals, taken at `load` and diffed later by
/// `session-summary` (§4.F `load`, §4.I).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionSnapshot {
    pub taken_at: DateTime<Utc>,
    pub nodes: i64,
    pub done: i64,
    pub learnings: i64,
}

pub fn take_snapshot(storage: &StorageEngine) -> WeaveResult<SessionSnapshot> {
    let nodes = storage.node_count()?;
    let all = storage.all_nodes()?;
    let done = all.iter().filter(|n| n.status.is_done()).count() as i64;
    let learnings = all.iter().filter(|n| n.metadata.has_any_learning()).count() as i64;
    Ok(SessionSnapshot { taken_at: Utc::now(), nodes, done, learnings })
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub duration_secs: i64,
    pub nodes_created: i64,
    pub nodes_completed: i64,
    pub new_learnings: i64,
}

pub fn diff_session(storage: &StorageEngine, snapshot: &SessionSnapshot) -> WeaveResult<SessionSummary> {
    let now = take_snapshot(storage)?;
    Ok(SessionSummary {
        duration_secs: (now.taken_at - snapshot.taken_at).num_seconds(),
        nodes_created: now.nodes - snapshot.nodes,
        nodes_completed: now.done - snapshot.done,
        new_learnings: now.learnings - snapshot.learnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_health_is_100() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("health.log");
        let report = compute_health(&storage, &log).unwrap();
        assert_eq!(report.score, 100);
        assert_eq!(report.bucket, "healthy");
    }

    #[test]
    fn one_unaddressed_pitfall_costs_ten_points() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("health.log");
        let baseline = compute_health(&storage, &log).unwrap().score;

        let mut node = crate::core::Node::new(
            "finished work".into(),
            crate::id::NodeStatus::Done,
            crate::core::Metadata::new(),
            None,
        );
        node.metadata.set("pitfall", serde_json::Value::from("careful here"));
        storage.insert_node(&node).unwrap();

        let after = compute_health(&storage, &log).unwrap().score;
        assert_eq!(baseline - after, 10);
    }

    #[test]
    fn history_respects_limit() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("health.log");
        for _ in 0..3 {
            compute_health(&storage, &log).unwrap();
        }
        let rows = read_history(&log, 2).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
