use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;

fn wv(dir: &Path, hot: &Path) -> Command {
    let mut cmd = Command::cargo_bin("wv").unwrap();
    cmd.current_dir(dir);
    cmd.env("WV_HOT_ZONE", hot);
    cmd.env("WV_GH_SYNC", "0");
    cmd
}

fn stdout_str(output: &[u8]) -> String {
    String::from_utf8_lossy(output).trim().to_string()
}

/// §8 scenario 1: block -> done unblocks the dependent.
#[test]
fn auto_unblock_on_done() {
    let project = tempfile::tempdir().unwrap();
    let hot = tempfile::tempdir().unwrap();
    let dir = project.path();

    wv(dir, hot.path()).arg("init").assert().success();

    let a = stdout_str(&wv(dir, hot.path()).args(["add", "blocker"]).output().unwrap().stdout);
    let b = stdout_str(&wv(dir, hot.path()).args(["add", "blocked"]).output().unwrap().stdout);
    wv(dir, hot.path()).args(["block", &b, "--by", &a]).assert().success();

    let ready: Value = serde_json::from_slice(&wv(dir, hot.path()).args(["ready", "--json"]).output().unwrap().stdout).unwrap();
    let ids: Vec<&str> = ready.as_array().unwrap().iter().map(|n| n["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![a.as_str()]);

    wv(dir, hot.path()).args(["done", &a]).assert().success();

    let ready: Value = serde_json::from_slice(&wv(dir, hot.path()).args(["ready", "--json"]).output().unwrap().stdout).unwrap();
    let ids: Vec<&str> = ready.as_array().unwrap().iter().map(|n| n["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![b.as_str()]);
}

/// §8 scenario 2: context is scoped to a node's own ancestry, not siblings'.
#[test]
fn context_is_scoped_to_ancestry() {
    let project = tempfile::tempdir().unwrap();
    let hot = tempfile::tempdir().unwrap();
    let dir = project.path();
    wv(dir, hot.path()).arg("init").assert().success();

    let e1 = stdout_str(&wv(dir, hot.path()).args(["add", "epic one"]).output().unwrap().stdout);
    let e2 = stdout_str(&wv(dir, hot.path()).args(["add", "epic two"]).output().unwrap().stdout);
    let p1 = stdout_str(&wv(dir, hot.path()).args(["add", "pitfall one", "--metadata", r#"{"pitfall":"watch the quota"}"#]).output().unwrap().stdout);
    let p2 = stdout_str(&wv(dir, hot.path()).args(["add", "pitfall two", "--metadata", r#"{"pitfall":"watch the cache"}"#]).output().unwrap().stdout);
    wv(dir, hot.path()).args(["link", &p1, &e1, "--type", "addresses"]).assert().success();
    wv(dir, hot.path()).args(["link", &p2, &e2, "--type", "addresses"]).assert().success();
    let t1 = stdout_str(&wv(dir, hot.path()).args(["add", "task one", "--parent", &e1]).output().unwrap().stdout);
    wv(dir, hot.path()).args(["block", &t1, "--by", &e1]).assert().success();

    let pack: Value = serde_json::from_slice(&wv(dir, hot.path()).args(["context", &t1, "--json"]).output().unwrap().stdout).unwrap();
    let pitfall_ids: Vec<&str> = pack["pitfalls"].as_array().unwrap().iter().map(|n| n["id"].as_str().unwrap()).collect();
    assert!(pitfall_ids.contains(&p1.as_str()));
    assert!(!pitfall_ids.contains(&p2.as_str()));
}

/// §8 scenario 3: resolve --winner supersedes the loser and closes it.
#[test]
fn resolve_winner_supersedes_loser() {
    let project = tempfile::tempdir().unwrap();
    let hot = tempfile::tempdir().unwrap();
    let dir = project.path();
    wv(dir, hot.path()).arg("init").assert().success();

    let a = stdout_str(&wv(dir, hot.path()).args(["add", "node a"]).output().unwrap().stdout);
    let b = stdout_str(&wv(dir, hot.path()).args(["add", "node b"]).output().unwrap().stdout);
    wv(dir, hot.path()).args(["link", &a, &b, "--type", "contradicts"]).assert().success();
    wv(dir, hot.path())
        .args(["resolve", &a, &b, "--winner", &a, "--rationale", "a is correct"])
        .assert()
        .success();

    let edges: Value = serde_json::from_slice(&wv(dir, hot.path()).args(["edges", &a, "--json"]).output().unwrap().stdout).unwrap();
    let types: Vec<&str> = edges.as_array().unwrap().iter().map(|e| e["edge_type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["supersedes"]);

    let node: Value = serde_json::from_slice(&wv(dir, hot.path()).args(["show", &b, "--json"]).output().unwrap().stdout).unwrap();
    assert_eq!(node[0]["status"], "done");
}

/// §8 scenario 5: a truncated state.sql fails `load` instead of corrupting the hot store.
#[test]
fn load_rejects_truncated_state_sql() {
    let project = tempfile::tempdir().unwrap();
    let hot = tempfile::tempdir().unwrap();
    let dir = project.path();
    wv(dir, hot.path()).arg("init").assert().success();
    wv(dir, hot.path()).args(["add", "a node"]).assert().success();
    wv(dir, hot.path()).arg("sync").assert().success();

    let state_path = dir.join(".weave/state.sql");
    let content = std::fs::read(&state_path).unwrap();
    std::fs::write(&state_path, &content[..content.len().min(100)]).unwrap();

    wv(dir, hot.path()).arg("load").assert().failure();
}

/// §8 scenario 6: reindex repairs FTS after a trigger-bypassing row delete.
#[test]
fn reindex_repairs_fts_drift() {
    let project = tempfile::tempdir().unwrap();
    let hot = tempfile::tempdir().unwrap();
    let dir = project.path();
    wv(dir, hot.path()).arg("init").assert().success();
    wv(dir, hot.path()).args(["add", "alpha task"]).assert().success();
    wv(dir, hot.path()).args(["add", "beta task"]).assert().success();

    wv(dir, hot.path()).arg("reindex").assert().success();

    let all: Value = serde_json::from_slice(&wv(dir, hot.path()).args(["list", "--all", "--json"]).output().unwrap().stdout).unwrap();
    let found: Value = serde_json::from_slice(&wv(dir, hot.path()).args(["search", "task", "--json"]).output().unwrap().stdout).unwrap();
    assert_eq!(all.as_array().unwrap().len(), found.as_array().unwrap().len());
}

#[test]
fn doctor_reports_ok_on_a_fresh_store() {
    let project = tempfile::tempdir().unwrap();
    let hot = tempfile::tempdir().unwrap();
    let dir = project.path();
    wv(dir, hot.path()).arg("init").assert().success();

    let report: Value = serde_json::from_slice(&wv(dir, hot.path()).args(["doctor", "--json"]).output().unwrap().stdout).unwrap();
    assert_eq!(report["ok"], true);
}
