// src/journal.rs
//
// =============================================================================
// WEAVE: DURABLE JOURNAL (Component G)
// =============================================================================
//
// Append-only JSON-lines write-ahead log in the hot zone, one event per
// line, used to make multi-step external operations (sync/delete/ship)
// resumable after a crash or reboot. The spec's wire format is plain JSONL
// text, not the teacher's bincode+CRC32 binary frame in `eventlog.rs` — but
// the shape of the solution is the same one `eventlog.rs` teaches: an
// append-only writer, a self-healing reader that tolerates a truncated
// final line, and a `recover`-style scan for incomplete records.

use crate::error::{WeaveError, WeaveResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
#[serde(rename_all = "lowercase")]
pub enum JournalEvent {
    Begin {
        ts: chrono::DateTime<chrono::Utc>,
        op_id: String,
        op: String,
        args: Value,
    },
    Step {
        ts: chrono::DateTime<chrono::Utc>,
        op_id: String,
        step: u32,
        action: String,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
    },
    End {
        ts: chrono::DateTime<chrono::Utc>,
        op_id: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Done,
}

/// The state `recover` returns: the one incomplete op, if any, plus its
/// completed step actions and the surfaced pending action to re-invoke.
#[derive(Debug, Clone, Serialize)]
pub struct IncompleteOp {
    pub op_id: String,
    pub op: String,
    pub completed_steps: Vec<u32>,
    pub pending_action: Option<String>,
}

pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(hot_zone: impl AsRef<Path>) -> Self {
        Self { path: hot_zone.as_ref().join("journal.jsonl") }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &JournalEvent) -> WeaveResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| WeaveError::Persistence(anyhow::anyhow!("opening journal: {e}")))?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}").map_err(|e| WeaveError::Persistence(anyhow::anyhow!("appending journal: {e}")))?;
        file.sync_data().ok();
        Ok(())
    }

    pub fn begin(&self, op_id: &str, op: &str, args: Value) -> WeaveResult<()> {
        self.append(&JournalEvent::Begin {
            ts: chrono::Utc::now(),
            op_id: op_id.to_string(),
            op: op.to_string(),
            args,
        })
    }

    pub fn step(&self, op_id: &str, step: u32, action: &str, status: StepStatus, args: Option<Value>) -> WeaveResult<()> {
        self.append(&JournalEvent::Step {
            ts: chrono::Utc::now(),
            op_id: op_id.to_string(),
            step,
            action: action.to_string(),
            status,
            args,
        })
    }

    pub fn complete(&self, op_id: &str, step: u32, action: &str) -> WeaveResult<()> {
        self.step(op_id, step, action, StepStatus::Done, None)
    }

    pub fn end(&self, op_id: &str) -> WeaveResult<()> {
        self.append(&JournalEvent::End { ts: chrono::Utc::now(), op_id: op_id.to_string() })
    }

    fn read_events(&self) -> WeaveResult<Vec<JournalEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            // Self-healing: a truncated last line (torn write across a
            // crash) is skipped rather than treated as a fatal parse error.
            match serde_json::from_str::<JournalEvent>(&line) {
                Ok(event) => out.push(event),
                Err(_) => break,
            }
        }
        Ok(out)
    }

    /// True iff some `begin` has no matching `end` (§4.G, §8 property 12).
    pub fn has_incomplete(&self) -> WeaveResult<bool> {
        Ok(self.incomplete_op()?.is_some())
    }

    pub fn incomplete_op(&self) -> WeaveResult<Option<IncompleteOp>> {
        let events = self.read_events()?;
        let mut begins: Vec<(String, String)> = Vec::new();
        let mut ended: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut steps_by_op: std::collections::HashMap<String, Vec<(u32, String, StepStatus)>> = std::collections::HashMap::new();

        for event in &events {
            match event {
                JournalEvent::Begin { op_id, op, .. } => begins.push((op_id.clone(), op.clone())),
                JournalEvent::End { op_id, .. } => {
                    ended.insert(op_id.clone());
                }
                JournalEvent::Step { op_id, step, action, status, .. } => {
                    steps_by_op.entry(op_id.clone()).or_default().push((*step, action.clone(), *status));
                }
            }
        }

        for (op_id, op) in begins {
            if ended.contains(&op_id) {
                continue;
            }
            let steps = steps_by_op.remove(&op_id).unwrap_or_default();
            let completed_steps: Vec<u32> = steps.iter().filter(|(_, _, s)| *s == StepStatus::Done).map(|(n, _, _)| *n).collect();
            let pending_action = steps
                .iter()
                .filter(|(_, _, s)| *s == StepStatus::Pending)
                .max_by_key(|(n, _, _)| *n)
                .map(|(_, a, _)| a.clone());
            return Ok(Some(IncompleteOp { op_id, op, completed_steps, pending_action }));
        }
        Ok(None)
    }

    /// Truncates the file when no incomplete op remains; otherwise keeps
    /// only the incomplete op's events (§4.G `clean`).
    pub fn clean(&self) -> WeaveResult<()> {
        let incomplete = self.incomplete_op()?;
        match incomplete {
            None => {
                if self.path.exists() {
                    std::fs::remove_file(&self.path).map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
                }
                Ok(())
            }
            Some(op) => {
                let events = self.read_events()?;
                let kept: Vec<&JournalEvent> = events
                    .iter()
                    .filter(|e| match e {
                        JournalEvent::Begin { op_id, .. } => op_id == &op.op_id,
                        JournalEvent::Step { op_id, .. } => op_id == &op.op_id,
                        JournalEvent::End { op_id, .. } => op_id == &op.op_id,
                    })
                    .collect();
                let mut out = String::new();
                for e in kept {
                    out.push_str(&serde_json::to_string(e)?);
                    out.push('\n');
                }
                std::fs::write(&self.path, out).map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
                Ok(())
            }
        }
    }
}

/// RAII-style helper: wraps a sequence of named steps in begin/end, marking
/// each as pending-then-done, and leaves the journal replayable on an early
/// return. Suppresses `auto_sync` for the duration via the runtime's
/// reentry guard (§4.G / §9 redesign).
pub fn run_journaled_op<F>(
    journal: &Journal,
    runtime: &crate::runtime::Runtime,
    op: &str,
    args: Value,
    steps: &[&str],
    mut run_step: F,
) -> WeaveResult<()>
where
    F: FnMut(u32, &str) -> WeaveResult<()>,
{
    let op_id = crate::id::NodeId::generate().to_string();
    let _guard = runtime.enter_journal();
    journal.begin(&op_id, op, args)?;
    for (i, action) in steps.iter().enumerate() {
        let step = (i + 1) as u32;
        journal.step(&op_id, step, action, StepStatus::Pending, None)?;
        run_step(step, action)?;
        journal.complete(&op_id, step, action)?;
    }
    journal.end(&op_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_state_has_no_incomplete_op() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        assert!(!journal.has_incomplete().unwrap());
    }

    #[test]
    fn crash_between_steps_is_detected_and_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        journal.begin("op1", "ship", json!({"id": "wv-aaaa"})).unwrap();
        journal.step("op1", 1, "done", StepStatus::Pending, None).unwrap();
        journal.complete("op1", 1, "done").unwrap();
        journal.step("op1", 2, "sync", StepStatus::Pending, None).unwrap();
        // crash: no `end`, no completion of step 2

        let incomplete = journal.incomplete_op().unwrap().unwrap();
        assert_eq!(incomplete.op, "ship");
        assert_eq!(incomplete.completed_steps, vec![1]);
        assert_eq!(incomplete.pending_action.as_deref(), Some("sync"));
    }

    #[test]
    fn clean_truncates_file_when_op_completed() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        journal.begin("op1", "sync", json!({})).unwrap();
        journal.end("op1").unwrap();
        journal.clean().unwrap();
        assert!(!journal.has_incomplete().unwrap());
        assert!(!journal.path().exists());
    }

    #[test]
    fn run_journaled_op_wraps_all_steps() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        let runtime = crate::runtime::Runtime::from_env();
        let mut log = Vec::new();
        run_journaled_op(&journal, &runtime, "sync", json!({}), &["dump", "commit"], |_step, action| {
            log.push(action.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(log, vec!["dump", "commit"]);
        assert!(!journal.has_incomplete().unwrap());
    }
}
