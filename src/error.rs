// src/error.rs
//
// =============================================================================
// WEAVE: ERROR KINDS (Component A)
// =============================================================================
//
// A typed error enum so callers (CLI dispatcher, RPC adaptor) can branch on
// *kind* instead of matching strings. Every fallible core operation returns
// `Result<T, WeaveError>`; `anyhow::Error` is still used internally for
// `.context(...)` chains and is folded into `WeaveError::Persistence` /
// `WeaveError::ExternalTool` at the boundary where it originates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeaveError {
    /// Malformed id, alias, edge type, status, JSON, age spec, weight, or a
    /// missing required argument. Never propagates past the command that
    /// raised it.
    #[error("{0}")]
    InvalidInput(String),

    /// Referenced node or alias does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate alias, duplicate near-text on `add` without `--force`,
    /// self-block, or immediate counter-cycle on `block`.
    #[error("{0}")]
    Conflict(String),

    /// Ghost edges, orphan spike, invalid statuses, node-count drop on
    /// load. Reported, never fatal — callers that see this still commit
    /// whatever write succeeded.
    #[error("{0}")]
    IntegrityWarning(String),

    /// Empty dump, corrupt state.sql, DB inaccessible, integrity check
    /// failed. Aborts the persistence op; prior state is preserved.
    #[error("{0}")]
    Persistence(#[source] anyhow::Error),

    /// Issue-tracker or VCS command failed. Always reported, never fatal
    /// for core writes.
    #[error("{0}")]
    ExternalTool(String),

    /// A journal-wrapped op (ship/sync/delete) crashed between steps;
    /// surfaced by `recover`.
    #[error("{0}")]
    Interrupted(String),
}

pub type WeaveResult<T> = Result<T, WeaveError>;

impl WeaveError {
    /// Whether this error kind should cause a non-zero process exit.
    /// IntegrityWarning and ExternalTool are logged but never fail a
    /// command on their own (§7 propagation policy).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            WeaveError::IntegrityWarning(_) | WeaveError::ExternalTool(_)
        )
    }

    /// A remedial suggestion to append to the stderr line, when one exists.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            WeaveError::IntegrityWarning(msg) if msg.contains("ghost") => {
                Some("Run `wv clean-ghosts`")
            }
            WeaveError::IntegrityWarning(msg) if msg.contains("FTS") || msg.contains("fts") => {
                Some("Run `wv reindex` to rebuild the full-text index")
            }
            WeaveError::Conflict(msg) if msg.contains("duplicate") || msg.contains("similar") => {
                Some("Use --force to override")
            }
            WeaveError::Persistence(_) => Some("Previous state was preserved as a .bak file"),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for WeaveError {
    fn from(err: anyhow::Error) -> Self {
        WeaveError::Persistence(err)
    }
}

impl From<rusqlite::Error> for WeaveError {
    fn from(err: rusqlite::Error) -> Self {
        WeaveError::Persistence(err.into())
    }
}

impl From<serde_json::Error> for WeaveError {
    fn from(err: serde_json::Error) -> Self {
        WeaveError::InvalidInput(format!("invalid JSON: {err}"))
    }
}
