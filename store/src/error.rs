use std::path::PathBuf;

use reverie_types::{ThoughtId, ThoughtStatus};

/// Failures of the thought store.
///
/// Every variant is an operator-visible condition: the store never swallows
/// a persistence error, because losing thought state is not recoverable.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to prepare database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        source: serde_json::Error,
    },
    #[error("thought {0} already exists")]
    DuplicateId(ThoughtId),
    #[error("thought {0} not found")]
    NotFound(ThoughtId),
    #[error("thought {id}: illegal status transition {from} -> {to}")]
    InvalidTransition {
        id: ThoughtId,
        from: ThoughtStatus,
        to: ThoughtStatus,
    },
    #[error("thought {0} must be completed before insights or connections are recorded")]
    NotCompleted(ThoughtId),
    #[error("thought {id}: {iterations} iterations exceeds the limit")]
    IterationLimit { id: ThoughtId, iterations: u32 },
    #[error("corrupt row for thought {id}: {reason}")]
    Corrupt { id: String, reason: String },
}
