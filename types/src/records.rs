//! Derived records attached to completed thoughts, and store summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, InsightId, ThoughtId};
use crate::thought::{ThoughtStatus, now_epoch_secs};

/// An extracted observation tied to a completed thought.
///
/// `significance` is an advisory ranking score; it never gates persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: InsightId,
    pub thought_id: ThoughtId,
    pub text: String,
    pub significance: f64,
    pub created_at: f64,
}

impl Insight {
    #[must_use]
    pub fn new(thought_id: ThoughtId, text: impl Into<String>, significance: f64) -> Self {
        Self {
            id: InsightId::generate(),
            thought_id,
            text: text.into(),
            significance,
            created_at: now_epoch_secs(),
        }
    }
}

/// A lexical-overlap relationship between two completed thoughts.
///
/// `thought_id_1` is the subject whose token set normalises `strength`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub thought_id_1: ThoughtId,
    pub thought_id_2: ThoughtId,
    #[serde(rename = "type")]
    pub connection_type: String,
    pub strength: f64,
    pub description: String,
    pub created_at: f64,
}

/// Per-status aggregate of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusCount {
    pub count: u64,
    pub avg_priority: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusSummary {
    pub by_status: BTreeMap<ThoughtStatus, StatusCount>,
}

impl StatusSummary {
    #[must_use]
    pub fn count(&self, status: ThoughtStatus) -> u64 {
        self.by_status.get(&status).map_or(0, |entry| entry.count)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.by_status.values().map(|entry| entry.count).sum()
    }
}
