//! Thought lifecycle types.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::ThoughtId;
use crate::result::ThoughtResult;

/// Upper bound on the follow-up chain depth of a thought.
pub const MAX_ITERATIONS: u32 = 3;

/// Context attached to a thought by its producer. Opaque to the engine.
pub type ThoughtContext = serde_json::Map<String, serde_json::Value>;

/// Current wall-clock time as real-valued epoch seconds.
#[must_use]
pub fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Kind of delegated work. Drives prompt selection and model routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtType {
    Problem,
    Design,
    Analysis,
    Connection,
    Exploration,
    #[default]
    General,
}

impl ThoughtType {
    pub const ALL: [ThoughtType; 6] = [
        ThoughtType::Problem,
        ThoughtType::Design,
        ThoughtType::Analysis,
        ThoughtType::Connection,
        ThoughtType::Exploration,
        ThoughtType::General,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ThoughtType::Problem => "problem",
            ThoughtType::Design => "design",
            ThoughtType::Analysis => "analysis",
            ThoughtType::Connection => "connection",
            ThoughtType::Exploration => "exploration",
            ThoughtType::General => "general",
        }
    }

    /// Strict parse of a canonical label.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == lower)
    }

    /// Boundary parse: unknown labels (e.g. "pattern", "question") become
    /// [`ThoughtType::General`].
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_default()
    }

    /// Problem, design and analysis work goes to the heavier reasoning model.
    #[must_use]
    pub const fn needs_deep_reasoning(self) -> bool {
        matches!(
            self,
            ThoughtType::Problem | ThoughtType::Design | ThoughtType::Analysis
        )
    }
}

impl fmt::Display for ThoughtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown thought status '{0}'")]
pub struct StatusParseError(String);

/// Lifecycle state of a thought.
///
/// Transitions are monotonic: `queued -> processing -> {completed, failed}`,
/// and a finished thought may later be archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Archived,
}

impl ThoughtStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ThoughtStatus::Queued => "queued",
            ThoughtStatus::Processing => "processing",
            ThoughtStatus::Completed => "completed",
            ThoughtStatus::Failed => "failed",
            ThoughtStatus::Archived => "archived",
        }
    }

    /// Whether a stored thought in `self` may be rewritten with `next`.
    ///
    /// Rewriting the same status is allowed so results can be re-persisted.
    #[must_use]
    pub const fn can_transition_to(self, next: ThoughtStatus) -> bool {
        matches!(
            (self, next),
            (ThoughtStatus::Queued, ThoughtStatus::Queued | ThoughtStatus::Processing)
                | (
                    ThoughtStatus::Processing,
                    ThoughtStatus::Processing | ThoughtStatus::Completed | ThoughtStatus::Failed
                )
                | (ThoughtStatus::Completed, ThoughtStatus::Completed | ThoughtStatus::Archived)
                | (ThoughtStatus::Failed, ThoughtStatus::Failed | ThoughtStatus::Archived)
                | (ThoughtStatus::Archived, ThoughtStatus::Archived)
        )
    }
}

impl fmt::Display for ThoughtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThoughtStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ThoughtStatus::Queued),
            "processing" => Ok(ThoughtStatus::Processing),
            "completed" => Ok(ThoughtStatus::Completed),
            "failed" => Ok(ThoughtStatus::Failed),
            "archived" => Ok(ThoughtStatus::Archived),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("priority {0} is outside 1..=10")]
pub struct PriorityError(pub i64);

/// Scheduling priority, 1 (background) through 10 (urgent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Priority(u8);

impl Priority {
    pub const BACKGROUND: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const HIGH: Priority = Priority(8);
    pub const URGENT: Priority = Priority(10);

    pub fn new(value: i64) -> Result<Self, PriorityError> {
        if (1..=10).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(PriorityError(value))
        }
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Urgent thoughts are dispatched out of band instead of waiting for a poll.
    #[must_use]
    pub const fn is_urgent(self) -> bool {
        self.0 >= Self::URGENT.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<i64> for Priority {
    type Error = PriorityError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for i64 {
    fn from(value: Priority) -> Self {
        i64::from(value.0)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of delegated work and its full persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub id: ThoughtId,
    #[serde(rename = "type")]
    pub thought_type: ThoughtType,
    pub content: String,
    #[serde(default)]
    pub context: ThoughtContext,
    pub priority: Priority,
    pub status: ThoughtStatus,
    pub created_at: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub result: Option<ThoughtResult>,
    pub model_used: Option<String>,
    pub iterations: u32,
    pub parent_id: Option<ThoughtId>,
}

impl Thought {
    /// A freshly queued thought with a random id.
    #[must_use]
    pub fn queued(
        thought_type: ThoughtType,
        content: impl Into<String>,
        context: ThoughtContext,
        priority: Priority,
    ) -> Self {
        Self {
            id: ThoughtId::generate(),
            thought_type,
            content: content.into(),
            context,
            priority,
            status: ThoughtStatus::Queued,
            created_at: now_epoch_secs(),
            started_at: None,
            completed_at: None,
            result: None,
            model_used: None,
            iterations: 0,
            parent_id: None,
        }
    }

    /// Follow-up thought chained to `self`, or `None` once the chain is at
    /// [`MAX_ITERATIONS`].
    #[must_use]
    pub fn follow_up(&self, content: impl Into<String>, context: ThoughtContext) -> Option<Self> {
        if self.iterations >= MAX_ITERATIONS {
            return None;
        }
        let mut next = Self::queued(self.thought_type, content, context, self.priority);
        next.parent_id = Some(self.id.clone());
        next.iterations = (self.iterations + 1).min(MAX_ITERATIONS);
        Some(next)
    }
}
