//! Messages exchanged with the reasoning subprocess.

use serde::{Deserialize, Serialize};

pub const STATUS_READY: &str = "ready";
pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";

/// One unit of work written to the child's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub timestamp: f64,
    /// Caller metadata merged into the top-level object.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BridgeRequest {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            content: content.into(),
            timestamp: reverie_types::now_epoch_secs(),
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, extra: serde_json::Map<String, serde_json::Value>) -> Self {
        self.extra = extra;
        self
    }
}

/// Any line the child writes to stdout.
///
/// The ready signal and the replies share this shape; only `status` is
/// required.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BridgeReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_id: Option<String>,
    #[serde(default)]
    pub insight: Option<String>,
    #[serde(default)]
    pub has_insight: bool,
    /// Raw backend text; present in the richer reply form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeReply {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == STATUS_READY
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == STATUS_ERROR
    }
}
