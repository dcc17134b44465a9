//! Child side of the bridge protocol.
//!
//! Reads thoughts as JSON lines, reflects on each with the fast model and
//! answers one JSON line per thought. `prompt` requests are completed
//! verbatim and answered with the raw text.

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};

use reverie_bridge::{
    BridgeReply, Frame, LineReader, LineWriter, STATUS_ERROR, STATUS_OK, STATUS_READY,
};
use reverie_providers::{GenerateRequest, ReasoningBackend};
use reverie_types::now_epoch_secs;

use crate::bridge_backend::PROMPT_KIND;

pub const CONTEMPLATION_MAX_TOKENS: u32 = 150;

/// Answer used when the backend fails or says nothing.
pub const OFFLINE_FALLBACK: &str = "[Contemplation in progress - Ollama offline]";

const INSIGHT_INDICATORS: [&str; 5] = ["realize", "notice", "pattern", "interesting", "connect"];
const INSIGHT_THRESHOLD: u32 = 7;
const STATUS_EVERY: u64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContemplationStats {
    pub thoughts: u64,
    pub insights: u64,
    pub backend_failures: u64,
}

pub struct ContemplationLoop<B> {
    backend: B,
    model: String,
    stats: ContemplationStats,
}

impl<B: ReasoningBackend> ContemplationLoop<B> {
    pub fn new(backend: B, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            stats: ContemplationStats::default(),
        }
    }

    /// Announce readiness, then answer every thought until `input` closes.
    pub async fn run<R, W>(&mut self, input: R, output: W) -> std::io::Result<ContemplationStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = LineReader::new(input);
        let mut writer = LineWriter::new(output);
        writer
            .write_message(&serde_json::json!({ "status": STATUS_READY, "model": self.model }))
            .await?;
        tracing::info!(model = %self.model, "Contemplation loop ready");

        while let Some(frame) = reader.next_frame().await? {
            let message = match frame {
                Frame::Message(message) => message,
                Frame::Malformed(bad) => {
                    tracing::warn!("Skipping input line: {bad}");
                    continue;
                }
            };
            let reply = self.answer(&message).await;
            writer.write_message(&reply).await?;
        }

        tracing::info!(
            thoughts = self.stats.thoughts,
            insights = self.stats.insights,
            "Contemplation loop finished"
        );
        Ok(self.stats)
    }

    async fn answer(&mut self, message: &Map<String, Value>) -> BridgeReply {
        let thought_id = match message.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => format!("{:.3}", now_epoch_secs()),
        };
        let kind = message.get("type").and_then(Value::as_str).unwrap_or("general");
        let content = message.get("content").and_then(Value::as_str).unwrap_or("");

        if kind == PROMPT_KIND {
            return self.complete_prompt(thought_id, content, message).await;
        }

        let prompt = reflection_prompt(kind, content);
        let request = GenerateRequest {
            prompt: &prompt,
            model: &self.model,
            max_tokens: CONTEMPLATION_MAX_TOKENS,
        };
        let response = match self.backend.generate(request).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => OFFLINE_FALLBACK.to_string(),
            Err(e) => {
                tracing::debug!(thought_id = %thought_id, "Backend unavailable: {e}");
                self.stats.backend_failures += 1;
                OFFLINE_FALLBACK.to_string()
            }
        };

        let insight = extract_insight(kind, &response);
        self.stats.thoughts += 1;
        if insight.is_some() {
            self.stats.insights += 1;
        }
        if self.stats.thoughts % STATUS_EVERY == 0 {
            tracing::info!(
                thoughts = self.stats.thoughts,
                insights = self.stats.insights,
                "Contemplation progress"
            );
        }

        BridgeReply {
            status: STATUS_OK.to_string(),
            thought_id: Some(thought_id),
            has_insight: insight.is_some(),
            insight,
            response: Some(response),
            ..BridgeReply::default()
        }
    }

    async fn complete_prompt(
        &mut self,
        thought_id: String,
        prompt: &str,
        message: &Map<String, Value>,
    ) -> BridgeReply {
        let model = message
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model);
        let max_tokens = message
            .get("max_tokens")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(CONTEMPLATION_MAX_TOKENS);

        let request = GenerateRequest {
            prompt,
            model,
            max_tokens,
        };
        match self.backend.generate(request).await {
            Ok(text) => BridgeReply {
                status: STATUS_OK.to_string(),
                thought_id: Some(thought_id),
                response: Some(text),
                ..BridgeReply::default()
            },
            Err(e) => {
                self.stats.backend_failures += 1;
                BridgeReply {
                    status: STATUS_ERROR.to_string(),
                    thought_id: Some(thought_id),
                    error: Some(e.to_string()),
                    ..BridgeReply::default()
                }
            }
        }
    }
}

/// Short prompt for a thought kind.
#[must_use]
pub fn reflection_prompt(kind: &str, content: &str) -> String {
    match kind {
        "pattern" => format!("What pattern do you notice in: {content}\nPattern:"),
        "connection" => format!("What connects these ideas: {content}\nConnection:"),
        "question" => format!("What's interesting about: {content}\nInsight:"),
        _ => format!("Reflect on: {content}\nThought:"),
    }
}

/// The trimmed response when it reads as an insight: an indicator word,
/// plus enough length or a pattern thought to reach the threshold.
#[must_use]
pub fn extract_insight(kind: &str, response: &str) -> Option<String> {
    let lower = response.to_lowercase();
    if !INSIGHT_INDICATORS.iter().any(|word| lower.contains(word)) {
        return None;
    }
    let mut score = 5;
    if response.chars().count() > 100 {
        score += 2;
    }
    if kind == "pattern" {
        score += 1;
    }
    (score >= INSIGHT_THRESHOLD).then(|| response.trim().to_string())
}
