//! [`ReasoningBackend`] over a [`ModelBridge`] subprocess.
//!
//! Each call sends one `prompt` request carrying `model` and `max_tokens`
//! and returns the reply's `response` text. A hung or dead child is killed
//! and relaunched; if it cannot be relaunched the error is fatal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use reverie_bridge::{BridgeConfig, BridgeError, BridgeRequest, BridgeStatus, ModelBridge};
use reverie_providers::{BackendError, GenerateRequest, ReasoningBackend};

/// Request kind answered with the raw completion of `content`.
pub const PROMPT_KIND: &str = "prompt";

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(120);

pub struct BridgeBackend {
    bridge: Mutex<ModelBridge>,
    reply_timeout: Duration,
    next_request: AtomicU64,
}

impl BridgeBackend {
    /// The subprocess is launched lazily by the first call.
    #[must_use]
    pub fn new(config: BridgeConfig, reply_timeout: Duration) -> Self {
        Self {
            bridge: Mutex::new(ModelBridge::new(config)),
            reply_timeout,
            next_request: AtomicU64::new(1),
        }
    }

    pub async fn status(&self) -> BridgeStatus {
        self.bridge.lock().await.status()
    }

    pub async fn stop(&self) {
        self.bridge.lock().await.stop().await;
    }
}

impl ReasoningBackend for BridgeBackend {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, BackendError> {
        let mut bridge = self.bridge.lock().await;
        ensure_ready(&mut bridge).await?;

        let mut extra = serde_json::Map::new();
        extra.insert("model".to_string(), request.model.into());
        extra.insert("max_tokens".to_string(), request.max_tokens.into());
        let id = format!("req-{}", self.next_request.fetch_add(1, Ordering::Relaxed));
        let message = BridgeRequest::new(id, PROMPT_KIND, request.prompt).with_extra(extra);

        match bridge.request(&message, self.reply_timeout).await {
            Ok(reply) if reply.is_error() => Err(BackendError::Rejected(
                reply
                    .error
                    .unwrap_or_else(|| "bridge reported an error".to_string()),
            )),
            Ok(reply) => Ok(reply.response.or(reply.insight).unwrap_or_default()),
            Err(
                e @ (BridgeError::ResponseTimeout(_)
                | BridgeError::ProcessExited
                | BridgeError::Write(_)),
            ) => {
                tracing::warn!(command = %bridge.config().command, "Bridge call failed: {e}");
                bridge.restart().await.map_err(fatal)?;
                Err(match e {
                    BridgeError::ResponseTimeout(timeout) => BackendError::Timeout(timeout),
                    other => BackendError::Unavailable(other.to_string()),
                })
            }
            Err(e) => Err(BackendError::Unavailable(e.to_string())),
        }
    }
}

/// Start the bridge, or replace a child that died or still owes a reply to
/// an abandoned call.
async fn ensure_ready(bridge: &mut ModelBridge) -> Result<(), BackendError> {
    if !bridge.is_running() {
        return bridge.start().await.map_err(fatal);
    }
    if bridge.awaiting_reply() || !bridge.is_alive() {
        bridge.restart().await.map_err(fatal)?;
    }
    Ok(())
}

fn fatal(error: BridgeError) -> BackendError {
    BackendError::Fatal(format!("bridge unavailable: {error}"))
}
