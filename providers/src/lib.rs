//! Reasoning backends for Reverie.
//!
//! [`ReasoningBackend`] is the seam the worker loop calls through. The
//! in-tree implementation is [`OllamaClient`]; the engine adds a
//! bridge-backed one.

mod error;
mod ollama;
pub mod retry;

use std::future::Future;

pub use error::BackendError;
pub use ollama::{DEFAULT_BASE_URL, OllamaClient, OllamaConfig};

/// One generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    /// Output budget in tokens.
    pub max_tokens: u32,
}

/// Something that turns a prompt into text.
///
/// An empty string is a valid answer. Implementations do not enforce the
/// caller's deadline; the worker wraps each call in its own timeout.
pub trait ReasoningBackend: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    fn generate(
        &self,
        request: GenerateRequest<'_>,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;
}
