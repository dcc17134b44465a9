use std::time::Duration;

/// Failure of a reasoning backend call.
///
/// Everything except [`BackendError::Fatal`] is local to one thought: the
/// caller records the thought as failed and moves on.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("reasoning backend unavailable: {0}")]
    Unavailable(String),
    #[error("reasoning backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unexpected reasoning backend response: {0}")]
    Decode(String),
    #[error("reasoning backend did not answer within {0:?}")]
    Timeout(Duration),
    /// The backend reported an error for this request.
    #[error("reasoning backend rejected the request: {0}")]
    Rejected(String),
    /// The backend itself is broken and cannot be recovered in-process.
    #[error("reasoning backend failed permanently: {0}")]
    Fatal(String),
}

impl BackendError {
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
