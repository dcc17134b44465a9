use std::path::PathBuf;
use std::time::Duration;

use crate::codec::MAX_LINE_BYTES;

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
pub const DEFAULT_RESTART_PAUSE: Duration = Duration::from_millis(500);
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_ERROR_TAIL: usize = 50;

/// How to launch and supervise one bridge subprocess.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Program name or path; bare names are resolved on `PATH`.
    pub command: String,
    pub args: Vec<String>,
    pub startup_timeout: Duration,
    pub shutdown_grace: Duration,
    pub restart_pause: Duration,
    /// Replies held before the reader stops draining the child's stdout.
    pub buffer_capacity: usize,
    /// Error-channel lines kept in memory for `status`.
    pub error_tail: usize,
    /// Append-only copy of the error channel.
    pub error_log: Option<PathBuf>,
    pub max_line_bytes: usize,
}

impl BridgeConfig {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            restart_pause: DEFAULT_RESTART_PAUSE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            error_tail: DEFAULT_ERROR_TAIL,
            error_log: None,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}
