use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge command '{command}' not found: {source}")]
    CommandNotFound {
        command: String,
        source: which::Error,
    },
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("bridge process did not signal ready within {timeout:?}")]
    StartupTimeout { timeout: Duration },
    #[error("bridge is not running")]
    NotRunning,
    #[error("a request is already awaiting its reply")]
    RequestInFlight,
    #[error("failed to write to bridge: {0}")]
    Write(#[source] std::io::Error),
    #[error("no reply from bridge within {0:?}")]
    ResponseTimeout(Duration),
    #[error("bridge process exited")]
    ProcessExited,
    #[error("failed to open bridge error log {path}: {source}")]
    ErrorLog {
        path: PathBuf,
        source: std::io::Error,
    },
}
