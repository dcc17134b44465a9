//! Subprocess bridge for Reverie.
//!
//! A [`ModelBridge`] owns one long-lived reasoning process, performs the
//! ready handshake, writes requests as JSON lines on its stdin and buffers
//! JSON replies read from its stdout.

mod bridge;
mod codec;
mod config;
mod error;
mod wire;

pub use bridge::{BridgeStatus, ModelBridge};
pub use codec::{Frame, LineReader, LineWriter, MAX_LINE_BYTES, MalformedMessage};
pub use config::{
    BridgeConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_ERROR_TAIL, DEFAULT_RESTART_PAUSE,
    DEFAULT_SHUTDOWN_GRACE, DEFAULT_STARTUP_TIMEOUT,
};
pub use error::BridgeError;
pub use wire::{BridgeReply, BridgeRequest, STATUS_ERROR, STATUS_OK, STATUS_READY};
