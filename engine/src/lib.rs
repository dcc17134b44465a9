//! Thought processing engine for Reverie.
//!
//! Workers claim thoughts from the store, reason about them through a
//! [`ReasoningBackend`](reverie_providers::ReasoningBackend), extract
//! insights and connections, and persist the result. [`Subconscious`] is
//! the facade producers and observers use.

#![allow(clippy::missing_errors_doc)]

pub mod analysis;
mod bridge_backend;
mod config;
pub mod connections;
mod contemplation;
mod pool;
mod prompts;
mod subconscious;
mod worker;

pub use bridge_backend::{BridgeBackend, DEFAULT_REPLY_TIMEOUT, PROMPT_KIND};
pub use config::{
    BackendMode, BackendSettings, CONFIG_ENV, ConfigError, DEFAULT_BRIDGE_COMMAND, ReverieConfig,
    Settings, config_path, data_dir, expand_env_vars,
};
pub use contemplation::{
    CONTEMPLATION_MAX_TOKENS, ContemplationLoop, ContemplationStats, OFFLINE_FALLBACK,
    extract_insight, reflection_prompt,
};
pub use pool::{DEFAULT_WORKERS, HealthBoard, WorkerHealth, WorkerPool};
pub use prompts::build_prompt;
pub use subconscious::{DelegateError, Subconscious, SubconsciousStatus};
pub use worker::{
    DEFAULT_POLL_INTERVAL, FAST_MODEL, ModelTier, REASONING_MODEL, Worker, WorkerConfig,
    WorkerError,
};
