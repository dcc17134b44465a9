//! Core domain types for Reverie.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod ids;
mod records;
mod result;
mod thought;

pub use ids::{ConnectionId, InsightId, ThoughtId};
pub use records::{Connection, Insight, StatusCount, StatusSummary};
pub use result::{ConnectionSummary, ParsedResponse, ThoughtResult};
pub use thought::{
    MAX_ITERATIONS, Priority, PriorityError, StatusParseError, Thought, ThoughtContext,
    ThoughtStatus, ThoughtType, now_epoch_secs,
};
