//! Durable storage for Reverie.
//!
//! A single SQLite file holds the thought queue together with the insights
//! and connections derived from completed thoughts.

mod error;
mod sqlite_util;
mod thought_store;

pub use error::StoreError;
pub use thought_store::{CompletedThought, CompletionRecord, ThoughtStore};
