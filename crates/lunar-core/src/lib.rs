//! Core engine for Lunar managed Lua script execution.
//!
//! This crate provides:
//! - A script engine running each script on a dedicated worker thread
//! - Streamed capture of everything the script prints
//! - Cooperative cancellation checked before every executed source line
//! - Current-line reporting and a bounded, leak-tolerant shutdown

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod execute;
pub mod payload;

pub use config::{EngineConfig, SEARCH_PATH_ENV, search_dirs_from_env};
pub use error::{Error, Result};
pub use events::{EngineEvent, EngineEvents, RunOutcome};
pub use execute::{CancellationToken, EngineState, ScriptEngine};
pub use payload::ScriptPayload;
