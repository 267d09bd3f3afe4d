//! Script execution.
//!
//! A run goes through these pieces:
//!
//! - [`ScriptEngine`] lives on the controller side. It owns the script and
//!   its search directories, spawns one worker thread per run and turns
//!   the output channel into `Output` events.
//! - The worker thread creates a fresh interpreter, redirects its standard
//!   output into the run's channel and executes the script.
//! - The execution hook runs before every line. It reports the line and
//!   aborts the script once the [`CancellationToken`] is set.

mod engine;
mod hook;
mod stdio;
mod token;
mod worker;

pub use engine::ScriptEngine;
pub use token::CancellationToken;
pub use worker::EngineState;
