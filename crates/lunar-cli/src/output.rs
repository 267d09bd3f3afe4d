//! Rendering of engine events for the terminal.
//!
//! Script output goes to stdout untouched, so `lunar run script.lua > out`
//! captures exactly what the script printed. Everything else goes to stderr.

use lunar_core::{EngineEvent, RunOutcome};

use crate::colors;

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Script output verbatim; with `lines`, lifecycle and line reports on stderr.
    Text { lines: bool },
    /// One JSON object per event on stdout.
    Json,
}

/// Prints engine events according to an [`OutputMode`].
pub struct EventPrinter {
    mode: OutputMode,
}

impl EventPrinter {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    pub fn print(&self, event: &EngineEvent) -> anyhow::Result<()> {
        match self.mode {
            OutputMode::Json => {
                println!("{}", serde_json::to_string(event)?);
                colors::flush_stdout();
            }
            OutputMode::Text { lines } => print_text(event, lines),
        }
        Ok(())
    }
}

fn print_text(event: &EngineEvent, lines: bool) {
    match event {
        EngineEvent::Output(chunk) => {
            print!("{}", chunk);
            colors::flush_stdout();
        }
        EngineEvent::Started if lines => {
            eprintln!("{}started{}", colors::DIM, colors::RESET);
        }
        EngineEvent::CurrentLine(line) if lines => {
            eprintln!("{}line {}{}", colors::DIM, line, colors::RESET);
        }
        EngineEvent::Stopped { outcome } => print_stopped(*outcome, lines),
        _ => {}
    }
}

fn print_stopped(outcome: RunOutcome, lines: bool) {
    match outcome {
        RunOutcome::Cancelled => {
            eprintln!("{}Script stopped.{}", colors::YELLOW, colors::RESET);
        }
        RunOutcome::Finished if lines => {
            eprintln!("{}finished{}", colors::GREEN, colors::RESET);
        }
        RunOutcome::Failed if lines => {
            eprintln!("{}failed{}", colors::RED, colors::RESET);
        }
        _ => {}
    }
}
