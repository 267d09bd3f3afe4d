//! Run command implementation for Lunar CLI.
//!
//! Executes a script once, streaming its output, and maps the way it ended
//! to the process exit code.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use lunar_core::{EngineConfig, EngineEvent, RunOutcome, ScriptEngine, search_dirs_from_env};

use crate::colors;
use crate::output::{EventPrinter, OutputMode};

/// Exit code when the script raised an error or failed to parse.
pub const EXIT_FAILED: u8 = 1;
/// Exit code when the engine itself failed (channel, thread, shutdown).
pub const EXIT_ENGINE_FAILURE: u8 = 2;
/// Exit code after a stop requested with Ctrl+C.
pub const EXIT_CANCELLED: u8 = 130;

/// Options of `lunar run`.
pub struct RunOptions<'a> {
    pub script: &'a str,
    pub include: &'a [String],
    pub json: bool,
    pub lines: bool,
    pub join_timeout: Option<f64>,
}

/// Execute a script.
pub async fn execute(options: RunOptions<'_>) -> anyhow::Result<ExitCode> {
    let path = Path::new(options.script);
    if !path.exists() {
        anyhow::bail!("Script not found: {}", options.script);
    }
    let source = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let mut config = EngineConfig::default();
    if let Some(secs) = options.join_timeout {
        let timeout = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("Invalid join timeout: {}", secs))?;
        config = config.with_join_timeout(timeout);
    }

    let printer = EventPrinter::new(if options.json {
        OutputMode::Json
    } else {
        OutputMode::Text {
            lines: options.lines,
        }
    });

    let (mut engine, mut events) = ScriptEngine::new(config)?;
    engine.set_search_dirs(search_dirs(path, options.include))?;
    engine.set_script(source)?;
    tracing::debug!("search path: {}", engine.payload().package_path_prefix());

    engine.start()?;

    let mut interrupted = false;
    let outcome = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    anyhow::bail!("engine event queue closed before the script stopped");
                };
                printer.print(&event)?;
                if let EngineEvent::Stopped { outcome } = event {
                    break outcome;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                if interrupted {
                    colors::flush_stdout();
                    std::process::exit(i32::from(EXIT_CANCELLED));
                }
                interrupted = true;
                if !printer.is_json() {
                    eprintln!(
                        "\n{}Stopping... (Ctrl+C again to exit){}",
                        colors::YELLOW,
                        colors::RESET
                    );
                }
                engine.stop();
            }
        }
    };

    engine.shutdown().await?;
    Ok(ExitCode::from(exit_code(outcome)))
}

/// Module search directories for a script.
///
/// `-I` directories first, then the script's own directory, then the
/// entries of `LUNAR_PATH`.
pub fn search_dirs(script: &Path, include: &[String]) -> Vec<String> {
    let mut dirs = include.to_vec();
    dirs.push(script_dir(script));
    dirs.extend(search_dirs_from_env());
    dirs
}

fn script_dir(script: &Path) -> String {
    match script.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    }
}

pub fn exit_code(outcome: RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Finished => 0,
        RunOutcome::Failed => EXIT_FAILED,
        RunOutcome::Cancelled => EXIT_CANCELLED,
        RunOutcome::ChannelFailure | RunOutcome::SpawnFailure => EXIT_ENGINE_FAILURE,
    }
}
