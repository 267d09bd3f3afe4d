//! Watch command implementation for Lunar CLI.
//!
//! Runs a script and re-runs it whenever the file changes. A run still in
//! progress is stopped, and its end awaited, before the new one starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use lunar_core::{EngineConfig, EngineEvents, ScriptEngine};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;

use crate::colors;
use crate::output::{EventPrinter, OutputMode};
use crate::run::search_dirs;

/// Quiet period before a burst of file events is reported.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// File change event.
#[derive(Debug, Clone)]
pub enum FileEvent {
    /// File was written or recreated.
    Modified(PathBuf),
    /// File was removed.
    Removed(PathBuf),
}

/// Watches a single `.lua` file.
pub struct FileWatcher {
    /// Debouncer handle (kept alive to maintain watcher).
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl FileWatcher {
    /// Watch `path`, which must be an existing, canonical file path.
    ///
    /// The parent directory is watched so that editors replacing the file
    /// on save are still observed.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let target = path.to_path_buf();
        let watch_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!("file watcher error: {}", e);
                    return;
                }
            };

            for event in events {
                let event_path = &event.path;
                if event_path.extension().is_none_or(|ext| ext != "lua") || *event_path != target {
                    continue;
                }

                let file_event = if event_path.exists() {
                    FileEvent::Modified(event_path.clone())
                } else {
                    FileEvent::Removed(event_path.clone())
                };
                let _ = tx.send(file_event);
            }
        })
        .context("Failed to create file watcher")?;

        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", watch_dir.display()))?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Receive the next file event.
    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.rx.recv().await
    }
}

/// Execute the watch command.
pub async fn execute(
    script: &str,
    include: &[String],
    json: bool,
    clear_screen: bool,
) -> anyhow::Result<()> {
    let path = Path::new(script);
    if !path.exists() {
        anyhow::bail!("Script not found: {}", script);
    }
    let abs_path = path.canonicalize()?;

    let printer = EventPrinter::new(if json {
        OutputMode::Json
    } else {
        OutputMode::Text { lines: false }
    });

    if !json {
        print_header(&abs_path);
    }

    let (mut engine, mut events) = ScriptEngine::new(EngineConfig::default())?;
    engine.set_search_dirs(search_dirs(&abs_path, include))?;

    let mut watcher = FileWatcher::new(&abs_path)?;

    if clear_screen && !json {
        clear_terminal();
    }
    load_and_start(&mut engine, &abs_path)?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                printer.print(&event)?;
            }
            change = watcher.recv() => match change {
                Some(FileEvent::Modified(_)) => {
                    restart(&mut engine, &mut events, &printer, &abs_path, clear_screen).await?;
                }
                Some(FileEvent::Removed(path)) => {
                    eprintln!(
                        "\n{}Warning:{} Script file removed: {}",
                        colors::YELLOW,
                        colors::RESET,
                        path.display()
                    );
                }
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                break;
            }
        }
    }

    engine.shutdown().await?;
    while let Some(event) = events.try_recv() {
        printer.print(&event)?;
    }
    Ok(())
}

/// Stop the current run, wait for its end, then start the new version.
async fn restart(
    engine: &mut ScriptEngine,
    events: &mut EngineEvents,
    printer: &EventPrinter,
    path: &Path,
    clear_screen: bool,
) -> anyhow::Result<()> {
    if engine.is_running() {
        if let Err(e) = engine.shutdown().await {
            eprintln!("{}Warning:{} {}", colors::YELLOW, colors::RESET, e.with_hint());
        }
    }
    // Whatever the previous run still had queued belongs before the new run.
    while let Some(event) = events.try_recv() {
        printer.print(&event)?;
    }

    if printer.is_json() {
        tracing::debug!("file changed, re-running");
    } else {
        if clear_screen {
            clear_terminal();
        }
        eprintln!(
            "{}File changed, re-running...{}",
            colors::YELLOW,
            colors::RESET
        );
    }

    if let Err(e) = load_and_start(engine, path) {
        eprintln!("{}Error:{} {:#}", colors::RED, colors::RESET, e);
    }
    Ok(())
}

fn load_and_start(engine: &mut ScriptEngine, path: &Path) -> anyhow::Result<()> {
    let source = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    engine.set_script(source)?;
    engine.start()?;
    Ok(())
}

fn print_header(path: &Path) {
    let name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    eprintln!(
        "\n{}Lunar Watch{} - {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        name,
        colors::RESET
    );
    eprintln!("{}", "─".repeat(50));
    eprintln!(
        "{}Watching for changes... (Ctrl+C to stop){}",
        colors::DIM,
        colors::RESET
    );
    eprintln!();
}

/// Clear the terminal screen.
fn clear_terminal() {
    print!("\x1B[2J\x1B[1;1H");
    colors::flush_stdout();
}
