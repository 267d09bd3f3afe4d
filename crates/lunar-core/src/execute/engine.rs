//! The script engine: start, stop and supervise worker runs.

use std::io;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::channel::{self, OutputReader, OutputWriter};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{self, EngineEvent, EngineEvents, EventSender, RunEvents, RunOutcome};
use crate::payload::ScriptPayload;

use super::token::CancellationToken;
use super::worker::{EngineState, SharedState, WorkerHandle, WorkerThread};

/// Interval between liveness checks in [`ScriptEngine::shutdown`].
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs Lua scripts on a dedicated worker thread.
///
/// The engine is owned and driven by one controller, which also owns the
/// [`EngineEvents`] receiver returned by [`ScriptEngine::new`]. Each
/// [`start`](ScriptEngine::start) creates a fresh interpreter on a new
/// worker thread; at most one worker is alive at a time.
///
/// ```text
/// controller                         worker thread
///     │ start() ──── spawn ─────────────► Started
///     │                                   print() ──► output channel ─┐
///     │ ◄──── Output(chunk) ── pump task ◄────────────────────────────┘
///     │ ◄──── CurrentLine(n) ──────────── line hook
///     │ stop() ── token ────────────────► hook raises, script unwinds
///     │ ◄──── Stopped { outcome } ─────── teardown
/// ```
///
/// Every run has its own cancellation token, state and event tag. A worker
/// abandoned by a timed-out shutdown stays cancelled and is silenced, so it
/// cannot disturb the runs started after it.
///
/// Prefer the async [`shutdown`](ScriptEngine::shutdown) before dropping the
/// engine. `Drop` blocks the calling thread; on a current-thread runtime that
/// starves the output pump, and a running worker then waits out the full
/// drain timeout before it stops.
pub struct ScriptEngine {
    config: EngineConfig,
    payload: ScriptPayload,
    /// State of the current or most recent run.
    state: SharedState,
    events: EventSender,
    runtime: Handle,
    launcher: Launcher,
    worker: Option<ActiveWorker>,
    leaked: usize,
}

/// A worker thread plus everything scoped to its run.
struct ActiveWorker {
    handle: WorkerHandle,
    pump: JoinHandle<()>,
    token: CancellationToken,
    events: RunEvents,
}

type OpenChannel = fn() -> io::Result<(OutputWriter, OutputReader)>;
type SpawnWorker =
    fn(&EngineConfig, WorkerThread, OutputWriter, mpsc::Receiver<()>) -> Result<WorkerHandle>;

/// OS resources acquired by `start`.
#[derive(Clone, Copy)]
struct Launcher {
    open_channel: OpenChannel,
    spawn_worker: SpawnWorker,
}

impl Default for Launcher {
    fn default() -> Self {
        Self {
            open_channel: channel::open,
            spawn_worker: WorkerHandle::spawn,
        }
    }
}

impl ScriptEngine {
    /// Create an engine bound to the current tokio runtime.
    ///
    /// Output forwarding runs as tasks on that runtime, so the controller's
    /// event loop must be a tokio runtime.
    pub fn new(config: EngineConfig) -> Result<(Self, EngineEvents)> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        let (events, rx) = events::channel();

        let engine = Self {
            config,
            payload: ScriptPayload::default(),
            state: SharedState::default(),
            events,
            runtime,
            launcher: Launcher::default(),
            worker: None,
            leaked: 0,
        };
        Ok((engine, rx))
    }

    /// Replace the script source.
    pub fn set_script(&mut self, text: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_idle("set the script")?;
        self.payload.set_source(text);
        Ok(())
    }

    /// Replace the module search directories; earlier entries win.
    pub fn set_search_dirs<I, S>(&mut self, dirs: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_idle("change search directories")?;
        self.payload
            .set_search_dirs(dirs.into_iter().map(Into::into).collect());
        Ok(())
    }

    /// Use a single module search directory.
    pub fn set_search_dir(&mut self, dir: impl Into<String>) -> Result<()> {
        self.set_search_dirs([dir.into()])
    }

    pub fn payload(&self) -> &ScriptPayload {
        &self.payload
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// Number of workers abandoned after failing to stop in time.
    pub fn leaked_workers(&self) -> usize {
        self.leaked
    }

    /// Check whether a worker is alive and has not announced its stop.
    ///
    /// A worker that already sent `Stopped` may still be unwinding its
    /// thread; it no longer counts as running and is joined on the next
    /// [`start`](ScriptEngine::start).
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.handle.is_alive())
            && self.state.get() != EngineState::Stopped
    }

    /// Start running the current script.
    ///
    /// Returns immediately; `Started` is announced by the worker. Calling
    /// this while a script runs does nothing.
    ///
    /// If the run cannot be launched, `Stopped` with a failure outcome is
    /// queued (without `Started`) and the error is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::debug!("start ignored: a script is already running");
            return Ok(());
        }

        if let Some(previous) = self.worker.take() {
            self.finish(previous)?;
        }

        let token = CancellationToken::new();
        let events = self.events.for_run();
        self.state = SharedState::new(EngineState::Starting);

        let opened = {
            let _guard = self.runtime.enter();
            (self.launcher.open_channel)()
        };
        let (writer, reader) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!("failed to open output channel: {}", e);
                return Err(self.fail_start(&events, RunOutcome::ChannelFailure, Error::Channel(e)));
            }
        };

        let (drained_tx, drained_rx) = mpsc::channel::<()>();
        let pump = self
            .runtime
            .spawn(pump_output(reader, events.clone(), drained_tx));

        let worker = WorkerThread {
            payload: self.payload.clone(),
            token: token.clone(),
            events: events.clone(),
            state: self.state.clone(),
            chunk_name: self.config.chunk_name.clone(),
            drain_timeout: self.config.drain_timeout,
        };

        let handle = match (self.launcher.spawn_worker)(&self.config, worker, writer, drained_rx) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("failed to spawn worker: {}", e);
                pump.abort();
                return Err(self.fail_start(&events, RunOutcome::SpawnFailure, e));
            }
        };

        tracing::debug!("worker spawned");
        self.worker = Some(ActiveWorker {
            handle,
            pump,
            token,
            events,
        });
        Ok(())
    }

    /// Ask the running script to stop at its next executed line.
    ///
    /// Never blocks. Does nothing when no script runs.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        if let Some(worker) = &self.worker {
            worker.token.cancel();
        }
        self.state.transition(
            &[EngineState::Starting, EngineState::Running],
            EngineState::StopRequested,
        );
        tracing::debug!("stop requested");
    }

    /// Stop the running script and wait for its worker to finish.
    ///
    /// Waits at most the configured join timeout without blocking the event
    /// loop. A worker that does not finish in time is abandoned.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stop();
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + self.config.join_timeout;
        while worker.handle.is_alive() {
            if Instant::now() >= deadline {
                return Err(self.abandon(worker));
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
        worker.handle.join()
    }

    /// Blocking variant of [`shutdown`](ScriptEngine::shutdown), used on drop.
    pub fn shutdown_blocking(&mut self) -> Result<()> {
        self.stop();
        match self.worker.take() {
            Some(worker) => self.finish(worker),
            None => Ok(()),
        }
    }

    /// Join a worker within the join timeout, abandoning it otherwise.
    fn finish(&mut self, worker: ActiveWorker) -> Result<()> {
        if worker.handle.wait(self.config.join_timeout) {
            worker.handle.join()
        } else {
            Err(self.abandon(worker))
        }
    }

    fn abandon(&mut self, worker: ActiveWorker) -> Error {
        self.leaked += 1;
        tracing::error!(
            "worker did not stop within {:?}; leaking its thread ({} leaked so far)",
            self.config.join_timeout,
            self.leaked
        );

        // The token stays cancelled: the worker dies at its next line.
        worker.token.cancel();
        worker.events.abandon();
        worker.pump.abort();
        self.state = SharedState::new(EngineState::Stopped);

        Error::JoinTimeout(self.config.join_timeout)
    }

    fn fail_start(&mut self, events: &RunEvents, outcome: RunOutcome, err: Error) -> Error {
        self.state.set(EngineState::Stopped);
        events.send(EngineEvent::Stopped { outcome });
        err
    }

    fn ensure_idle(&self, action: &str) -> Result<()> {
        if self.is_running() {
            return Err(Error::InvalidOperation(format!(
                "cannot {} while a script is running",
                action
            )));
        }
        Ok(())
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_blocking() {
            tracing::error!("engine dropped with a live worker: {}", e);
        }
    }
}

/// Forward everything written to the channel as `Output` events.
///
/// Signals `drained` once the worker's end is closed and every byte has been
/// forwarded.
async fn pump_output(mut reader: OutputReader, events: RunEvents, drained: mpsc::Sender<()>) {
    loop {
        match reader.read().await {
            Ok(Some(chunk)) => events.send(EngineEvent::Output(chunk)),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("output channel read failed: {}", e);
                break;
            }
        }
    }
    let _ = drained.send(());
}
