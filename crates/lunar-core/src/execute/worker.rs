//! Worker thread: one interpreter, one script, one run.
//!
//! Provides `WorkerThread`, the body executed on the dedicated OS thread,
//! and `WorkerHandle`, the controller's grip on that thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use mlua::{Function, Lua, Table, Value};

use crate::channel::OutputWriter;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, RunEvents, RunOutcome};
use crate::payload::ScriptPayload;

use super::hook::ExecutionHook;
use super::token::CancellationToken;

/// Lifecycle of the engine's current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No run has been started yet.
    #[default]
    Idle,
    /// `start()` spawned a worker that has not announced itself yet.
    Starting,
    /// The worker is executing the script.
    Running,
    /// Stop was requested; the worker has not finished yet.
    StopRequested,
    /// The last run is over.
    Stopped,
}

/// State of one run, shared between controller and that run's worker.
///
/// Every run gets its own instance, so a worker the engine abandoned only
/// ever updates a state nobody reads any more.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedState(Arc<Mutex<EngineState>>);

impl SharedState {
    pub(crate) fn new(state: EngineState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub(crate) fn get(&self) -> EngineState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, state: EngineState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Apply `to` only when the current state is one of `from`.
    pub(crate) fn transition(&self, from: &[EngineState], to: EngineState) -> bool {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if from.contains(&guard) {
            *guard = to;
            true
        } else {
            false
        }
    }
}

/// Everything a worker needs for one run.
pub(crate) struct WorkerThread {
    pub(crate) payload: ScriptPayload,
    pub(crate) token: CancellationToken,
    pub(crate) events: RunEvents,
    pub(crate) state: SharedState,
    pub(crate) chunk_name: String,
    pub(crate) drain_timeout: Duration,
}

/// How the script itself ended, before teardown.
enum ScriptResult {
    Completed,
    Errored(String),
    Cancelled,
}

impl WorkerThread {
    /// Run the full protocol.
    ///
    /// `drained` resolves once the controller has read the channel to its
    /// end; "stopped" is only announced after that, so no output of this run
    /// can be delivered after it.
    fn run(self, writer: OutputWriter, drained: mpsc::Receiver<()>) {
        self.events.send(EngineEvent::Started);
        self.state
            .transition(&[EngineState::Starting], EngineState::Running);
        tracing::debug!("worker started ({} bytes of script)", self.payload.source().len());

        let outcome = match catch_unwind(AssertUnwindSafe(|| self.execute(writer))) {
            Ok(ScriptResult::Completed) => RunOutcome::Finished,
            Ok(ScriptResult::Errored(message)) => {
                tracing::debug!("script failed: {}", message);
                RunOutcome::Failed
            }
            Ok(ScriptResult::Cancelled) => RunOutcome::Cancelled,
            Err(panic) => {
                tracing::error!("worker panicked: {}", panic_message(panic.as_ref()));
                RunOutcome::Failed
            }
        };

        // The interpreter and with it every write handle are gone by now.
        match drained.recv_timeout(self.drain_timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "output not drained within {:?}; announcing stop anyway",
                    self.drain_timeout
                );
            }
        }

        self.state.set(EngineState::Stopped);
        tracing::debug!("worker stopped: {:?}", outcome);
        self.events.send(EngineEvent::Stopped { outcome });
    }

    /// Create the interpreter, run the script and tear the interpreter down.
    fn execute(&self, writer: OutputWriter) -> ScriptResult {
        let writer = Rc::new(writer);

        // SAFETY: the `debug` library lets scripts break the interpreter's
        // invariants. Scripts are the user's own code, they need
        // `debug.traceback`, and this state never outlives the run.
        let lua = unsafe { Lua::unsafe_new() };

        let hook = ExecutionHook::new(self.token.clone(), self.events.clone());
        let tripped = hook.tripped();

        let result = match self.prepare(&lua, Rc::clone(&writer), hook) {
            Ok(()) => self.run_chunk(&lua),
            Err(e) => Err(e.to_string()),
        };

        let result = if tripped.get() {
            ScriptResult::Cancelled
        } else {
            match result {
                Ok(()) => ScriptResult::Completed,
                Err(message) => {
                    let mut text = message.clone().into_bytes();
                    text.push(b'\n');
                    if let Err(e) = writer.write_all(&text) {
                        tracing::warn!("failed to write error message to output: {}", e);
                    }
                    ScriptResult::Errored(message)
                }
            }
        };

        // A cancelled state is abandoned, never reused: dropping it here
        // closes the last write handles as well.
        drop(lua);
        drop(writer);

        result
    }

    /// Wire output redirection, module search path and the line hook.
    fn prepare(&self, lua: &Lua, writer: Rc<OutputWriter>, hook: ExecutionHook) -> mlua::Result<()> {
        super::stdio::redirect(lua, writer)?;

        let prefix = self.payload.package_path_prefix();
        if !prefix.is_empty() {
            let package: Table = lua.globals().get("package")?;
            let path: String = package.get("path")?;
            package.set("path", format!("{}{}", prefix, path))?;
        }

        hook.install(lua);
        Ok(())
    }

    /// Parse and run the script under `xpcall` with `debug.traceback`.
    ///
    /// Returns the error text for parse and runtime errors alike.
    fn run_chunk(&self, lua: &Lua) -> std::result::Result<(), String> {
        let chunk = lua
            .load(self.payload.source())
            .set_name(format!("={}", self.chunk_name))
            .into_function()
            .map_err(|e| match e {
                mlua::Error::SyntaxError { message, .. } => message,
                other => other.to_string(),
            })?;

        let protected = || -> mlua::Result<(bool, Value)> {
            let globals = lua.globals();
            let xpcall: Function = globals.get("xpcall")?;
            let debug: Table = globals.get("debug")?;
            let traceback: Function = debug.get("traceback")?;
            xpcall.call((chunk, traceback))
        };

        match protected() {
            Ok((true, _)) => Ok(()),
            Ok((false, Value::String(message))) => Err(message.to_string_lossy().to_string()),
            Ok((false, other)) => Err(format!("(error object is a {} value)", other.type_name())),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a running worker thread.
///
/// Dropping the handle detaches the thread; use [`WorkerHandle::join`] or
/// [`WorkerHandle::wait`] for an orderly end.
pub(crate) struct WorkerHandle {
    thread: JoinHandle<()>,
    /// Disconnects when the worker's closure returns.
    done: mpsc::Receiver<()>,
}

impl WorkerHandle {
    /// Spawn a worker thread for one run.
    pub(crate) fn spawn(
        config: &EngineConfig,
        worker: WorkerThread,
        writer: OutputWriter,
        drained: mpsc::Receiver<()>,
    ) -> Result<Self> {
        let (done_tx, done) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let _done = done_tx;
                worker.run(writer, drained);
            })
            .map_err(Error::Spawn)?;

        Ok(Self { thread, done })
    }

    /// Check whether the worker is still executing.
    pub(crate) fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Block up to `timeout` for the worker to finish.
    ///
    /// Returns `true` when the worker has finished.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => true,
            Err(mpsc::RecvTimeoutError::Timeout) => false,
        }
    }

    /// Join the worker thread.
    pub(crate) fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|panic| Error::WorkerPanic(panic_message(panic.as_ref())))
    }
}
