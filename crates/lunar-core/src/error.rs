//! Error types for lunar-core.

use std::time::Duration;

use thiserror::Error;

/// Result type for lunar-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lunar-core.
///
/// Script failures (syntax errors, runtime errors, cancellation) are not
/// represented here: they are contained inside a run and surface as output
/// text plus the outcome carried by [`EngineEvent::Stopped`].
///
/// [`EngineEvent::Stopped`]: crate::EngineEvent::Stopped
#[derive(Debug, Error)]
pub enum Error {
    /// The output channel between worker and controller could not be opened.
    #[error("output channel failure: {0}")]
    Channel(#[source] std::io::Error),

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker did not finish within the bounded shutdown wait.
    #[error("worker thread did not stop within {0:?} and was abandoned")]
    JoinTimeout(Duration),

    /// The worker thread panicked outside the guarded run.
    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),

    /// Operation not legal in the current engine state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// No tokio runtime to drive the controller side of the engine.
    #[error("no async runtime available: {0}")]
    Runtime(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render the error together with a recovery hint for end users.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Channel(_) => {
                "The platform pipe/socket backing script output could not be created. \
                 Check the process file descriptor limit."
            }
            Error::Spawn(_) => "The OS refused to create a thread. Check system resource limits.",
            Error::JoinTimeout(_) => {
                "The script is blocked outside the interpreter (e.g. in os.execute or io.read) \
                 and could not observe the stop request."
            }
            Error::WorkerPanic(_) => "This is a bug in lunar; please report it.",
            Error::InvalidOperation(_) => "Stop the running script and wait for it to finish first.",
            Error::Runtime(_) => "Create the engine from inside a tokio runtime.",
            Error::Io(_) => return self.to_string(),
        };
        format!("{}\n  hint: {}", self, hint)
    }
}
