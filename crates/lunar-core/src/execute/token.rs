//! Cooperative cancellation of a running script.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle for cooperative cancellation of script execution.
///
/// `CancellationToken` is a shared flag: the controller sets it, the worker's
/// line hook reads it before every executed source line. It can be cloned
/// and any clone can trigger cancellation, which all other clones observe.
///
/// # Example
///
/// ```
/// use lunar_core::CancellationToken;
///
/// let token = CancellationToken::new();
/// let hook_side = token.clone();
///
/// assert!(!hook_side.is_cancelled());
///
/// // Request cancellation from the controller side
/// token.cancel();
///
/// // The hook sees it at its next invocation
/// assert!(hook_side.is_cancelled());
/// ```
#[derive(Clone, Default, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the not-cancelled state.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    ///
    /// Takes effect at the worker's next executed source line; there is no
    /// preemption.
    ///
    /// A token is never cleared; each run gets a new one.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Error raised inside the interpreter to unwind a cancelled script.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("script execution cancelled")
    }
}

impl std::error::Error for Cancelled {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_creation() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_token_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_token_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();

        clone.cancel();

        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_token_visible_across_threads() {
        let token = CancellationToken::new();
        let worker_side = token.clone();

        let handle = std::thread::spawn(move || {
            while !worker_side.is_cancelled() {
                std::thread::yield_now();
            }
        });

        token.cancel();
        handle.join().unwrap();
    }
}
