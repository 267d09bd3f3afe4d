//! Engine configuration.

use std::ffi::OsStr;
use std::time::Duration;

/// Environment variable holding extra module search directories.
///
/// Uses the platform path-list syntax (`:` on Unix, `;` on Windows).
pub const SEARCH_PATH_ENV: &str = "LUNAR_PATH";

/// Default bounded wait for the worker to join on shutdown.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for the controller to drain the output channel after a run.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables for a [`ScriptEngine`](crate::ScriptEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long shutdown waits for a stopped worker before abandoning it.
    pub join_timeout: Duration,
    /// How long the worker waits for its output to be drained before
    /// announcing that it stopped.
    pub drain_timeout: Duration,
    /// Name the script chunk is loaded under; shows up in error messages
    /// and tracebacks (`script:3: boom`).
    pub chunk_name: String,
    /// Name given to worker threads.
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            chunk_name: "script".to_string(),
            thread_name: "lunar-worker".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_chunk_name(mut self, name: impl Into<String>) -> Self {
        self.chunk_name = name.into();
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Search directories listed in [`SEARCH_PATH_ENV`], in order.
pub fn search_dirs_from_env() -> Vec<String> {
    std::env::var_os(SEARCH_PATH_ENV)
        .map(|value| split_search_path(&value))
        .unwrap_or_default()
}

fn split_search_path(value: &OsStr) -> Vec<String> {
    std::env::split_paths(value)
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}
