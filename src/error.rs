//! Error types for the few genuinely fallible entry points.
//!
//! The ingest and query surface described by the component contracts is
//! infallible by design: a full queue drops, a full registry evicts, a
//! listener panic is swallowed. `HeapVigilError` exists only for the
//! handful of call sites that *can* reject a caller outright (config
//! validation and native-agent registration).

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Errors surfaced by configuration validation and agent registration.
#[derive(Debug, Error)]
pub enum HeapVigilError {
    /// A configuration value is out of its accepted range.
    #[error("invalid configuration: {field} = {value}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// The value that was rejected.
        value: String,
    },

    /// A caller tried to register a second live analyzer handle while one
    /// is already registered.
    #[error("an analyzer handle is already registered for this process")]
    AlreadyRegistered,

    /// A background worker (cleanup task, GC poller, event processor)
    /// failed to stop within its bounded join window.
    #[error("{worker} did not stop within {timeout_ms}ms")]
    WorkerStopTimeout {
        /// Name of the worker that failed to join.
        worker: &'static str,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },
}

/// Convenience alias for the crate's fallible entry points.
pub type Result<T> = std::result::Result<T, HeapVigilError>;

/// Poll `handle` for completion rather than blocking on it outright, so
/// a stop path can enforce a bound on how long it waits. Returns once
/// the worker has actually finished (swallowing a panic, as listener
/// and worker failures are elsewhere in the crate); returns
/// `WorkerStopTimeout` if `timeout_ms` elapses first, leaving the
/// thread to finish on its own.
pub(crate) fn join_with_timeout<T: Send + 'static>(
    handle: JoinHandle<T>,
    worker: &'static str,
    timeout_ms: u64,
) -> Result<()> {
    const POLL_INTERVAL: Duration = Duration::from_millis(5);
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if handle.is_finished() {
            if handle.join().is_err() {
                tracing::warn!(worker, "worker panicked while stopping");
            }
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(HeapVigilError::WorkerStopTimeout { worker, timeout_ms });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
