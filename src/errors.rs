//! Error handling module
//!
//! Library errors are `thiserror` enums that callers can match on. Two tiers
//! exist: fatal errors (the OS refused a pipe or a fork) and everything else.
//! A stream that produced nothing or a child that exited non-zero is not an
//! error at all; both are reported in [`crate::ProcessOutput`].

use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Custom error type for process operations
#[derive(Error, Debug)]
pub enum ProcessError {
    /// IO operation failed
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The environment variable naming the program is unset or empty
    #[error("Program path not configured: set {var}")]
    MissingProgram { var: String },

    /// The OS could not allocate a pipe
    #[error("Pipe allocation failed: {0}")]
    PipeAllocation(#[source] Errno),

    /// Fork operation failed
    #[error("Fork failed: {0}")]
    Fork(#[source] Errno),

    /// Input was written after the input pipe had been closed
    #[error("Input pipe of process {pid} is already closed")]
    InputClosed { pid: i32 },

    /// A drain thread panicked before reaching end-of-stream
    #[error("Collector for {stream} panicked")]
    DrainPanicked { stream: &'static str },

    /// Waiting for the child failed
    #[error("Waiting for process {pid} failed: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: Errno,
    },
}

impl ProcessError {
    /// Whether the error belongs to the unrecoverable tier.
    ///
    /// Pipe and fork failures mean the environment cannot host the tool at
    /// all; nothing useful can be produced after them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PipeAllocation(_) | Self::Fork(_))
    }
}

/// Result type alias for process operations
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Escalates fatal errors to a process abort.
pub trait FailFast<T> {
    /// Abort the whole process on a fatal error; pass anything else through.
    fn or_abort(self) -> ProcessResult<T>;
}

impl<T> FailFast<T> for ProcessResult<T> {
    fn or_abort(self) -> ProcessResult<T> {
        match self {
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "unrecoverable failure, aborting");
                std::process::abort()
            }
            other => other,
        }
    }
}
