//! Structured error kinds produced by the core.
//!
//! Only conditions that genuinely prevent the reader or scheduler from
//! continuing become a `SimError`. "Missing manager at dispatch" and
//! "exhausted manager" are deliberate no-ops, logged and swallowed by the
//! scheduler rather than surfaced here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed script: unknown type, missing return-value line, I/O
    /// failure reading a line, etc.
    #[error("{file}:{line}: parse error: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    /// A script referenced a symbol that was never declared.
    #[error("{file}:{line}: unknown symbol \"{name}\"")]
    UnknownSymbol {
        file: String,
        line: usize,
        name: String,
    },

    /// `Scheduler::start` failed to arm the initial timer.
    #[error("failed to start scheduler: {0}")]
    TimerSetup(String),

    /// The scheduler was asked to start while already running.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// Underlying I/O error (opening a script file, etc).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
