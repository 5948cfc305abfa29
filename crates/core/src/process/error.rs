//! Error types for the process module.

use thiserror::Error;

/// Errors that can occur while launching or signalling processes.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Program binary not found.
    #[error("Command not found: {program}")]
    NotFound { program: String },

    /// Spawning the process failed for another reason.
    #[error("Failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process started but the OS gave no pid for it.
    #[error("No pid available for '{command}'")]
    MissingPid { command: String },

    /// Sending a signal failed.
    #[error("Failed to signal process group {handle}: {reason}")]
    Signal { handle: u32, reason: String },

    /// Reading the process table failed.
    #[error("Process table inspection failed: {0}")]
    Inspect(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
