//! Error types for the catalog module.

use thiserror::Error;

use crate::process::ProcessError;

/// Errors returned by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A catalog command exited with a failure code.
    #[error("Catalog command failed: {command}")]
    Unavailable {
        command: String,
        output: String,
        exit_code: Option<i32>,
    },

    /// Synchronous staging produced no bytes within the bounded wait.
    #[error("Timeout staging '{file}': no data after {waited_ms} ms")]
    StagingTimeout { file: String, waited_ms: u64 },

    /// A command succeeded but printed something we cannot interpret.
    #[error("Unexpected output from '{command}': {output}")]
    Parse { command: String, output: String },

    /// The command could not be launched or signalled.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn unavailable(command: impl Into<String>, output: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::Unavailable {
            command: command.into(),
            output: output.into(),
            exit_code,
        }
    }

    /// The failing command line, when there is one to show.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Unavailable { command, .. } | Self::Parse { command, .. } => Some(command),
            _ => None,
        }
    }
}
