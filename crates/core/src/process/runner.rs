//! Trait definition for process execution.

use async_trait::async_trait;

use super::error::ProcessError;
use super::types::{CommandOutput, CommandSpec, ProcessHandle};

/// Launches and inspects external commands.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs a command to completion, capturing its output and exit code.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError>;

    /// Starts a command in its own process group and returns immediately.
    ///
    /// The returned handle is the only reference to the process the caller
    /// keeps; it is meant to be persisted.
    async fn run_detached(&self, command: &CommandSpec) -> Result<ProcessHandle, ProcessError>;

    /// Whether a live process of the handle's group is running a command
    /// that contains `signature`.
    async fn is_alive(&self, handle: ProcessHandle, signature: &str) -> Result<bool, ProcessError>;

    /// Whether any live process remains in the handle's process group,
    /// whatever command it runs.
    async fn group_alive(&self, handle: ProcessHandle) -> Result<bool, ProcessError>;

    /// Kills the process the handle refers to.
    async fn kill(&self, handle: ProcessHandle) -> Result<(), ProcessError>;

    /// Kills the process and every descendant in its process group.
    async fn kill_tree(&self, handle: ProcessHandle) -> Result<(), ProcessError>;
}
