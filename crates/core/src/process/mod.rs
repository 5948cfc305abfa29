//! External command execution.
//!
//! The `ProcessRunner` trait covers the two ways the gateway talks to
//! catalog tooling: foreground commands whose output is captured, and
//! detached transfers that outlive the request that started them and are
//! later found again through a `ProcessHandle` and the process table.

mod error;
mod local;
mod runner;
mod types;

pub use error::ProcessError;
pub use local::LocalProcessRunner;
pub use runner::ProcessRunner;
pub use types::{CommandOutput, CommandSpec, ProcessEntry, ProcessHandle};
