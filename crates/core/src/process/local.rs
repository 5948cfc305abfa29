//! Process runner backed by the local operating system.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::ProcessError;
use super::runner::ProcessRunner;
use super::types::{CommandOutput, CommandSpec, ProcessEntry, ProcessHandle};

/// Program used to read the process table.
const PS_PROGRAM: &str = "ps";

/// Runs commands on the local host.
///
/// Detached commands are started as process-group leaders and dropped
/// without a wait; tokio reaps them once they exit, so finished transfers
/// never linger in the process table as zombies for long.
#[derive(Debug, Clone, Default)]
pub struct LocalProcessRunner;

impl LocalProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    fn launch_error(spec: &CommandSpec, e: std::io::Error) -> ProcessError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProcessError::NotFound {
                program: spec.program.clone(),
            }
        } else {
            ProcessError::Launch {
                command: spec.to_string(),
                source: e,
            }
        }
    }

    /// Reads the process table.
    pub async fn process_table(&self) -> Result<Vec<ProcessEntry>, ProcessError> {
        let output = Command::new(PS_PROGRAM)
            .args(["-eo", "pid=,pgid=,stat=,args="])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProcessError::Inspect(e.to_string()))?;

        if !output.status.success() {
            return Err(ProcessError::Inspect(format!(
                "ps exited with code {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(ProcessEntry::parse)
            .collect())
    }
}

/// Converts a handle to a pid that is safe to signal.
///
/// Zero and negative values have group-wide meaning for kill(2) and must
/// never reach it.
fn signal_target(handle: ProcessHandle) -> Result<libc::pid_t, ProcessError> {
    match libc::pid_t::try_from(handle.as_raw()) {
        Ok(pid) if pid > 1 => Ok(pid),
        _ => Err(ProcessError::Signal {
            handle: handle.as_raw(),
            reason: "refusing to signal reserved pid".to_string(),
        }),
    }
}

/// Maps the result of kill(2)/killpg(2); a vanished target is not an error.
fn check_signal(ret: libc::c_int, handle: ProcessHandle) -> Result<(), ProcessError> {
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!(handle = %handle, "Process already gone");
        return Ok(());
    }
    Err(ProcessError::Signal {
        handle: handle.as_raw(),
        reason: err.to_string(),
    })
}

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        debug!(command = %spec, "Running command");
        let output = Self::command(spec)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Self::launch_error(spec, e))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn run_detached(&self, spec: &CommandSpec) -> Result<ProcessHandle, ProcessError> {
        debug!(command = %spec, "Launching detached command");
        let child = Self::command(spec)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| Self::launch_error(spec, e))?;

        let pid = child.id().ok_or_else(|| ProcessError::MissingPid {
            command: spec.to_string(),
        })?;

        // The child handle is dropped on purpose: from here on the process is
        // only reachable through its pid.
        drop(child);
        Ok(ProcessHandle::from_raw(pid))
    }

    async fn is_alive(&self, handle: ProcessHandle, signature: &str) -> Result<bool, ProcessError> {
        let table = self.process_table().await?;
        Ok(table.iter().any(|entry| {
            entry.pgid == handle.as_raw() && !entry.is_zombie() && entry.args.contains(signature)
        }))
    }

    async fn group_alive(&self, handle: ProcessHandle) -> Result<bool, ProcessError> {
        let table = self.process_table().await?;
        Ok(table
            .iter()
            .any(|entry| entry.pgid == handle.as_raw() && !entry.is_zombie()))
    }

    async fn kill(&self, handle: ProcessHandle) -> Result<(), ProcessError> {
        let pid = signal_target(handle)?;
        // SAFETY: kill() has no memory-safety preconditions; the pid was checked above.
        let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
        check_signal(ret, handle)
    }

    async fn kill_tree(&self, handle: ProcessHandle) -> Result<(), ProcessError> {
        let pgid = signal_target(handle)?;
        // SAFETY: killpg() has no memory-safety preconditions; the group id was checked above.
        let ret = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        if let Err(e) = check_signal(ret, handle) {
            warn!(handle = %handle, error = %e, "Group kill failed, killing leader only");
            return self.kill(handle).await;
        }
        Ok(())
    }
}
