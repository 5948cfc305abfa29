//! Mock process runner for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::process::{CommandOutput, CommandSpec, ProcessError, ProcessHandle, ProcessRunner};

/// Mock implementation of the ProcessRunner trait.
///
/// Foreground commands return queued outputs (or a default), detached
/// commands get increasing handles starting at 1000 and stay "alive" until
/// killed or explicitly terminated.
///
/// # Example
///
/// ```rust,ignore
/// use fileport_core::testing::MockProcessRunner;
///
/// let runner = MockProcessRunner::new();
/// let handle = runner.run_detached(&CommandSpec::new("lcg-cp")).await?;
/// assert!(runner.is_alive(handle, "lcg-cp").await?);
///
/// // The transfer process dies on its own.
/// runner.terminate(handle).await;
/// ```
#[derive(Debug)]
pub struct MockProcessRunner {
    run_calls: Arc<RwLock<Vec<CommandSpec>>>,
    detached_calls: Arc<RwLock<Vec<CommandSpec>>>,
    outputs: Arc<RwLock<VecDeque<CommandOutput>>>,
    default_output: Arc<RwLock<CommandOutput>>,
    /// Live detached processes and their command lines.
    alive: Arc<RwLock<HashMap<ProcessHandle, String>>>,
    /// Groups whose leader exited while descendants kept running.
    lingering: Arc<RwLock<HashSet<ProcessHandle>>>,
    /// Transfers that write their last bytes and exit when next inspected.
    finishing: Arc<RwLock<HashMap<ProcessHandle, (PathBuf, Vec<u8>)>>>,
    killed: Arc<RwLock<Vec<ProcessHandle>>>,
    fail_detached: Arc<RwLock<bool>>,
    next_handle: AtomicU32,
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            run_calls: Arc::new(RwLock::new(Vec::new())),
            detached_calls: Arc::new(RwLock::new(Vec::new())),
            outputs: Arc::new(RwLock::new(VecDeque::new())),
            default_output: Arc::new(RwLock::new(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            })),
            alive: Arc::new(RwLock::new(HashMap::new())),
            lingering: Arc::new(RwLock::new(HashSet::new())),
            finishing: Arc::new(RwLock::new(HashMap::new())),
            killed: Arc::new(RwLock::new(Vec::new())),
            fail_detached: Arc::new(RwLock::new(false)),
            next_handle: AtomicU32::new(1000),
        }
    }

    /// Stdout returned by foreground commands when nothing is queued.
    pub async fn set_default_output(&self, stdout: &str) {
        *self.default_output.write().await = CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        };
    }

    /// Queue an output for the next foreground command.
    pub async fn push_output(&self, output: CommandOutput) {
        self.outputs.write().await.push_back(output);
    }

    /// Make the next foreground command exit with `code` and `stderr`.
    pub async fn fail_next_run(&self, code: i32, stderr: &str) {
        self.push_output(CommandOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
        .await;
    }

    /// Make detached launches fail.
    pub async fn set_fail_detached(&self, fail: bool) {
        *self.fail_detached.write().await = fail;
    }

    /// Foreground commands run so far.
    pub async fn run_calls(&self) -> Vec<CommandSpec> {
        self.run_calls.read().await.clone()
    }

    /// Detached commands launched so far.
    pub async fn detached_calls(&self) -> Vec<CommandSpec> {
        self.detached_calls.read().await.clone()
    }

    /// Handles passed to `kill` or `kill_tree`.
    pub async fn killed(&self) -> Vec<ProcessHandle> {
        self.killed.read().await.clone()
    }

    /// Simulate a detached process exiting on its own.
    pub async fn terminate(&self, handle: ProcessHandle) {
        self.alive.write().await.remove(&handle);
    }

    /// Simulate the group leader exiting while processes it forked keep
    /// running in its group.
    pub async fn exit_leader(&self, handle: ProcessHandle) {
        self.alive.write().await.remove(&handle);
        self.lingering.write().await.insert(handle);
    }

    /// Simulate a transfer that completes `path` with `contents` and exits
    /// right as its liveness is checked.
    pub async fn finish_on_next_check(
        &self,
        handle: ProcessHandle,
        path: impl Into<PathBuf>,
        contents: Vec<u8>,
    ) {
        self.finishing
            .write()
            .await
            .insert(handle, (path.into(), contents));
    }

    pub async fn alive_count(&self) -> usize {
        self.alive.read().await.len()
    }

    async fn remove(&self, handle: ProcessHandle) {
        self.alive.write().await.remove(&handle);
        self.lingering.write().await.remove(&handle);
        self.killed.write().await.push(handle);
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.run_calls.write().await.push(command.clone());
        if let Some(output) = self.outputs.write().await.pop_front() {
            return Ok(output);
        }
        Ok(self.default_output.read().await.clone())
    }

    async fn run_detached(&self, command: &CommandSpec) -> Result<ProcessHandle, ProcessError> {
        self.detached_calls.write().await.push(command.clone());
        if *self.fail_detached.read().await {
            return Err(ProcessError::NotFound {
                program: command.program.clone(),
            });
        }

        let handle = ProcessHandle::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let line = std::iter::once(command.program.as_str())
            .chain(command.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.alive.write().await.insert(handle, line);
        Ok(handle)
    }

    async fn is_alive(&self, handle: ProcessHandle, signature: &str) -> Result<bool, ProcessError> {
        let finishing = self.finishing.write().await.remove(&handle);
        if let Some((path, contents)) = finishing {
            tokio::fs::write(&path, contents)
                .await
                .map_err(|e| ProcessError::Inspect(e.to_string()))?;
            self.alive.write().await.remove(&handle);
            return Ok(false);
        }
        Ok(self
            .alive
            .read()
            .await
            .get(&handle)
            .is_some_and(|line| line.contains(signature)))
    }

    async fn group_alive(&self, handle: ProcessHandle) -> Result<bool, ProcessError> {
        Ok(self.alive.read().await.contains_key(&handle)
            || self.lingering.read().await.contains(&handle))
    }

    async fn kill(&self, handle: ProcessHandle) -> Result<(), ProcessError> {
        self.remove(handle).await;
        Ok(())
    }

    async fn kill_tree(&self, handle: ProcessHandle) -> Result<(), ProcessError> {
        self.remove(handle).await;
        Ok(())
    }
}
