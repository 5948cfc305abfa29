//! Catalog gateway driving the catalog's command-line tools.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::error::CatalogError;
use super::staging::wait_for_first_bytes;
use super::traits::{CatalogGateway, CatalogStream};
use super::types::{
    parse_listing, parse_listing_line, CatalogContext, CatalogEntry, LocationRegistration,
    RemoteFile, StagingTransfer,
};
use crate::config::{CatalogConfig, StagingWait};
use crate::process::{CommandOutput, CommandSpec, ProcessError, ProcessRunner};

/// Gateway over the `lfc-*`/`lcg-*` command family.
///
/// Foreground commands and detached copies go through the injected
/// `ProcessRunner`; read streams hold their own child process.
pub struct CommandLineCatalog {
    config: CatalogConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl CommandLineCatalog {
    pub fn new(config: CatalogConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    /// Directory holding a caller's files.
    pub fn scope_dir(&self, ctx: &CatalogContext) -> String {
        format!(
            "/grid/{}/{}/{}/{}",
            ctx.vo, self.config.namespace, ctx.app_dir, ctx.user_name
        )
    }

    fn env(ctx: &CatalogContext) -> [(String, String); 3] {
        [
            ("LCG_GFAL_INFOSYS".to_string(), ctx.info_system.clone()),
            ("LFC_HOST".to_string(), ctx.catalog_host.clone()),
            (
                "X509_USER_PROXY".to_string(),
                ctx.proxy_path.to_string_lossy().to_string(),
            ),
        ]
    }

    fn command(&self, program: &str, ctx: &CatalogContext) -> CommandSpec {
        let mut spec = CommandSpec::new(program);
        for (key, value) in Self::env(ctx) {
            spec = spec.env(key, value);
        }
        spec
    }

    fn copy_command(&self, ctx: &CatalogContext, logical: &str, dest: &Path) -> CommandSpec {
        self.command(&self.config.copy_command, ctx).args([
            "--vo".to_string(),
            ctx.vo.clone(),
            "-n".to_string(),
            self.config.copy_streams.to_string(),
            format!("lfn:{}", logical),
            format!("file:{}", dest.display()),
        ])
    }

    /// Runs a foreground command and fails on a non-zero exit.
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, CatalogError> {
        let output = self.runner.run(spec).await?;
        if !output.success() {
            warn!(
                command = %spec,
                exit_code = ?output.exit_code,
                "Catalog command failed"
            );
            return Err(CatalogError::unavailable(
                spec.to_string(),
                output.combined(),
                output.exit_code,
            ));
        }
        Ok(output)
    }
}

/// Pulls the catalog identifier out of `lcg-rf -v` output.
///
/// The tool prints `guid:<id>`; the identifier is the second `:` field.
fn parse_registration_id(output: &str) -> Option<String> {
    output
        .lines()
        .rev()
        .filter_map(|line| line.trim().split(':').nth(1))
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl CatalogGateway for CommandLineCatalog {
    fn name(&self) -> &str {
        "command-line"
    }

    fn logical_path(&self, ctx: &CatalogContext, file: &RemoteFile) -> String {
        match file {
            RemoteFile::InScope(name) => format!("{}/{}", self.scope_dir(ctx), name),
            RemoteFile::Absolute(path) => path.clone(),
        }
    }

    fn transfer_signature(&self) -> &str {
        self.config.transfer_signature()
    }

    async fn list(&self, ctx: &CatalogContext) -> Result<Vec<CatalogEntry>, CatalogError> {
        let spec = self
            .command(&self.config.list_command, ctx)
            .args(["-l", "--comment"])
            .arg(self.scope_dir(ctx));
        let output = self.run_checked(&spec).await?;
        Ok(parse_listing(&output.stdout))
    }

    async fn stat(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
    ) -> Result<CatalogEntry, CatalogError> {
        let spec = self
            .command(&self.config.list_command, ctx)
            .arg("-l")
            .arg(self.logical_path(ctx, file));
        let output = self.run_checked(&spec).await?;
        output
            .stdout
            .lines()
            .find_map(parse_listing_line)
            .ok_or_else(|| CatalogError::Parse {
                command: spec.to_string(),
                output: output.combined(),
            })
    }

    async fn fetch_to_local(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
        dest: &Path,
    ) -> Result<StagingTransfer, CatalogError> {
        let entry = self.stat(ctx, file).await?;
        let logical = self.logical_path(ctx, file);
        let spec = self.copy_command(ctx, &logical, dest);
        let handle = self.runner.run_detached(&spec).await?;

        info!(
            file = %logical,
            dest = %dest.display(),
            expected_size = entry.size,
            handle = %handle,
            "Staging transfer started"
        );

        Ok(StagingTransfer {
            expected_size: entry.size,
            handle,
        })
    }

    async fn fetch_to_local_sync(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
        dest: &Path,
        wait: StagingWait,
    ) -> Result<StagingTransfer, CatalogError> {
        let transfer = self.fetch_to_local(ctx, file, dest).await?;
        if transfer.expected_size == 0 || wait_for_first_bytes(dest, wait).await {
            return Ok(transfer);
        }

        let logical = self.logical_path(ctx, file);
        warn!(file = %logical, handle = %transfer.handle, "No data staged in time, killing transfer");
        if let Err(e) = self.runner.kill_tree(transfer.handle).await {
            warn!(handle = %transfer.handle, error = %e, "Failed to kill stalled transfer");
        }
        Err(CatalogError::StagingTimeout {
            file: logical,
            waited_ms: wait.total().as_millis() as u64,
        })
    }

    async fn remove(&self, ctx: &CatalogContext, file: &RemoteFile) -> Result<String, CatalogError> {
        let logical = self.logical_path(ctx, file);
        let spec = self
            .command(&self.config.remove_command, ctx)
            .arg("-a")
            .arg(format!("lfn:{}", logical));
        self.run_checked(&spec).await?;
        info!(file = %logical, "Removed file and replicas");
        Ok(logical)
    }

    async fn open_stream(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
    ) -> Result<Box<dyn CatalogStream>, CatalogError> {
        let logical = self.logical_path(ctx, file);
        let spec = self.command(&self.config.stream_command, ctx).args([
            "--vo".to_string(),
            ctx.vo.clone(),
            format!("lfn:{}", logical),
            "file:/dev/stdout".to_string(),
        ]);
        let stream = CommandStream::spawn(&spec)?;
        debug!(file = %logical, "Catalog stream opened");
        Ok(Box::new(stream))
    }

    async fn replicas(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
    ) -> Result<Vec<String>, CatalogError> {
        let spec = self
            .command(&self.config.replicas_command, ctx)
            .arg(format!("lfn:{}", self.logical_path(ctx, file)));
        let output = self.run_checked(&spec).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn register_location(
        &self,
        ctx: &CatalogContext,
        surl: &str,
        file_name: &str,
        path: Option<&str>,
    ) -> Result<LocationRegistration, CatalogError> {
        let logical = match path {
            Some(path) => format!("/grid/{}/{}/{}", ctx.vo, path.trim_matches('/'), file_name),
            None => format!("{}/{}", self.scope_dir(ctx), file_name),
        };
        let spec = self.command(&self.config.register_command, ctx).args([
            "-v".to_string(),
            "--vo".to_string(),
            ctx.vo.clone(),
            "-l".to_string(),
            format!("lfn:{}", logical),
            surl.to_string(),
        ]);
        let output = self.run_checked(&spec).await?;
        let catalog_id =
            parse_registration_id(&output.stdout).ok_or_else(|| CatalogError::Parse {
                command: spec.to_string(),
                output: output.combined(),
            })?;

        info!(logical = %logical, surl = %surl, catalog_id = %catalog_id, "Registered location");
        Ok(LocationRegistration {
            catalog_id,
            logical_path: logical,
        })
    }
}

/// Read stream backed by a copy process writing to its stdout.
///
/// The child is killed when the stream is closed or dropped.
pub struct CommandStream {
    command: String,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
}

impl CommandStream {
    /// Spawns `spec` with stdout piped.
    pub fn spawn(spec: &CommandSpec) -> Result<Self, CatalogError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CatalogError::Process(ProcessError::NotFound {
                    program: spec.program.clone(),
                })
            } else {
                CatalogError::Process(ProcessError::Launch {
                    command: spec.to_string(),
                    source: e,
                })
            }
        })?;
        let stdout = child.stdout.take();

        Ok(Self {
            command: spec.to_string(),
            child: Some(child),
            stdout,
        })
    }

    /// Reaps the child after end of stream and reports a failed exit.
    async fn finish(&mut self) -> Result<(), CatalogError> {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let status = child.wait().await?;
            if !status.success() {
                return Err(CatalogError::unavailable(
                    self.command.clone(),
                    "stream ended with a failed exit status",
                    status.code(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStream for CommandStream {
    async fn read_chunk(&mut self, max: usize) -> Result<Bytes, CatalogError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(Bytes::new());
        };

        let mut buf = BytesMut::zeroed(max);
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            self.finish().await?;
            return Ok(Bytes::new());
        }
        buf.truncate(n);
        Ok(buf.freeze())
    }

    async fn close(&mut self) -> Result<(), CatalogError> {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Catalog stream process already exited");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProcessRunner;
    use std::path::PathBuf;

    fn ctx() -> CatalogContext {
        CatalogContext {
            info_system: "bdii.example.org:2170".to_string(),
            catalog_host: "lfc.example.org".to_string(),
            proxy_path: PathBuf::from("/tmp/proxy-7"),
            vo: "gridit".to_string(),
            app_dir: "astro".to_string(),
            user_name: "alice".to_string(),
        }
    }

    fn catalog(runner: Arc<MockProcessRunner>) -> CommandLineCatalog {
        CommandLineCatalog::new(CatalogConfig::default(), runner)
    }

    const LISTING: &str =
        "-rw-rw-r--   1 19510 2688 1000 Mar 12 10:21 data.csv nightly export\n";

    #[tokio::test]
    async fn test_list_uses_scope_and_env() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.set_default_output(LISTING).await;
        let catalog = catalog(runner.clone());

        let entries = catalog.list(&ctx()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].remark, "nightly export");

        let calls = runner.run_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "lfc-ls");
        assert_eq!(calls[0].args, vec!["-l", "--comment", "/grid/gridit/sgfs/astro/alice"]);
        assert!(calls[0]
            .env
            .contains(&("X509_USER_PROXY".to_string(), "/tmp/proxy-7".to_string())));
        assert!(calls[0]
            .env
            .contains(&("LFC_HOST".to_string(), "lfc.example.org".to_string())));
    }

    #[tokio::test]
    async fn test_failed_command_is_unavailable_with_command_line() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.fail_next_run(2, "No such file or directory").await;
        let catalog = catalog(runner);

        let err = catalog
            .stat(&ctx(), &RemoteFile::InScope("missing.bin".into()))
            .await
            .unwrap_err();
        match err {
            CatalogError::Unavailable {
                command,
                output,
                exit_code,
            } => {
                assert!(command.contains("lfc-ls -l /grid/gridit/sgfs/astro/alice/missing.bin"));
                assert_eq!(output, "No such file or directory");
                assert_eq!(exit_code, Some(2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_to_local_launches_detached_copy() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.set_default_output(LISTING).await;
        let catalog = catalog(runner.clone());

        let transfer = catalog
            .fetch_to_local(
                &ctx(),
                &RemoteFile::InScope("data.csv".into()),
                Path::new("/tmp/stage/data.csv"),
            )
            .await
            .unwrap();
        assert_eq!(transfer.expected_size, 1000);

        let detached = runner.detached_calls().await;
        assert_eq!(detached.len(), 1);
        assert_eq!(
            detached[0].args,
            vec![
                "--vo",
                "gridit",
                "-n",
                "3",
                "lfn:/grid/gridit/sgfs/astro/alice/data.csv",
                "file:/tmp/stage/data.csv"
            ]
        );
        assert!(runner.is_alive(transfer.handle, "lcg-cp").await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_sync_times_out_and_kills() {
        let runner = Arc::new(MockProcessRunner::new());
        runner.set_default_output(LISTING).await;
        let catalog = catalog(runner.clone());
        let dir = tempfile::TempDir::new().unwrap();

        let err = catalog
            .fetch_to_local_sync(
                &ctx(),
                &RemoteFile::Absolute("/grid/gridit/shared/data.csv".into()),
                &dir.path().join("data.csv"),
                StagingWait {
                    attempts: 2,
                    interval: std::time::Duration::from_millis(5),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogError::StagingTimeout { .. }));
        assert_eq!(runner.killed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_location_parses_id() {
        let runner = Arc::new(MockProcessRunner::new());
        runner
            .set_default_output("guid:8a3c71f2-0d5e-4f4e-9b0e-3cf1b2a4d111\n")
            .await;
        let catalog = catalog(runner.clone());

        let reg = catalog
            .register_location(&ctx(), "srm://se.example.org/data/x", "x.dat", Some("/results/run1/"))
            .await
            .unwrap();
        assert_eq!(reg.catalog_id, "8a3c71f2-0d5e-4f4e-9b0e-3cf1b2a4d111");
        assert_eq!(reg.logical_path, "/grid/gridit/results/run1/x.dat");

        let calls = runner.run_calls().await;
        assert_eq!(
            calls[0].args,
            vec![
                "-v",
                "--vo",
                "gridit",
                "-l",
                "lfn:/grid/gridit/results/run1/x.dat",
                "srm://se.example.org/data/x"
            ]
        );
    }

    #[tokio::test]
    async fn test_replicas_skip_blank_lines() {
        let runner = Arc::new(MockProcessRunner::new());
        runner
            .set_default_output("srm://se1.example.org/a\n\nsrm://se2.example.org/a\n")
            .await;
        let catalog = catalog(runner);

        let surls = catalog
            .replicas(&ctx(), &RemoteFile::InScope("a".into()))
            .await
            .unwrap();
        assert_eq!(surls, vec!["srm://se1.example.org/a", "srm://se2.example.org/a"]);
    }

    #[tokio::test]
    async fn test_command_stream_reads_until_eof() {
        let spec = CommandSpec::new("sh").args(["-c", "printf 'hello world'"]);
        let mut stream = CommandStream::spawn(&spec).unwrap();

        let mut collected = Vec::new();
        loop {
            let chunk = stream.read_chunk(4).await.unwrap();
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= 4);
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"hello world");
        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_command_stream_reports_failed_exit() {
        let spec = CommandSpec::new("sh").args(["-c", "printf 'abc'; exit 1"]);
        let mut stream = CommandStream::spawn(&spec).unwrap();

        let mut result = Ok(Bytes::new());
        for _ in 0..10 {
            result = stream.read_chunk(16).await;
            match &result {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        assert!(matches!(result, Err(CatalogError::Unavailable { .. })));
    }

    #[test]
    fn test_parse_registration_id() {
        assert_eq!(
            parse_registration_id("Using grid catalog type: lfc\nguid:abc-123\n"),
            Some("abc-123".to_string())
        );
        assert_eq!(parse_registration_id("nothing here"), None);
    }
}
