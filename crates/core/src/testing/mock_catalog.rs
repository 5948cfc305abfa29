//! Mock catalog gateway for testing.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::catalog::{
    CatalogContext, CatalogEntry, CatalogError, CatalogGateway, CatalogStream,
    LocationRegistration, RemoteFile, StagingTransfer,
};
use crate::config::StagingWait;
use crate::process::{CommandSpec, ProcessRunner};

const SIGNATURE: &str = "lcg-cp";

#[derive(Debug, Clone)]
struct MockFile {
    content: Bytes,
    remark: String,
    replicas: Vec<String>,
}

/// A recorded location registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRegistration {
    pub surl: String,
    pub logical_path: String,
}

/// Mock implementation of the CatalogGateway trait.
///
/// Files live in memory under their full logical path. Staging transfers
/// are launched through the injected `ProcessRunner` (normally a
/// `MockProcessRunner`) so liveness can be controlled from the test, and
/// write nothing to disk unless `set_complete_on_fetch(true)` is set.
///
/// # Example
///
/// ```rust,ignore
/// let runner = Arc::new(MockProcessRunner::new());
/// let catalog = MockCatalog::new(runner.clone());
/// catalog.add_file("/grid/gridit/sgfs/astro/alice/data.csv", vec![0u8; 1000]).await;
/// ```
pub struct MockCatalog {
    runner: Arc<dyn ProcessRunner>,
    files: Arc<RwLock<BTreeMap<String, MockFile>>>,
    removed: Arc<RwLock<Vec<String>>>,
    registrations: Arc<RwLock<Vec<RecordedRegistration>>>,
    unavailable: Arc<RwLock<bool>>,
    complete_on_fetch: Arc<RwLock<bool>>,
    stall_staging: Arc<RwLock<bool>>,
    stream_fail_after: Arc<RwLock<Option<usize>>>,
    open_streams: Arc<AtomicUsize>,
    opened_streams: Arc<AtomicUsize>,
}

impl MockCatalog {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            files: Arc::new(RwLock::new(BTreeMap::new())),
            removed: Arc::new(RwLock::new(Vec::new())),
            registrations: Arc::new(RwLock::new(Vec::new())),
            unavailable: Arc::new(RwLock::new(false)),
            complete_on_fetch: Arc::new(RwLock::new(false)),
            stall_staging: Arc::new(RwLock::new(false)),
            stream_fail_after: Arc::new(RwLock::new(None)),
            open_streams: Arc::new(AtomicUsize::new(0)),
            opened_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a file under its full logical path.
    pub async fn add_file(&self, logical_path: &str, content: impl Into<Bytes>) {
        self.files.write().await.insert(
            logical_path.to_string(),
            MockFile {
                content: content.into(),
                remark: String::new(),
                replicas: vec![format!("srm://se.example.org{}", logical_path)],
            },
        );
    }

    /// Set the listing remark of an existing file.
    pub async fn set_remark(&self, logical_path: &str, remark: &str) {
        if let Some(file) = self.files.write().await.get_mut(logical_path) {
            file.remark = remark.to_string();
        }
    }

    /// Make every call fail as if the catalog were down.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    /// Write the whole file to the destination as soon as a fetch starts.
    pub async fn set_complete_on_fetch(&self, complete: bool) {
        *self.complete_on_fetch.write().await = complete;
    }

    /// Make synchronous staging never produce bytes.
    pub async fn set_stall_staging(&self, stall: bool) {
        *self.stall_staging.write().await = stall;
    }

    /// Make catalog streams fail once `bytes` have been read.
    pub async fn set_stream_fail_after(&self, bytes: Option<usize>) {
        *self.stream_fail_after.write().await = bytes;
    }

    pub async fn removed(&self) -> Vec<String> {
        self.removed.read().await.clone()
    }

    pub async fn registrations(&self) -> Vec<RecordedRegistration> {
        self.registrations.read().await.clone()
    }

    /// Streams opened and not yet closed or dropped.
    pub fn open_stream_count(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Streams opened in total.
    pub fn opened_stream_count(&self) -> usize {
        self.opened_streams.load(Ordering::SeqCst)
    }

    fn scope_dir(ctx: &CatalogContext) -> String {
        format!("/grid/{}/sgfs/{}/{}", ctx.vo, ctx.app_dir, ctx.user_name)
    }

    fn missing(command: &str, logical: &str) -> CatalogError {
        CatalogError::unavailable(
            format!("{} {}", command, logical),
            format!("{}: No such file or directory", logical),
            Some(1),
        )
    }

    async fn check_available(&self, command: &str) -> Result<(), CatalogError> {
        if *self.unavailable.read().await {
            return Err(CatalogError::unavailable(
                command,
                "Could not establish connection to catalog host",
                Some(1),
            ));
        }
        Ok(())
    }

    async fn lookup(&self, logical: &str, command: &str) -> Result<MockFile, CatalogError> {
        self.check_available(command).await?;
        self.files
            .read()
            .await
            .get(logical)
            .cloned()
            .ok_or_else(|| Self::missing(command, logical))
    }

    fn entry(name: &str, file: &MockFile) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            size: file.content.len() as u64,
            flags: "-rw-rw-r--".to_string(),
            date: "Mar 12 10:21".to_string(),
            remark: file.remark.clone(),
        }
    }
}

#[async_trait]
impl CatalogGateway for MockCatalog {
    fn name(&self) -> &str {
        "mock"
    }

    fn logical_path(&self, ctx: &CatalogContext, file: &RemoteFile) -> String {
        match file {
            RemoteFile::InScope(name) => format!("{}/{}", Self::scope_dir(ctx), name),
            RemoteFile::Absolute(path) => path.clone(),
        }
    }

    fn transfer_signature(&self) -> &str {
        SIGNATURE
    }

    async fn list(&self, ctx: &CatalogContext) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.check_available("lfc-ls").await?;
        let prefix = format!("{}/", Self::scope_dir(ctx));
        Ok(self
            .files
            .read()
            .await
            .iter()
            .filter_map(|(path, file)| {
                let name = path.strip_prefix(&prefix)?;
                (!name.contains('/')).then(|| Self::entry(name, file))
            })
            .collect())
    }

    async fn stat(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
    ) -> Result<CatalogEntry, CatalogError> {
        let logical = self.logical_path(ctx, file);
        let found = self.lookup(&logical, "lfc-ls -l").await?;
        Ok(Self::entry(&logical, &found))
    }

    async fn fetch_to_local(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
        dest: &Path,
    ) -> Result<StagingTransfer, CatalogError> {
        let logical = self.logical_path(ctx, file);
        let found = self.lookup(&logical, "lfc-ls -l").await?;

        let spec = CommandSpec::new(SIGNATURE)
            .arg(format!("lfn:{}", logical))
            .arg(format!("file:{}", dest.display()));
        let handle = self.runner.run_detached(&spec).await?;

        if *self.complete_on_fetch.read().await {
            tokio::fs::write(dest, &found.content).await?;
        }

        Ok(StagingTransfer {
            expected_size: found.content.len() as u64,
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
        let logical = self.logical_path(ctx, file);
        let found = self.lookup(&logical, "lfc-ls -l").await?;
        let transfer = self.fetch_to_local(ctx, file, dest).await?;

        if *self.stall_staging.read().await {
            self.runner.kill_tree(transfer.handle).await?;
            return Err(CatalogError::StagingTimeout {
                file: logical,
                waited_ms: wait.total().as_millis() as u64,
            });
        }

        tokio::fs::write(dest, &found.content).await?;
        Ok(transfer)
    }

    async fn remove(&self, ctx: &CatalogContext, file: &RemoteFile) -> Result<String, CatalogError> {
        let logical = self.logical_path(ctx, file);
        self.check_available("lcg-del -a").await?;
        if self.files.write().await.remove(&logical).is_none() {
            return Err(Self::missing("lcg-del -a", &logical));
        }
        self.removed.write().await.push(logical.clone());
        Ok(logical)
    }

    async fn open_stream(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
    ) -> Result<Box<dyn CatalogStream>, CatalogError> {
        let logical = self.logical_path(ctx, file);
        let found = self.lookup(&logical, "lcg-cp").await?;
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        self.opened_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            data: found.content,
            pos: 0,
            fail_after: *self.stream_fail_after.read().await,
            open: Some(self.open_streams.clone()),
        }))
    }

    async fn replicas(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
    ) -> Result<Vec<String>, CatalogError> {
        let logical = self.logical_path(ctx, file);
        Ok(self.lookup(&logical, "lcg-lr").await?.replicas)
    }

    async fn register_location(
        &self,
        ctx: &CatalogContext,
        surl: &str,
        file_name: &str,
        path: Option<&str>,
    ) -> Result<LocationRegistration, CatalogError> {
        self.check_available("lcg-rf").await?;
        let logical = match path {
            Some(path) => format!("/grid/{}/{}/{}", ctx.vo, path.trim_matches('/'), file_name),
            None => format!("{}/{}", Self::scope_dir(ctx), file_name),
        };
        let mut registrations = self.registrations.write().await;
        registrations.push(RecordedRegistration {
            surl: surl.to_string(),
            logical_path: logical.clone(),
        });
        Ok(LocationRegistration {
            catalog_id: format!("mock-guid-{}", registrations.len()),
            logical_path: logical,
        })
    }
}

/// In-memory catalog stream that tracks whether it was released.
struct MockStream {
    data: Bytes,
    pos: usize,
    fail_after: Option<usize>,
    open: Option<Arc<AtomicUsize>>,
}

impl MockStream {
    fn release(&mut self) {
        if let Some(open) = self.open.take() {
            open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl CatalogStream for MockStream {
    async fn read_chunk(&mut self, max: usize) -> Result<Bytes, CatalogError> {
        if let Some(limit) = self.fail_after {
            if self.pos >= limit {
                return Err(CatalogError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "storage element dropped the connection",
                )));
            }
        }
        let end = (self.pos + max).min(self.data.len());
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(chunk)
    }

    async fn close(&mut self) -> Result<(), CatalogError> {
        self.release();
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.release();
    }
}
