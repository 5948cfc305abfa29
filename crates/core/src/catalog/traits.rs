//! Trait definitions for the catalog module.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

use super::error::CatalogError;
use super::types::{CatalogContext, CatalogEntry, LocationRegistration, RemoteFile, StagingTransfer};
use crate::config::StagingWait;

/// Access to a remote file catalog.
///
/// Every operation may be retried after a failure except
/// `register_location`, which can create duplicate registrations.
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Returns the name of this catalog implementation.
    fn name(&self) -> &str;

    /// Logical path of a file for the given caller.
    fn logical_path(&self, ctx: &CatalogContext, file: &RemoteFile) -> String;

    /// Process-table signature of this catalog's staging transfers.
    fn transfer_signature(&self) -> &str;

    /// Lists the caller's files.
    async fn list(&self, ctx: &CatalogContext) -> Result<Vec<CatalogEntry>, CatalogError>;

    /// Looks up a single file.
    async fn stat(&self, ctx: &CatalogContext, file: &RemoteFile)
        -> Result<CatalogEntry, CatalogError>;

    /// Starts copying a file to `dest` in the background.
    ///
    /// Returns as soon as the copy is launched.
    async fn fetch_to_local(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
        dest: &Path,
    ) -> Result<StagingTransfer, CatalogError>;

    /// Starts copying a file to `dest` and waits until the first bytes land.
    ///
    /// Fails with `StagingTimeout` (after killing the copy) when nothing
    /// arrives within `wait`.
    async fn fetch_to_local_sync(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
        dest: &Path,
        wait: StagingWait,
    ) -> Result<StagingTransfer, CatalogError>;

    /// Removes a file and all its replicas. Returns the logical path removed.
    async fn remove(&self, ctx: &CatalogContext, file: &RemoteFile) -> Result<String, CatalogError>;

    /// Opens a read stream straight from the object store.
    async fn open_stream(
        &self,
        ctx: &CatalogContext,
        file: &RemoteFile,
    ) -> Result<Box<dyn CatalogStream>, CatalogError>;

    /// Storage URLs currently registered for a file.
    async fn replicas(&self, ctx: &CatalogContext, file: &RemoteFile)
        -> Result<Vec<String>, CatalogError>;

    /// Registers an external storage URL under a logical name.
    ///
    /// `path` replaces the caller's scope directory when given.
    async fn register_location(
        &self,
        ctx: &CatalogContext,
        surl: &str,
        file_name: &str,
        path: Option<&str>,
    ) -> Result<LocationRegistration, CatalogError>;
}

/// An open read handle on a catalog object.
///
/// Dropping the stream must release the underlying handle even when
/// `close` was never called.
#[async_trait]
pub trait CatalogStream: Send {
    /// Reads up to `max` bytes. An empty result means end of stream.
    async fn read_chunk(&mut self, max: usize) -> Result<Bytes, CatalogError>;

    /// Releases the handle. Calling it twice is harmless.
    async fn close(&mut self) -> Result<(), CatalogError>;
}
