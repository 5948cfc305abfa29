//! The file service: every client-facing operation in one place.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::ServiceError;
use crate::booking::{
    create_staging_dir, discard_staged, staged_name, BookingEngine, BookingStatus, CloseReport,
};
use crate::catalog::{
    CatalogContext, CatalogEntry, CatalogGateway, LocationRegistration, RemoteFile,
};
use crate::config::{Config, RegistryConfig, StagingConfig};
use crate::metrics::CATALOG_FAILURES;
use crate::process::ProcessRunner;
use crate::proxy::{discard_proxy, proxy_path, ProxyIssuer};
use crate::transaction::{
    ActionKind, BookingRecord, FixedDownload, Transaction, TransactionContext, TransactionStore,
};
use crate::transfer::{
    CatalogStreamSource, StagedFileSource, StagedFinalizer, StagingWriter, Transfer, TransferMode,
};

const FIXED_PREFIX: &str = "fixed-";

/// Composes the store, catalog, proxy issuer and booking engine into the
/// operations exposed over HTTP.
pub struct FileService {
    store: Arc<dyn TransactionStore>,
    catalog: Arc<dyn CatalogGateway>,
    processes: Arc<dyn ProcessRunner>,
    issuer: Arc<dyn ProxyIssuer>,
    bookings: BookingEngine,
    staging: StagingConfig,
    proxy_dir: PathBuf,
}

impl FileService {
    pub fn new(
        config: &Config,
        store: Arc<dyn TransactionStore>,
        catalog: Arc<dyn CatalogGateway>,
        processes: Arc<dyn ProcessRunner>,
        issuer: Arc<dyn ProxyIssuer>,
    ) -> Self {
        let bookings = BookingEngine::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&processes),
            config.staging.root.clone(),
            config.server.base_url(),
        );
        Self {
            store,
            catalog,
            processes,
            issuer,
            bookings,
            staging: config.staging.clone(),
            proxy_dir: config.proxy.dir.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogGateway> {
        &self.catalog
    }

    /// Loads users, applications and infrastructures from configuration.
    pub fn seed_registry(&self, registry: &RegistryConfig) -> Result<(), ServiceError> {
        let mut infrastructures = HashMap::new();
        for infra in &registry.infrastructures {
            let stored = self.store.upsert_infrastructure(infra)?;
            infrastructures.insert(infra.name.as_str(), stored.id);
        }
        for app in &registry.applications {
            let infra_id = infrastructures
                .get(app.infrastructure.as_str())
                .copied()
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Application '{}' references unknown infrastructure '{}'",
                        app.name, app.infrastructure
                    ))
                })?;
            self.store.upsert_application(app, infra_id)?;
        }
        for user in &registry.users {
            self.store.upsert_user(&user.name)?;
        }
        info!(
            infrastructures = registry.infrastructures.len(),
            applications = registry.applications.len(),
            users = registry.users.len(),
            "Registry seeded"
        );
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Opens a transaction and issues its credential proxy.
    pub async fn begin(
        &self,
        user: &str,
        application: &str,
        client_ip: Option<&str>,
    ) -> Result<Transaction, ServiceError> {
        let user = self
            .store
            .find_user(user)?
            .ok_or_else(|| ServiceError::NotFound(format!("Unknown user: {}", user)))?;
        let application = self.store.find_application(application)?.ok_or_else(|| {
            ServiceError::NotFound(format!("Unknown application: {}", application))
        })?;

        let transaction = self
            .store
            .begin_transaction(user.id, application.id, client_ip)?;
        let transaction = self.attach_proxy(transaction.id).await?;
        info!(
            transaction_id = transaction.id,
            user = %user.name,
            application = %application.name,
            "Transaction started"
        );
        Ok(transaction)
    }

    /// Ends a transaction. Returns false if it had already ended.
    pub async fn end(&self, transaction_id: i64) -> Result<bool, ServiceError> {
        let transaction = self.store.get_transaction(transaction_id)?.ok_or_else(|| {
            ServiceError::NotFound(format!("Transaction not found: {}", transaction_id))
        })?;
        if !transaction.is_open() {
            debug!(transaction_id, "Transaction already ended");
            return Ok(false);
        }

        for action in self.store.actions_for(transaction_id)? {
            if !matches!(action.kind, ActionKind::Download | ActionKind::FixedDownload) {
                continue;
            }
            if let Some(path) = &action.local_path {
                discard_staged(path).await;
            }
        }

        let closed = self.store.close_transaction(transaction_id)?;
        if let Some(proxy) = &transaction.proxy_path {
            discard_proxy(proxy).await;
        }
        info!(transaction_id, "Transaction ended");
        Ok(closed)
    }

    // =========================================================================
    // Catalog operations
    // =========================================================================

    pub async fn list(&self, transaction_id: i64) -> Result<Vec<CatalogEntry>, ServiceError> {
        let (_, catalog_ctx) = self.open_context(transaction_id)?;
        self.catalog
            .list(&catalog_ctx)
            .await
            .map_err(|e| catalog_failure("list", e))
    }

    /// Streams a file straight from the catalog.
    pub async fn download(
        &self,
        transaction_id: i64,
        file_name: &str,
    ) -> Result<Transfer, ServiceError> {
        let (_, catalog_ctx) = self.open_context(transaction_id)?;
        let name = staged_name(file_name)?;
        let remote = RemoteFile::InScope(name.to_string());

        let entry = self
            .catalog
            .stat(&catalog_ctx, &remote)
            .await
            .map_err(|e| catalog_failure("download", e))?;
        let stream = self
            .catalog
            .open_stream(&catalog_ctx, &remote)
            .await
            .map_err(|e| catalog_failure("download", e))?;
        self.store
            .record_action(transaction_id, ActionKind::Download, name, None)?;

        debug!(transaction_id, file = name, size = entry.size, "Streaming from catalog");
        let source = CatalogStreamSource::new(stream, entry.size, self.staging.catalog_chunk_size);
        Ok(Transfer::new(name, TransferMode::Catalog, Box::new(source)))
    }

    /// Removes a file and all its replicas. Returns the logical path.
    pub async fn delete(&self, transaction_id: i64, file_name: &str) -> Result<String, ServiceError> {
        let (_, catalog_ctx) = self.open_context(transaction_id)?;
        let name = staged_name(file_name)?;
        let logical = self
            .catalog
            .remove(&catalog_ctx, &RemoteFile::InScope(name.to_string()))
            .await
            .map_err(|e| catalog_failure("delete", e))?;
        self.store
            .record_action(transaction_id, ActionKind::Delete, &logical, None)?;
        info!(transaction_id, path = %logical, "File deleted");
        Ok(logical)
    }

    pub async fn locations(
        &self,
        transaction_id: i64,
        file_name: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let (_, catalog_ctx) = self.open_context(transaction_id)?;
        let name = staged_name(file_name)?;
        self.catalog
            .replicas(&catalog_ctx, &RemoteFile::InScope(name.to_string()))
            .await
            .map_err(|e| catalog_failure("locations", e))
    }

    /// Registers an external storage URL under a logical name.
    pub async fn register_location(
        &self,
        transaction_id: i64,
        surl: &str,
        file_name: &str,
        path: Option<&str>,
    ) -> Result<LocationRegistration, ServiceError> {
        let (_, catalog_ctx) = self.open_context(transaction_id)?;
        if surl.trim().is_empty() {
            return Err(ServiceError::BadRequest("Storage URL is required".to_string()));
        }
        let name = staged_name(file_name)?;
        let path = path.map(str::trim).filter(|p| !p.is_empty());

        let registration = self
            .catalog
            .register_location(&catalog_ctx, surl, name, path)
            .await
            .map_err(|e| catalog_failure("register", e))?;
        info!(
            transaction_id,
            surl,
            path = %registration.logical_path,
            catalog_id = %registration.catalog_id,
            "Location registered"
        );
        Ok(registration)
    }

    // =========================================================================
    // Bookings
    // =========================================================================

    pub async fn book(
        &self,
        transaction_id: i64,
        file_name: &str,
    ) -> Result<BookingRecord, ServiceError> {
        let (ctx, _) = self.open_context(transaction_id)?;
        Ok(self.bookings.book(&ctx, file_name).await?)
    }

    pub async fn poll(&self, transaction_id: i64) -> Result<Vec<BookingStatus>, ServiceError> {
        let (ctx, _) = self.open_context(transaction_id)?;
        Ok(self.bookings.poll(&ctx).await?)
    }

    pub async fn close(
        &self,
        transaction_id: i64,
        ids: Option<&[i64]>,
    ) -> Result<CloseReport, ServiceError> {
        let (ctx, _) = self.open_context(transaction_id)?;
        Ok(self.bookings.close(&ctx, ids).await?)
    }

    /// Streams a fully staged booking. Completion closes the booking and
    /// the transaction.
    pub async fn download_booked(
        &self,
        transaction_id: i64,
        booking_id: i64,
    ) -> Result<Transfer, ServiceError> {
        let (ctx, _) = self.open_context(transaction_id)?;
        let (record, path) = self.bookings.ready_booking(&ctx, booking_id).await?;

        self.store.record_action(
            transaction_id,
            ActionKind::DownloadBooked,
            &record.action.remote_file,
            Some(&path),
        )?;

        let finalizer = StagedFinalizer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.processes),
            transaction_id,
            path.clone(),
        )
        .with_proxy(ctx.transaction.proxy_path.clone())
        .with_booking(booking_id);

        let source = StagedFileSource::open(
            &path,
            record.booking.expected_size,
            self.staging.staged_chunk_size,
        )
        .await?
        .with_finalizer(finalizer);

        info!(transaction_id, booking_id, "Serving booked download");
        Ok(Transfer::new(
            record.action.remote_file,
            TransferMode::Staged,
            Box::new(source),
        ))
    }

    // =========================================================================
    // Fixed downloads
    // =========================================================================

    /// Creates a permanent link to an absolute catalog path.
    pub fn publish_fixed_download(
        &self,
        user: &str,
        application: &str,
        absolute_path: &str,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<FixedDownload, ServiceError> {
        let user = self
            .store
            .find_user(user)?
            .ok_or_else(|| ServiceError::NotFound(format!("Unknown user: {}", user)))?;
        let application = self.store.find_application(application)?.ok_or_else(|| {
            ServiceError::NotFound(format!("Unknown application: {}", application))
        })?;
        if !absolute_path.starts_with('/') {
            return Err(ServiceError::BadRequest(format!(
                "Not an absolute path: {}",
                absolute_path
            )));
        }
        Ok(self.store.register_fixed_download(
            user.id,
            application.id,
            absolute_path,
            valid_from,
            valid_until,
        )?)
    }

    /// Serves a permanent link: stages the file synchronously in a fresh
    /// transaction and streams it while the copy is still running.
    pub async fn fixed_download(
        &self,
        guid: &str,
        client_ip: Option<&str>,
    ) -> Result<Transfer, ServiceError> {
        let fixed = self
            .store
            .get_fixed_download(guid)?
            .filter(|f| f.is_valid_at(Utc::now()))
            .ok_or_else(|| ServiceError::NotFound(format!("Unknown download link: {}", guid)))?;

        let remote = RemoteFile::Absolute(fixed.absolute_path.clone());
        let name = staged_name(remote.file_name())?.to_string();

        let transaction =
            self.store
                .begin_transaction(fixed.user_id, fixed.application_id, client_ip)?;
        let transaction = self.attach_proxy(transaction.id).await?;
        let transaction_id = transaction.id;

        let catalog_ctx = match self.open_context(transaction_id) {
            Ok((_, catalog_ctx)) => catalog_ctx,
            Err(e) => {
                self.abandon(&transaction).await;
                return Err(e);
            }
        };

        let dir = match create_staging_dir(&self.staging.root, FIXED_PREFIX).await {
            Ok(dir) => dir,
            Err(e) => {
                self.abandon(&transaction).await;
                return Err(e.into());
            }
        };
        let dest = dir.join(&name);

        let staged = match self
            .catalog
            .fetch_to_local_sync(&catalog_ctx, &remote, &dest, self.staging.sync_wait())
            .await
        {
            Ok(staged) => staged,
            Err(e) => {
                discard_staged(&dest).await;
                self.abandon(&transaction).await;
                return Err(catalog_failure("fixed_download", e));
            }
        };

        let finalizer = StagedFinalizer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.processes),
            transaction_id,
            dest.clone(),
        )
        .with_proxy(transaction.proxy_path.clone())
        .with_writer(staged.handle);

        let prepared = self
            .store
            .record_action(
                transaction_id,
                ActionKind::FixedDownload,
                &fixed.absolute_path,
                Some(&dest),
            )
            .and_then(|_| self.store.increment_download_count(guid));
        if let Err(e) = prepared {
            finalizer.run().await;
            return Err(e.into());
        }

        let source = match StagedFileSource::open(
            &dest,
            staged.expected_size,
            self.staging.staged_chunk_size,
        )
        .await
        {
            Ok(source) => source,
            Err(e) => {
                finalizer.run().await;
                return Err(e.into());
            }
        };
        let source = source
            .with_writer(StagingWriter {
                handle: staged.handle,
                processes: Arc::clone(&self.processes),
                signature: self.catalog.transfer_signature().to_string(),
                poll_interval: self.staging.growth_poll_interval(),
            })
            .with_finalizer(finalizer);

        info!(
            transaction_id,
            guid,
            path = %fixed.absolute_path,
            size = staged.expected_size,
            "Serving fixed download"
        );
        Ok(Transfer::new(name, TransferMode::Staged, Box::new(source)))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Issues the transaction's proxy and persists its path. Closes the
    /// transaction when issuance fails.
    async fn attach_proxy(&self, transaction_id: i64) -> Result<Transaction, ServiceError> {
        let ctx = self.context(transaction_id)?;
        let path = proxy_path(&self.proxy_dir, transaction_id);

        if let Err(e) = self.issue_proxy(&ctx, &path).await {
            warn!(transaction_id, error = %e, "Proxy issuance failed, closing transaction");
            self.abandon(&ctx.transaction).await;
            discard_proxy(&path).await;
            return Err(e);
        }

        self.store.set_proxy(transaction_id, &path)?;
        self.store.get_transaction(transaction_id)?.ok_or_else(|| {
            ServiceError::NotFound(format!("Transaction not found: {}", transaction_id))
        })
    }

    async fn issue_proxy(&self, ctx: &TransactionContext, path: &Path) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all(&self.proxy_dir).await?;
        self.issuer
            .issue(&ctx.infrastructure.proxy_request(), path)
            .await?;
        Ok(())
    }

    /// Closes a transaction that could not be used and drops its proxy.
    async fn abandon(&self, transaction: &Transaction) {
        if let Err(e) = self.store.close_transaction(transaction.id) {
            warn!(transaction_id = transaction.id, error = %e, "Failed to close transaction");
        }
        if let Some(proxy) = &transaction.proxy_path {
            discard_proxy(proxy).await;
        }
    }

    fn context(&self, transaction_id: i64) -> Result<TransactionContext, ServiceError> {
        self.store
            .transaction_context(transaction_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction not found: {}", transaction_id)))
    }

    /// Resolves an open transaction with a proxy.
    fn open_context(
        &self,
        transaction_id: i64,
    ) -> Result<(TransactionContext, CatalogContext), ServiceError> {
        let ctx = self.context(transaction_id)?;
        if !ctx.transaction.is_open() {
            return Err(ServiceError::TransactionClosed(transaction_id));
        }
        let catalog_ctx = ctx
            .catalog_context()
            .ok_or(ServiceError::MissingProxy(transaction_id))?;
        Ok((ctx, catalog_ctx))
    }
}

fn catalog_failure(operation: &str, e: crate::catalog::CatalogError) -> ServiceError {
    CATALOG_FAILURES.with_label_values(&[operation]).inc();
    warn!(operation, error = %e, "Catalog operation failed");
    e.into()
}
