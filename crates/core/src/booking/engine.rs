//! Booking engine: book, poll and close staged downloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cleanup::{create_staging_dir, discard_staged, file_size};
use super::error::BookingError;
use super::types::{BookingState, BookingStatus, CloseReport};
use crate::catalog::{CatalogGateway, RemoteFile};
use crate::metrics::{
    BOOKINGS_CLOSED, BOOKINGS_CREATED, BOOKINGS_ORPHANED, BOOKING_POLLS, CATALOG_FAILURES,
};
use crate::process::{ProcessHandle, ProcessRunner};
use crate::transaction::{
    ActionKind, BookingRecord, NewBooking, TransactionContext, TransactionStore, DISCARDED_SIZE,
};

const STAGING_PREFIX: &str = "booking-";

/// Drives the booking state machine.
///
/// Holds no per-booking state: everything it needs is in the store, on
/// disk, or in the process table.
pub struct BookingEngine {
    store: Arc<dyn TransactionStore>,
    catalog: Arc<dyn CatalogGateway>,
    processes: Arc<dyn ProcessRunner>,
    staging_root: PathBuf,
    base_url: String,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        catalog: Arc<dyn CatalogGateway>,
        processes: Arc<dyn ProcessRunner>,
        staging_root: PathBuf,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            processes,
            staging_root,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Where a ready booking can be downloaded from.
    pub fn completion_url(&self, transaction_id: i64, booking_id: i64) -> String {
        format!(
            "{}/api/v1/transactions/{}/bookings/{}/download",
            self.base_url, transaction_id, booking_id
        )
    }

    /// Starts staging `file_name` and persists the booking.
    ///
    /// The staging directory is removed again if the launch or the
    /// bookkeeping fails.
    pub async fn book(
        &self,
        ctx: &TransactionContext,
        file_name: &str,
    ) -> Result<BookingRecord, BookingError> {
        let transaction_id = ctx.transaction.id;
        let catalog_ctx = ctx
            .catalog_context()
            .ok_or(BookingError::MissingProxy(transaction_id))?;
        let name = staged_name(file_name)?;

        let dir = create_staging_dir(&self.staging_root, STAGING_PREFIX).await?;
        let dest = dir.join(name);
        let remote = RemoteFile::InScope(file_name.to_string());

        let transfer = match self.catalog.fetch_to_local(&catalog_ctx, &remote, &dest).await {
            Ok(transfer) => transfer,
            Err(e) => {
                CATALOG_FAILURES.with_label_values(&["book"]).inc();
                discard_staged(&dest).await;
                return Err(e.into());
            }
        };

        let record = match self.store.create_booking(NewBooking {
            transaction_id,
            remote_file: file_name.to_string(),
            local_path: dest.clone(),
            expected_size: transfer.expected_size,
            process_handle: transfer.handle,
        }) {
            Ok(record) => record,
            Err(e) => {
                self.kill_transfer(transfer.handle).await;
                discard_staged(&dest).await;
                return Err(e.into());
            }
        };

        BOOKINGS_CREATED.inc();
        info!(
            transaction_id,
            booking_id = record.booking.id,
            file = %file_name,
            expected_size = transfer.expected_size,
            handle = %transfer.handle,
            "Booking created"
        );
        Ok(record)
    }

    /// Re-evaluates every open booking of the transaction's user and
    /// application.
    pub async fn poll(&self, ctx: &TransactionContext) -> Result<Vec<BookingStatus>, BookingError> {
        let records = self
            .store
            .open_bookings(ctx.user.id, ctx.application.id)?;

        let mut statuses = Vec::with_capacity(records.len());
        for record in records {
            if let Some(status) = self.evaluate(record).await? {
                BOOKING_POLLS.with_label_values(&[status.state.as_str()]).inc();
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    /// Closes the given bookings, or every open one when `ids` is `None`.
    ///
    /// Unknown or foreign ids fail before anything changes. Bookings that
    /// are already Closed or Orphaned are skipped.
    pub async fn close(
        &self,
        ctx: &TransactionContext,
        ids: Option<&[i64]>,
    ) -> Result<CloseReport, BookingError> {
        let mut report = CloseReport::default();

        let targets = match ids {
            None => self
                .store
                .open_bookings(ctx.user.id, ctx.application.id)?,
            Some(ids) => {
                let mut targets: Vec<BookingRecord> = Vec::new();
                for &id in ids {
                    let record = self.owned_booking(ctx, id)?;
                    if !record.is_open() {
                        report.skipped.push(id);
                    } else if !targets.iter().any(|t| t.booking.id == id) {
                        targets.push(record);
                    }
                }
                targets
            }
        };

        for record in &targets {
            if self.group_alive(record.booking.process_handle).await {
                self.kill_transfer(record.booking.process_handle).await;
            }
        }

        let ids: Vec<i64> = targets.iter().map(|r| r.booking.id).collect();
        let closed = if ids.is_empty() {
            Vec::new()
        } else {
            self.store.close_bookings(&ids)?
        };

        for record in &targets {
            if !closed.contains(&record.booking.id) {
                // Settled by a concurrent poll or download in the meantime.
                report.skipped.push(record.booking.id);
                continue;
            }
            if let Some(path) = &record.action.local_path {
                report.cleanup_failures.extend(discard_staged(path).await);
            }
        }

        BOOKINGS_CLOSED
            .with_label_values(&["close"])
            .inc_by(closed.len() as u64);
        info!(
            transaction_id = ctx.transaction.id,
            closed = ?closed,
            skipped = ?report.skipped,
            cleanup_failures = report.cleanup_failures.len(),
            "Bookings closed"
        );
        report.closed = closed;
        Ok(report)
    }

    /// A booking owned by the transaction's user and application.
    pub fn owned_booking(
        &self,
        ctx: &TransactionContext,
        booking_id: i64,
    ) -> Result<BookingRecord, BookingError> {
        let record = self
            .store
            .get_booking(booking_id)?
            .ok_or(BookingError::NotFound(booking_id))?;
        let owner = self
            .store
            .get_transaction(record.booking.transaction_id)?
            .ok_or(BookingError::NotFound(booking_id))?;
        if owner.user_id != ctx.user.id || owner.application_id != ctx.application.id {
            return Err(BookingError::NotFound(booking_id));
        }
        Ok(record)
    }

    /// A booking whose file is fully staged, with the staged path.
    pub async fn ready_booking(
        &self,
        ctx: &TransactionContext,
        booking_id: i64,
    ) -> Result<(BookingRecord, PathBuf), BookingError> {
        let record = self.owned_booking(ctx, booking_id)?;
        match record.action.kind {
            ActionKind::Book => {}
            ActionKind::Orphaned => return Err(BookingError::Orphaned(booking_id)),
            _ => return Err(BookingError::Closed(booking_id)),
        }
        let path = record
            .action
            .local_path
            .clone()
            .ok_or(BookingError::Orphaned(booking_id))?;

        let observed = file_size(&path).await?;
        if observed < record.booking.expected_size {
            return Err(BookingError::NotReady {
                id: booking_id,
                observed,
                expected: record.booking.expected_size,
            });
        }
        Ok((record, path))
    }

    /// Derives the state of a booking loaded as open.
    ///
    /// Returns `None` when the booking turns out to have been closed since it
    /// was loaded.
    async fn evaluate(&self, record: BookingRecord) -> Result<Option<BookingStatus>, BookingError> {
        let Some(path) = record.action.local_path.clone() else {
            return self.orphan(record, "process_gone").await;
        };
        let booking = &record.booking;
        let expected = booking.expected_size;
        let recorded = booking.observed_size.max(0) as u64;

        let mut observed = file_size(&path).await?;

        if observed < recorded {
            warn!(
                booking_id = booking.id,
                recorded,
                observed,
                "Staged file shrank, discarding booking"
            );
            if self.transfer_alive(booking.process_handle).await {
                self.kill_transfer(booking.process_handle).await;
            }
            return self.orphan(record, "file_shrank").await;
        }

        if observed < expected && !self.transfer_alive(booking.process_handle).await {
            // The copy may have finished between the size check and the
            // liveness check.
            observed = file_size(&path).await?;
            if observed < expected {
                return self.orphan(record, "process_gone").await;
            }
        }

        if observed > recorded && !self.store.update_observed_size(booking.id, observed as i64)? {
            return self.settled(booking.id);
        }

        let mut completion_url = booking.completion_url.clone();
        let state = if observed >= expected {
            if completion_url.is_none() {
                let url = self.completion_url(booking.transaction_id, booking.id);
                if !self.store.set_completion_url(booking.id, &url)? {
                    return self.settled(booking.id);
                }
                info!(booking_id = booking.id, url = %url, "Booking ready");
                completion_url = Some(url);
            }
            BookingState::Ready
        } else {
            BookingState::Polling
        };

        debug!(booking_id = booking.id, observed, expected, state = state.as_str(), "Booking polled");
        Ok(Some(BookingStatus {
            booking_id: booking.id,
            action_id: record.action.id,
            transaction_id: booking.transaction_id,
            file_name: display_name(&record.action.remote_file),
            expected_size: expected,
            observed_size: observed as i64,
            completion_url,
            state,
        }))
    }

    async fn orphan(
        &self,
        record: BookingRecord,
        reason: &'static str,
    ) -> Result<Option<BookingStatus>, BookingError> {
        let booking = &record.booking;
        if !self.store.mark_orphaned(booking.id)? {
            return self.settled(booking.id);
        }
        if let Some(path) = &record.action.local_path {
            discard_staged(path).await;
        }

        BOOKINGS_ORPHANED.with_label_values(&[reason]).inc();
        warn!(
            booking_id = booking.id,
            transaction_id = booking.transaction_id,
            handle = %booking.process_handle,
            reason,
            "Booking orphaned"
        );

        Ok(Some(orphaned_status(&record)))
    }

    /// Status of a booking another request moved out of the Book stage.
    fn settled(&self, booking_id: i64) -> Result<Option<BookingStatus>, BookingError> {
        let record = self
            .store
            .get_booking(booking_id)?
            .ok_or(BookingError::NotFound(booking_id))?;
        debug!(booking_id, kind = ?record.action.kind, "Booking settled concurrently");
        Ok(match record.action.kind {
            ActionKind::Orphaned => Some(orphaned_status(&record)),
            _ => None,
        })
    }

    /// Liveness of a transfer. An unreadable process table counts as alive
    /// so a booking is never orphaned on a failed inspection.
    async fn transfer_alive(&self, handle: ProcessHandle) -> bool {
        match self
            .processes
            .is_alive(handle, self.catalog.transfer_signature())
            .await
        {
            Ok(alive) => alive,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Could not inspect transfer process");
                true
            }
        }
    }

    /// Whether anything still runs in the transfer's process group. An
    /// unreadable process table counts as alive.
    async fn group_alive(&self, handle: ProcessHandle) -> bool {
        match self.processes.group_alive(handle).await {
            Ok(alive) => alive,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Could not inspect transfer group");
                true
            }
        }
    }

    async fn kill_transfer(&self, handle: ProcessHandle) {
        if let Err(e) = self.processes.kill_tree(handle).await {
            warn!(handle = %handle, error = %e, "Failed to kill transfer");
        }
    }
}

/// Validates that a booked name is a single path component.
pub(crate) fn staged_name(file_name: &str) -> Result<&str, BookingError> {
    let valid = !file_name.is_empty()
        && Path::new(file_name).file_name().and_then(|n| n.to_str()) == Some(file_name);
    if valid {
        Ok(file_name)
    } else {
        Err(BookingError::InvalidFileName(file_name.to_string()))
    }
}

fn orphaned_status(record: &BookingRecord) -> BookingStatus {
    BookingStatus {
        booking_id: record.booking.id,
        action_id: record.action.id,
        transaction_id: record.booking.transaction_id,
        file_name: display_name(&record.action.remote_file),
        expected_size: record.booking.expected_size,
        observed_size: DISCARDED_SIZE,
        completion_url: None,
        state: BookingState::Orphaned,
    }
}

fn display_name(remote_file: &str) -> String {
    remote_file
        .rsplit('/')
        .next()
        .unwrap_or(remote_file)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockCatalog, MockProcessRunner};
    use crate::transaction::SqliteTransactionStore;
    use tempfile::TempDir;

    struct Harness {
        _root: TempDir,
        staging: PathBuf,
        store: Arc<SqliteTransactionStore>,
        runner: Arc<MockProcessRunner>,
        catalog: Arc<MockCatalog>,
        engine: BookingEngine,
        ctx: TransactionContext,
    }

    impl Harness {
        async fn new() -> Self {
            let root = TempDir::new().unwrap();
            let staging = root.path().join("staging");
            let store = Arc::new(SqliteTransactionStore::in_memory().unwrap());
            let infra = store.upsert_infrastructure(&fixtures::infrastructure()).unwrap();
            let app = store
                .upsert_application(
                    &crate::config::ApplicationConfig {
                        name: "astro".to_string(),
                        catalog_dir: "astro".to_string(),
                        infrastructure: "gridit".to_string(),
                    },
                    infra.id,
                )
                .unwrap();
            let user = store.upsert_user("alice").unwrap();
            let tx = store.begin_transaction(user.id, app.id, None).unwrap();
            store.set_proxy(tx.id, Path::new("/tmp/proxy-test")).unwrap();
            let ctx = store.transaction_context(tx.id).unwrap().unwrap();

            let runner = Arc::new(MockProcessRunner::new());
            let catalog = Arc::new(MockCatalog::new(runner.clone()));
            let engine = BookingEngine::new(
                store.clone(),
                catalog.clone(),
                runner.clone(),
                staging.clone(),
                "http://fileport.example.org:8088/",
            );

            Self {
                _root: root,
                staging,
                store,
                runner,
                catalog,
                engine,
                ctx,
            }
        }

        async fn add(&self, name: &str, size: usize) {
            self.catalog
                .add_file(&fixtures::scoped_path(name), vec![7u8; size])
                .await;
        }

        fn staged_path(&self, record: &BookingRecord) -> PathBuf {
            record.action.local_path.clone().unwrap()
        }
    }

    fn write_bytes(path: &Path, n: usize) {
        std::fs::write(path, vec![7u8; n]).unwrap();
    }

    #[tokio::test]
    async fn test_book_persists_booking_and_launches_transfer() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;

        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        assert_eq!(record.booking.expected_size, 1000);
        assert_eq!(record.action.kind, ActionKind::Book);

        let path = h.staged_path(&record);
        assert!(path.starts_with(&h.staging));
        assert_eq!(path.file_name().unwrap(), "data.csv");
        assert!(path.parent().unwrap().is_dir());
        assert!(h
            .runner
            .is_alive(record.booking.process_handle, "lcg-cp")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_book_unknown_file_is_catalog_failure_and_cleans_up() {
        let h = Harness::new().await;

        let err = h.engine.book(&h.ctx, "missing.bin").await.unwrap_err();
        assert!(matches!(err, BookingError::Catalog(_)));

        let leftovers = std::fs::read_dir(&h.staging).unwrap().count();
        assert_eq!(leftovers, 0);
        assert!(h.store.open_bookings(h.ctx.user.id, h.ctx.application.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_book_rejects_path_like_names() {
        let h = Harness::new().await;
        for name in ["", "../etc/passwd", "a/b", ".."] {
            let err = h.engine.book(&h.ctx, name).await.unwrap_err();
            assert!(matches!(err, BookingError::InvalidFileName(_)), "{name}");
        }
    }

    #[tokio::test]
    async fn test_book_without_proxy_fails() {
        let h = Harness::new().await;
        let mut ctx = h.ctx.clone();
        ctx.transaction.proxy_path = None;
        let err = h.engine.book(&ctx, "data.csv").await.unwrap_err();
        assert!(matches!(err, BookingError::MissingProxy(_)));
    }

    #[tokio::test]
    async fn test_poll_progress_then_ready_then_close() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        let path = h.staged_path(&record);

        // Transfer alive, 400 bytes on disk.
        write_bytes(&path, 400);
        let statuses = h.engine.poll(&h.ctx).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, BookingState::Polling);
        assert_eq!(statuses[0].observed_size, 400);
        assert_eq!(statuses[0].completion_url, None);

        // Transfer exits after writing everything.
        write_bytes(&path, 1000);
        h.runner.terminate(record.booking.process_handle).await;
        let statuses = h.engine.poll(&h.ctx).await.unwrap();
        assert_eq!(statuses[0].state, BookingState::Ready);
        assert_eq!(statuses[0].observed_size, 1000);
        let expected_url = format!(
            "http://fileport.example.org:8088/api/v1/transactions/{}/bookings/{}/download",
            h.ctx.transaction.id, record.booking.id
        );
        assert_eq!(statuses[0].completion_url.as_deref(), Some(expected_url.as_str()));

        let report = h.engine.close(&h.ctx, None).await.unwrap();
        assert_eq!(report.closed, vec![record.booking.id]);
        assert!(report.cleanup_failures.is_empty());
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());

        let closed = h.store.get_booking(record.booking.id).unwrap().unwrap();
        assert_eq!(closed.action.kind, ActionKind::Close);
        assert!(h.engine.poll(&h.ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_transfer_is_orphaned() {
        let h = Harness::new().await;
        h.add("x.bin", 500).await;
        let record = h.engine.book(&h.ctx, "x.bin").await.unwrap();
        let path = h.staged_path(&record);

        write_bytes(&path, 120);
        h.runner.terminate(record.booking.process_handle).await;

        let statuses = h.engine.poll(&h.ctx).await.unwrap();
        assert_eq!(statuses[0].state, BookingState::Orphaned);
        assert_eq!(statuses[0].observed_size, DISCARDED_SIZE);
        assert_eq!(statuses[0].completion_url, None);
        assert!(!path.exists());

        let stored = h.store.get_booking(record.booking.id).unwrap().unwrap();
        assert_eq!(stored.action.kind, ActionKind::Orphaned);
        assert_eq!(stored.booking.observed_size, DISCARDED_SIZE);
        assert_eq!(stored.booking.completion_url, None);

        // Terminal: later polls no longer report it.
        assert!(h.engine.poll(&h.ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shrinking_file_is_orphaned_and_transfer_killed() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        let path = h.staged_path(&record);

        write_bytes(&path, 600);
        h.engine.poll(&h.ctx).await.unwrap();

        write_bytes(&path, 100);
        let statuses = h.engine.poll(&h.ctx).await.unwrap();
        assert_eq!(statuses[0].state, BookingState::Orphaned);
        assert_eq!(h.runner.killed().await, vec![record.booking.process_handle]);
    }

    #[tokio::test]
    async fn test_transfer_finishing_during_poll_is_ready() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        let path = h.staged_path(&record);

        write_bytes(&path, 400);
        h.runner
            .finish_on_next_check(record.booking.process_handle, &path, vec![7u8; 1000])
            .await;

        let status = h.engine.poll(&h.ctx).await.unwrap().remove(0);
        assert_eq!(status.state, BookingState::Ready);
        assert_eq!(status.observed_size, 1000);
        assert!(status.completion_url.is_some());
        assert!(path.exists());

        let stored = h.store.get_booking(record.booking.id).unwrap().unwrap();
        assert_eq!(stored.action.kind, ActionKind::Book);
        assert_eq!(stored.booking.observed_size, 1000);
        assert_eq!(stored.booking.completion_url, status.completion_url);
    }

    #[tokio::test]
    async fn test_stale_poll_does_not_reopen_closed_booking() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        write_bytes(&h.staged_path(&record), 400);
        h.engine.poll(&h.ctx).await.unwrap();

        // A poll loaded the booking before a close removed its file.
        let stale = h
            .store
            .open_bookings(h.ctx.user.id, h.ctx.application.id)
            .unwrap()
            .remove(0);
        h.engine.close(&h.ctx, None).await.unwrap();

        assert_eq!(h.engine.evaluate(stale).await.unwrap(), None);
        let stored = h.store.get_booking(record.booking.id).unwrap().unwrap();
        assert_eq!(stored.action.kind, ActionKind::Close);
        assert_eq!(stored.booking.observed_size, 400);
    }

    #[tokio::test]
    async fn test_stale_poll_reports_concurrent_orphan() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        let path = h.staged_path(&record);
        write_bytes(&path, 1000);

        let stale = h
            .store
            .open_bookings(h.ctx.user.id, h.ctx.application.id)
            .unwrap()
            .remove(0);
        h.store.mark_orphaned(record.booking.id).unwrap();

        // The file is complete, but the booking already left the Book stage.
        let status = h.engine.evaluate(stale).await.unwrap().unwrap();
        assert_eq!(status.state, BookingState::Orphaned);
        assert_eq!(status.observed_size, DISCARDED_SIZE);
        let stored = h.store.get_booking(record.booking.id).unwrap().unwrap();
        assert_eq!(stored.booking.completion_url, None);
    }

    #[tokio::test]
    async fn test_close_kills_group_left_by_exited_leader() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        h.runner.exit_leader(record.booking.process_handle).await;

        let report = h.engine.close(&h.ctx, None).await.unwrap();
        assert_eq!(report.closed, vec![record.booking.id]);
        assert_eq!(h.runner.killed().await, vec![record.booking.process_handle]);
        assert!(!h
            .runner
            .group_alive(record.booking.process_handle)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_observed_size_never_decreases_across_polls() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        let path = h.staged_path(&record);

        let mut last = 0;
        for size in [0, 10, 10, 250, 700, 700, 1000] {
            write_bytes(&path, size);
            let status = h.engine.poll(&h.ctx).await.unwrap().remove(0);
            assert!(status.observed_size >= last);
            last = status.observed_size;

            let stored = h.store.get_booking(record.booking.id).unwrap().unwrap();
            assert_eq!(stored.booking.observed_size, size as i64);
        }
        assert_eq!(last, 1000);
    }

    #[tokio::test]
    async fn test_larger_than_expected_counts_as_ready() {
        let h = Harness::new().await;
        h.add("data.csv", 10).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        write_bytes(&h.staged_path(&record), 12);

        let status = h.engine.poll(&h.ctx).await.unwrap().remove(0);
        assert_eq!(status.state, BookingState::Ready);
    }

    #[tokio::test]
    async fn test_close_without_polling_releases_everything() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        let path = h.staged_path(&record);
        write_bytes(&path, 10);

        let report = h.engine.close(&h.ctx, Some(&[record.booking.id])).await.unwrap();
        assert_eq!(report.closed, vec![record.booking.id]);
        assert_eq!(h.runner.killed().await, vec![record.booking.process_handle]);
        assert_eq!(h.runner.alive_count().await, 0);
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        let ids = [record.booking.id];

        h.engine.close(&h.ctx, Some(&ids)).await.unwrap();
        let again = h.engine.close(&h.ctx, Some(&ids)).await.unwrap();
        assert!(again.closed.is_empty());
        assert_eq!(again.skipped, vec![record.booking.id]);

        let all = h.engine.close(&h.ctx, None).await.unwrap();
        assert!(all.closed.is_empty());
    }

    #[tokio::test]
    async fn test_close_unknown_id_changes_nothing() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();

        let err = h
            .engine
            .close(&h.ctx, Some(&[record.booking.id, 9999]))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound(9999)));
        assert!(h.store.get_booking(record.booking.id).unwrap().unwrap().is_open());
        assert!(h.runner.killed().await.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_booking_is_not_found() {
        let h = Harness::new().await;
        h.add("data.csv", 1000).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();

        let bob = h.store.upsert_user("bob").unwrap();
        let tx = h
            .store
            .begin_transaction(bob.id, h.ctx.application.id, None)
            .unwrap();
        h.store.set_proxy(tx.id, Path::new("/tmp/proxy-bob")).unwrap();
        let bob_ctx = h.store.transaction_context(tx.id).unwrap().unwrap();

        assert!(h.engine.poll(&bob_ctx).await.unwrap().is_empty());
        let err = h
            .engine
            .close(&bob_ctx, Some(&[record.booking.id]))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ready_booking_checks_state() {
        let h = Harness::new().await;
        h.add("data.csv", 100).await;
        let record = h.engine.book(&h.ctx, "data.csv").await.unwrap();
        let path = h.staged_path(&record);

        write_bytes(&path, 50);
        let err = h.engine.ready_booking(&h.ctx, record.booking.id).await.unwrap_err();
        assert!(matches!(err, BookingError::NotReady { observed: 50, expected: 100, .. }));

        write_bytes(&path, 100);
        let (ready, staged) = h.engine.ready_booking(&h.ctx, record.booking.id).await.unwrap();
        assert_eq!(ready.booking.id, record.booking.id);
        assert_eq!(staged, path);

        h.engine.close(&h.ctx, None).await.unwrap();
        let err = h.engine.ready_booking(&h.ctx, record.booking.id).await.unwrap_err();
        assert!(matches!(err, BookingError::Closed(_)));
    }

    #[tokio::test]
    async fn test_ready_booking_reports_orphaned() {
        let h = Harness::new().await;
        h.add("x.bin", 500).await;
        let record = h.engine.book(&h.ctx, "x.bin").await.unwrap();
        h.runner.terminate(record.booking.process_handle).await;
        h.engine.poll(&h.ctx).await.unwrap();

        let err = h.engine.ready_booking(&h.ctx, record.booking.id).await.unwrap_err();
        assert!(matches!(err, BookingError::Orphaned(_)));
    }
}
