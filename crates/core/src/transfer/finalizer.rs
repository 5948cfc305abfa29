//! Release of everything a staged download holds.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::booking::discard_staged;
use crate::metrics::BOOKINGS_CLOSED;
use crate::process::{ProcessHandle, ProcessRunner};
use crate::proxy::discard_proxy;
use crate::transaction::TransactionStore;

/// Cleanup run once a staged download has ended, however it ended.
///
/// Kills the copy process group if anything in it still runs, closes the
/// booking (if any), deletes the staged file and its directory, closes the
/// transaction and deletes the transaction's proxy. Every step is
/// best-effort.
pub struct StagedFinalizer {
    store: Arc<dyn TransactionStore>,
    processes: Arc<dyn ProcessRunner>,
    transaction_id: i64,
    staged_path: PathBuf,
    proxy_path: Option<PathBuf>,
    booking_id: Option<i64>,
    writer: Option<ProcessHandle>,
}

impl StagedFinalizer {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        processes: Arc<dyn ProcessRunner>,
        transaction_id: i64,
        staged_path: PathBuf,
    ) -> Self {
        Self {
            store,
            processes,
            transaction_id,
            staged_path,
            proxy_path: None,
            booking_id: None,
            writer: None,
        }
    }

    pub fn with_proxy(mut self, proxy_path: Option<PathBuf>) -> Self {
        self.proxy_path = proxy_path;
        self
    }

    pub fn with_booking(mut self, booking_id: i64) -> Self {
        self.booking_id = Some(booking_id);
        self
    }

    pub fn with_writer(mut self, handle: ProcessHandle) -> Self {
        self.writer = Some(handle);
        self
    }

    pub async fn run(self) {
        if let Some(handle) = self.writer {
            match self.processes.group_alive(handle).await {
                Ok(false) => {}
                Ok(true) | Err(_) => {
                    if let Err(e) = self.processes.kill_tree(handle).await {
                        warn!(handle = %handle, error = %e, "Failed to kill staging transfer");
                    }
                }
            }
        }

        // An open booking always still has its staged file.
        if let Some(booking_id) = self.booking_id {
            match self.store.close_bookings(&[booking_id]) {
                Ok(closed) if !closed.is_empty() => {
                    BOOKINGS_CLOSED.with_label_values(&["download"]).inc()
                }
                Ok(_) => debug!(booking_id, "Downloaded booking was already settled"),
                Err(e) => warn!(booking_id, error = %e, "Failed to close downloaded booking"),
            }
        }

        discard_staged(&self.staged_path).await;

        if let Err(e) = self.store.close_transaction(self.transaction_id) {
            warn!(transaction_id = self.transaction_id, error = %e, "Failed to close transaction");
        }

        if let Some(proxy) = &self.proxy_path {
            discard_proxy(proxy).await;
        }

        info!(
            transaction_id = self.transaction_id,
            booking_id = ?self.booking_id,
            path = %self.staged_path.display(),
            "Staged download finalized"
        );
    }
}
