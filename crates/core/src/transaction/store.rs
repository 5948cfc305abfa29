//! Storage trait for transactions, actions and bookings.

use chrono::{DateTime, Utc};
use std::path::Path;

use super::error::StoreError;
use super::types::{
    Action, ActionKind, Application, BookingRecord, FixedDownload, Infrastructure, NewBooking,
    Transaction, TransactionContext, User,
};
use crate::config::{ApplicationConfig, InfrastructureConfig};

/// Persistence for the gateway's records.
///
/// Implementations must be safe to share across request handlers.
pub trait TransactionStore: Send + Sync {
    /// Inserts or updates an infrastructure by name.
    fn upsert_infrastructure(&self, config: &InfrastructureConfig)
        -> Result<Infrastructure, StoreError>;

    /// Inserts or updates an application by name.
    fn upsert_application(
        &self,
        config: &ApplicationConfig,
        infrastructure_id: i64,
    ) -> Result<Application, StoreError>;

    /// Inserts a user if it does not exist yet.
    fn upsert_user(&self, name: &str) -> Result<User, StoreError>;

    fn find_user(&self, name: &str) -> Result<Option<User>, StoreError>;

    fn find_application(&self, name: &str) -> Result<Option<Application>, StoreError>;

    /// Opens a transaction for a user and application.
    fn begin_transaction(
        &self,
        user_id: i64,
        application_id: i64,
        client_ip: Option<&str>,
    ) -> Result<Transaction, StoreError>;

    fn get_transaction(&self, id: i64) -> Result<Option<Transaction>, StoreError>;

    /// Associates the credential proxy file with a transaction.
    fn set_proxy(&self, id: i64, proxy_path: &Path) -> Result<(), StoreError>;

    /// Sets the close timestamp. Returns false if it was already closed.
    fn close_transaction(&self, id: i64) -> Result<bool, StoreError>;

    /// Resolves a transaction with its user, application and infrastructure.
    fn transaction_context(&self, id: i64) -> Result<Option<TransactionContext>, StoreError>;

    fn record_action(
        &self,
        transaction_id: i64,
        kind: ActionKind,
        remote_file: &str,
        local_path: Option<&Path>,
    ) -> Result<Action, StoreError>;

    fn actions_for(&self, transaction_id: i64) -> Result<Vec<Action>, StoreError>;

    /// Creates a Book action and its booking atomically.
    fn create_booking(&self, booking: NewBooking) -> Result<BookingRecord, StoreError>;

    fn get_booking(&self, id: i64) -> Result<Option<BookingRecord>, StoreError>;

    /// Bookings still in the Book stage for a user and application,
    /// across all of their transactions.
    fn open_bookings(&self, user_id: i64, application_id: i64)
        -> Result<Vec<BookingRecord>, StoreError>;

    /// Records the staged size of an open booking. Returns `false` when the
    /// booking has already been closed or orphaned.
    fn update_observed_size(&self, booking_id: i64, size: i64) -> Result<bool, StoreError>;

    /// Sets the completion URL of an open booking. Returns `false` when the
    /// booking has already been closed or orphaned.
    fn set_completion_url(&self, booking_id: i64, url: &str) -> Result<bool, StoreError>;

    /// Moves an open booking to Orphaned and stores the discarded size
    /// marker. Returns `false`, changing nothing, when the booking is no
    /// longer open.
    fn mark_orphaned(&self, booking_id: i64) -> Result<bool, StoreError>;

    /// Moves every listed open booking's action to Close in a single
    /// database transaction and returns the ids that moved. Bookings that
    /// are already Closed or Orphaned are left alone; unknown ids fail the
    /// whole call.
    fn close_bookings(&self, booking_ids: &[i64]) -> Result<Vec<i64>, StoreError>;

    /// Creates a permanent download link and returns it with its new guid.
    fn register_fixed_download(
        &self,
        user_id: i64,
        application_id: i64,
        absolute_path: &str,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<FixedDownload, StoreError>;

    fn get_fixed_download(&self, guid: &str) -> Result<Option<FixedDownload>, StoreError>;

    fn increment_download_count(&self, guid: &str) -> Result<(), StoreError>;
}
