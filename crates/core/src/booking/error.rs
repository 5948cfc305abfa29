//! Error types for the booking engine.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::transaction::StoreError;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Booking not found: {0}")]
    NotFound(i64),

    #[error("Booking {id} is still staging ({observed} of {expected} bytes)")]
    NotReady { id: i64, observed: u64, expected: u64 },

    #[error("Booking {0} was orphaned: its transfer stopped before completion")]
    Orphaned(i64),

    #[error("Booking {0} is closed")]
    Closed(i64),

    #[error("Transaction {0} has no credential proxy")]
    MissingProxy(i64),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}
