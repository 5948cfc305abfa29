//! Error types for streaming transfers.

use thiserror::Error;

use crate::catalog::CatalogError;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Read error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Transfer truncated: {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
}
