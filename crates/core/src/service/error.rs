//! Error type for the service façade.

use thiserror::Error;

use crate::booking::BookingError;
use crate::catalog::CatalogError;
use crate::proxy::ProxyError;
use crate::transaction::StoreError;
use crate::transfer::TransferError;

/// Errors returned by `FileService` operations.
///
/// Each variant corresponds to one class of client-visible failure; the
/// HTTP layer maps them onto status codes.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Transaction {0} is closed")]
    TransactionClosed(i64),

    #[error("Transaction {0} has no credential proxy")]
    MissingProxy(i64),

    #[error("Could not obtain a credential proxy: {0}")]
    ProxyUnavailable(String),

    #[error("{message}")]
    CatalogUnavailable {
        message: String,
        command: Option<String>,
    },

    #[error("{0}")]
    StagingTimeout(String),

    #[error("{0}")]
    BookingNotReady(String),

    #[error("Booking {0} was orphaned: its transfer stopped before completion")]
    OrphanedTransfer(i64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::TransactionClosed(_) => "transaction_closed",
            ServiceError::MissingProxy(_) => "missing_proxy",
            ServiceError::ProxyUnavailable(_) => "proxy_unavailable",
            ServiceError::CatalogUnavailable { .. } => "catalog_unavailable",
            ServiceError::StagingTimeout(_) => "staging_timeout",
            ServiceError::BookingNotReady(_) => "booking_not_ready",
            ServiceError::OrphanedTransfer(_) => "orphaned_transfer",
            ServiceError::Internal(_) => "internal",
        }
    }

    /// The catalog command that failed, for catalog failures.
    pub fn command(&self) -> Option<&str> {
        match self {
            ServiceError::CatalogUnavailable { command, .. } => command.as_deref(),
            _ => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => ServiceError::NotFound(e.to_string()),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<CatalogError> for ServiceError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::StagingTimeout { .. } => ServiceError::StagingTimeout(e.to_string()),
            CatalogError::Unavailable {
                command, output, ..
            } => ServiceError::CatalogUnavailable {
                message: if output.trim().is_empty() {
                    format!("Catalog command failed: {}", command)
                } else {
                    output.trim().to_string()
                },
                command: Some(command),
            },
            CatalogError::Parse { command, output } => ServiceError::CatalogUnavailable {
                message: format!("Unexpected catalog output: {}", output.trim()),
                command: Some(command),
            },
            CatalogError::Process(e) => ServiceError::CatalogUnavailable {
                message: e.to_string(),
                command: None,
            },
            CatalogError::Io(e) => ServiceError::Internal(e.to_string()),
        }
    }
}

impl From<BookingError> for ServiceError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::NotFound(id) => ServiceError::NotFound(format!("Booking not found: {}", id)),
            BookingError::Closed(id) => ServiceError::NotFound(format!("Booking {} is closed", id)),
            BookingError::NotReady { .. } => ServiceError::BookingNotReady(e.to_string()),
            BookingError::Orphaned(id) => ServiceError::OrphanedTransfer(id),
            BookingError::MissingProxy(id) => ServiceError::MissingProxy(id),
            BookingError::InvalidFileName(name) => {
                ServiceError::BadRequest(format!("Invalid file name: {}", name))
            }
            BookingError::Catalog(e) => e.into(),
            BookingError::Store(e) => e.into(),
            BookingError::Io(e) => ServiceError::Internal(e.to_string()),
        }
    }
}

impl From<TransferError> for ServiceError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Catalog(e) => e.into(),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<ProxyError> for ServiceError {
    fn from(e: ProxyError) -> Self {
        ServiceError::ProxyUnavailable(e.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_failure_keeps_command() {
        let err: ServiceError = CatalogError::unavailable(
            "lfc-ls -l /grid/gridit/sgfs/astro/alice",
            "No such file or directory\n",
            Some(1),
        )
        .into();
        assert_eq!(err.kind(), "catalog_unavailable");
        assert_eq!(err.command(), Some("lfc-ls -l /grid/gridit/sgfs/astro/alice"));
        assert_eq!(err.to_string(), "No such file or directory");
    }

    #[test]
    fn test_booking_errors_map_to_client_classes() {
        let not_ready: ServiceError = BookingError::NotReady {
            id: 3,
            observed: 400,
            expected: 1000,
        }
        .into();
        assert_eq!(not_ready.kind(), "booking_not_ready");

        let orphaned: ServiceError = BookingError::Orphaned(3).into();
        assert!(matches!(orphaned, ServiceError::OrphanedTransfer(3)));

        let invalid: ServiceError = BookingError::InvalidFileName("../x".to_string()).into();
        assert_eq!(invalid.kind(), "bad_request");
    }

    #[test]
    fn test_store_not_found_is_not_found() {
        let err: ServiceError = StoreError::not_found("transaction", 9).into();
        assert_eq!(err.kind(), "not_found");
        assert!(err.command().is_none());
    }
}
