//! Client-facing operations.
//!
//! `FileService` resolves the caller's transaction, checks it is still open
//! and holds a proxy, and then delegates to the catalog gateway, the
//! booking engine or a streaming transfer.

mod error;
mod file_service;

pub use error::ServiceError;
pub use file_service::FileService;
