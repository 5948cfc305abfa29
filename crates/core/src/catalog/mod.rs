//! Catalog gateway.
//!
//! Translates logical (infrastructure, application, user, file) tuples into
//! catalog paths and drives the catalog's command-line tooling. Every call
//! receives the transaction's `CatalogContext` explicitly; nothing is read
//! from the server's own environment.

mod command;
mod error;
mod staging;
mod traits;
mod types;

pub use command::{CommandLineCatalog, CommandStream};
pub use error::CatalogError;
pub use staging::wait_for_first_bytes;
pub use traits::{CatalogGateway, CatalogStream};
pub use types::{
    parse_listing, parse_listing_line, CatalogContext, CatalogEntry, LocationRegistration,
    RemoteFile, StagingTransfer,
};
