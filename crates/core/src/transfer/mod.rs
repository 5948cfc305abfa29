//! Chunked delivery of file bytes to a client.
//!
//! A `TransferSource` yields fixed-size chunks until the declared length
//! has been produced. Sources release what they hold (staged files, catalog
//! handles, the owning transaction) exactly once, whether the consumer
//! reads to the end, hits an error, or simply stops pulling.

mod catalog_source;
mod error;
mod finalizer;
mod source;
mod staged;

pub use catalog_source::CatalogStreamSource;
pub use error::TransferError;
pub use finalizer::StagedFinalizer;
pub use source::{Transfer, TransferMode, TransferSource};
pub use staged::{StagedFileSource, StagingWriter};
