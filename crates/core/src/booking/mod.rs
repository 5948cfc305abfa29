//! Asynchronous staging of catalog files.
//!
//! A booking launches a detached copy of a catalog file into a private
//! temporary directory and persists everything needed to find it again:
//! the expected size, the copy's process handle and the staged path.
//! Nothing is kept in memory between requests; every poll re-derives the
//! booking's state from the staged file's size and the process table.
//!
//! ```text
//! Booked ──poll──▶ Polling ──poll──▶ Ready ──close/download──▶ Closed
//!    │                │
//!    └────────────────┴──(process gone / file shrank)──▶ Orphaned
//! ```

mod cleanup;
mod engine;
mod error;
mod types;

pub use cleanup::{create_staging_dir, discard_staged, file_size, CleanupFailure};
pub use engine::BookingEngine;
pub(crate) use engine::staged_name;
pub use error::BookingError;
pub use types::{BookingState, BookingStatus, CloseReport};
