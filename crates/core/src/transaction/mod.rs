//! Transaction, action and booking persistence.
//!
//! A transaction scopes every operation to one user, application and
//! infrastructure. Actions are the append-only history of what happened
//! inside a transaction; a Book action's kind doubles as the lifecycle
//! stage of its booking.

mod error;
mod sqlite;
mod store;
mod types;

pub use error::StoreError;
pub use sqlite::SqliteTransactionStore;
pub use store::TransactionStore;
pub use types::{
    Action, ActionKind, Application, Booking, BookingRecord, FixedDownload, Infrastructure,
    NewBooking, Transaction, TransactionContext, User, DISCARDED_SIZE,
};
