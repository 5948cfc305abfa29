pub mod booking;
pub mod catalog;
pub mod config;
pub mod metrics;
pub mod process;
pub mod proxy;
pub mod service;
pub mod testing;
pub mod transaction;
pub mod transfer;

pub use booking::{BookingEngine, BookingError, BookingState, BookingStatus, CloseReport};
pub use catalog::{
    CatalogContext, CatalogEntry, CatalogError, CatalogGateway, CatalogStream, CommandLineCatalog,
    LocationRegistration, RemoteFile,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use process::{LocalProcessRunner, ProcessError, ProcessHandle, ProcessRunner};
pub use proxy::{HttpProxyIssuer, ProxyError, ProxyIssuer};
pub use service::{FileService, ServiceError};
pub use transaction::{
    ActionKind, BookingRecord, FixedDownload, SqliteTransactionStore, StoreError, Transaction,
    TransactionStore,
};
pub use transfer::{Transfer, TransferError, TransferMode};
