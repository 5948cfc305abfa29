//! Records kept by the transaction store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::catalog::CatalogContext;
use crate::process::ProcessHandle;
use crate::proxy::ProxyRequest;

/// Observed size persisted once a booking has been orphaned.
pub const DISCARDED_SIZE: i64 = -1;

/// A grid infrastructure: where its catalog lives and how to get a proxy for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Infrastructure {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub proxy_id: String,
    pub vo: String,
    pub role: String,
    pub proxy_renewal: bool,
    pub info_system: String,
    pub catalog_host: String,
}

impl Infrastructure {
    pub fn proxy_request(&self) -> ProxyRequest {
        ProxyRequest {
            host: self.proxy_host.clone(),
            port: self.proxy_port,
            proxy_id: self.proxy_id.clone(),
            vo: self.vo.clone(),
            role: self.role.clone(),
            renewal: self.proxy_renewal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub id: i64,
    pub name: String,
    pub catalog_dir: String,
    pub infrastructure_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub application_id: i64,
    pub infrastructure_id: i64,
    pub proxy_path: Option<PathBuf>,
    pub client_ip: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// What an action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Download,
    Delete,
    Book,
    Close,
    DownloadBooked,
    Orphaned,
    FixedDownload,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Download => "download",
            ActionKind::Delete => "delete",
            ActionKind::Book => "book",
            ActionKind::Close => "close",
            ActionKind::DownloadBooked => "download_booked",
            ActionKind::Orphaned => "orphaned",
            ActionKind::FixedDownload => "fixed_download",
        }
    }

    /// Whether a booking whose action has this kind is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionKind::Close | ActionKind::Orphaned)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(ActionKind::Download),
            "delete" => Ok(ActionKind::Delete),
            "book" => Ok(ActionKind::Book),
            "close" => Ok(ActionKind::Close),
            "download_booked" => Ok(ActionKind::DownloadBooked),
            "orphaned" => Ok(ActionKind::Orphaned),
            "fixed_download" => Ok(ActionKind::FixedDownload),
            other => Err(format!("unknown action kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub id: i64,
    pub transaction_id: i64,
    pub kind: ActionKind,
    /// Remote file reference (name or logical path).
    pub remote_file: String,
    /// Local staged copy, if the action staged one.
    pub local_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

/// Persisted progress record of one staging transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booking {
    pub id: i64,
    pub action_id: i64,
    pub transaction_id: i64,
    pub expected_size: u64,
    /// Last persisted on-disk size, or `DISCARDED_SIZE` once orphaned.
    pub observed_size: i64,
    pub process_handle: ProcessHandle,
    pub completion_url: Option<String>,
}

/// A booking together with the action that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingRecord {
    pub booking: Booking,
    pub action: Action,
}

impl BookingRecord {
    pub fn is_open(&self) -> bool {
        self.action.kind == ActionKind::Book
    }
}

/// Input for creating a booking and its Book action together.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub transaction_id: i64,
    pub remote_file: String,
    pub local_path: PathBuf,
    pub expected_size: u64,
    pub process_handle: ProcessHandle,
}

/// A permanent download link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixedDownload {
    pub guid: String,
    pub user_id: i64,
    pub application_id: i64,
    /// Absolute logical path of the file.
    pub absolute_path: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub download_count: i64,
}

impl FixedDownload {
    /// Whether `now` falls inside the validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.is_none_or(|from| now >= from)
            && self.valid_until.is_none_or(|until| now <= until)
    }
}

/// A transaction with everything it references resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    pub transaction: Transaction,
    pub infrastructure: Infrastructure,
    pub application: Application,
    pub user: User,
}

impl TransactionContext {
    /// Catalog parameters for this transaction. `None` until a proxy is
    /// associated.
    pub fn catalog_context(&self) -> Option<CatalogContext> {
        let proxy_path = self.transaction.proxy_path.clone()?;
        Some(CatalogContext {
            info_system: self.infrastructure.info_system.clone(),
            catalog_host: self.infrastructure.catalog_host.clone(),
            proxy_path,
            vo: self.infrastructure.vo.clone(),
            app_dir: self.application.catalog_dir.clone(),
            user_name: self.user.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_action_kind_round_trips_through_text() {
        for kind in [
            ActionKind::Download,
            ActionKind::Delete,
            ActionKind::Book,
            ActionKind::Close,
            ActionKind::DownloadBooked,
            ActionKind::Orphaned,
            ActionKind::FixedDownload,
        ] {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(ActionKind::Close.is_terminal());
        assert!(ActionKind::Orphaned.is_terminal());
        assert!(!ActionKind::Book.is_terminal());
    }

    #[test]
    fn test_fixed_download_validity_window() {
        let now = Utc::now();
        let mut fixed = FixedDownload {
            guid: "g".to_string(),
            user_id: 1,
            application_id: 1,
            absolute_path: "/grid/vo/x".to_string(),
            valid_from: None,
            valid_until: None,
            download_count: 0,
        };
        assert!(fixed.is_valid_at(now));

        fixed.valid_from = Some(now + Duration::hours(1));
        assert!(!fixed.is_valid_at(now));

        fixed.valid_from = Some(now - Duration::hours(2));
        fixed.valid_until = Some(now - Duration::hours(1));
        assert!(!fixed.is_valid_at(now));
    }
}
