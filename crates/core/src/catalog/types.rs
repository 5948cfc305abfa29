//! Catalog types and listing parsing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::process::ProcessHandle;

/// Everything a catalog call needs to know about the caller.
///
/// Built from a transaction's infrastructure, application and user rows,
/// plus the credential proxy issued for that transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogContext {
    /// Information system endpoint (`LCG_GFAL_INFOSYS`).
    pub info_system: String,
    /// Catalog host (`LFC_HOST`).
    pub catalog_host: String,
    /// Credential proxy file (`X509_USER_PROXY`).
    pub proxy_path: PathBuf,
    /// Virtual organisation.
    pub vo: String,
    /// Application directory inside the catalog namespace.
    pub app_dir: String,
    /// Owner of the files.
    pub user_name: String,
}

/// A file addressed either inside the caller's scope or by absolute logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFile {
    /// Plain file name under `/grid/{vo}/{namespace}/{app}/{user}/`.
    InScope(String),
    /// Full logical path.
    Absolute(String),
}

impl RemoteFile {
    /// File name component, used for the local staged copy.
    pub fn file_name(&self) -> &str {
        match self {
            RemoteFile::InScope(name) => name,
            RemoteFile::Absolute(path) => path.rsplit('/').next().unwrap_or(path),
        }
    }
}

/// One catalog listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub size: u64,
    pub flags: String,
    pub date: String,
    pub remark: String,
}

/// A background staging transfer that has just been launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingTransfer {
    /// Size the catalog reports for the file.
    pub expected_size: u64,
    /// Handle of the detached copy process.
    pub handle: ProcessHandle,
}

/// Result of registering an external storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationRegistration {
    /// Identifier the catalog assigned.
    pub catalog_id: String,
    /// Logical path the location was registered under.
    pub logical_path: String,
}

/// Parses one line of a long catalog listing.
///
/// Columns: flags, links, owner, group, size, month, day, time-or-year,
/// name, then an optional free-text remark.
pub fn parse_listing_line(line: &str) -> Option<CatalogEntry> {
    let items: Vec<&str> = line.split_whitespace().collect();
    if items.len() < 9 {
        return None;
    }
    let size = items[4].parse().ok()?;
    Some(CatalogEntry {
        name: items[8].to_string(),
        size,
        flags: items[0].to_string(),
        date: format!("{} {} {}", items[5], items[6], items[7]),
        remark: items[9..].join(" "),
    })
}

/// Parses a long catalog listing, skipping lines that do not parse.
pub fn parse_listing(output: &str) -> Vec<CatalogEntry> {
    output.lines().filter_map(parse_listing_line).collect()
}
