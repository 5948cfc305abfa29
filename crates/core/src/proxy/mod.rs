//! Credential proxy issuance.
//!
//! Every transaction gets its own short-lived proxy file, fetched from the
//! infrastructure's token server when the transaction begins and deleted
//! when it ends.

mod error;
mod http;
mod traits;

pub use error::ProxyError;
pub use http::HttpProxyIssuer;
pub use traits::{ProxyIssuer, ProxyRequest};

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Local file holding the proxy of a transaction.
pub fn proxy_path(dir: &Path, transaction_id: i64) -> PathBuf {
    dir.join(format!("proxy-{}", transaction_id))
}

/// Deletes a proxy file. A file that is already gone is not an error.
pub async fn discard_proxy(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Proxy removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove proxy"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_path_per_transaction() {
        assert_eq!(
            proxy_path(Path::new("/var/lib/fileport/proxies"), 42),
            PathBuf::from("/var/lib/fileport/proxies/proxy-42")
        );
    }

    #[tokio::test]
    async fn test_discard_missing_proxy_is_quiet() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = proxy_path(dir.path(), 7);
        std::fs::write(&path, b"cert").unwrap();

        discard_proxy(&path).await;
        assert!(!path.exists());
        discard_proxy(&path).await;
    }
}
