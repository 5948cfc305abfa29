//! Mock proxy issuer for testing.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::proxy::{ProxyError, ProxyIssuer, ProxyRequest};

/// Mock implementation of the ProxyIssuer trait.
///
/// Writes a dummy credential to the requested path unless told to fail.
#[derive(Debug, Default)]
pub struct MockProxyIssuer {
    requests: Arc<RwLock<Vec<ProxyRequest>>>,
    fail: Arc<RwLock<bool>>,
}

impl MockProxyIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every issuance fail with a server error.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    pub async fn requests(&self) -> Vec<ProxyRequest> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl ProxyIssuer for MockProxyIssuer {
    async fn issue(&self, request: &ProxyRequest, dest: &Path) -> Result<(), ProxyError> {
        self.requests.write().await.push(request.clone());
        if *self.fail.read().await {
            return Err(ProxyError::Server {
                status: 503,
                message: "token server unavailable".to_string(),
            });
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, b"mock proxy").await?;
        Ok(())
    }
}
