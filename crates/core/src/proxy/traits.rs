//! Trait definition for proxy issuers.

use async_trait::async_trait;
use std::path::Path;

use super::error::ProxyError;

/// What the token server needs to issue a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub host: String,
    pub port: u16,
    pub proxy_id: String,
    pub vo: String,
    pub role: String,
    pub renewal: bool,
}

/// Obtains a credential proxy and stores it on local disk.
#[async_trait]
pub trait ProxyIssuer: Send + Sync {
    /// Fetches a proxy and writes it to `dest`, readable by the owner only.
    async fn issue(&self, request: &ProxyRequest, dest: &Path) -> Result<(), ProxyError>;
}
