//! Proxy issuer talking to an eToken HTTP server.

use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::error::ProxyError;
use super::traits::{ProxyIssuer, ProxyRequest};
use crate::config::ProxyConfig;

/// Fetches proxies from `http://{host}:{port}/eTokenServer/eToken/{id}`.
pub struct HttpProxyIssuer {
    client: Client,
}

impl HttpProxyIssuer {
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    /// Token server URL for a request.
    pub fn url(request: &ProxyRequest) -> String {
        format!(
            "http://{}:{}/eTokenServer/eToken/{}?voms={}:{}&proxy-renewal={}",
            request.host,
            request.port,
            urlencoding::encode(&request.proxy_id),
            urlencoding::encode(&request.vo),
            urlencoding::encode(&request.role),
            if request.renewal { "true" } else { "false" }
        )
    }
}

/// Writes `contents` readable by the owner only.
async fn write_private(path: &Path, contents: &[u8]) -> Result<(), ProxyError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[async_trait]
impl ProxyIssuer for HttpProxyIssuer {
    async fn issue(&self, request: &ProxyRequest, dest: &Path) -> Result<(), ProxyError> {
        let url = Self::url(request);
        debug!(url = %url, "Requesting proxy");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProxyError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(ProxyError::Empty);
        }

        write_private(dest, &body).await?;
        info!(path = %dest.display(), "Proxy issued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request() -> ProxyRequest {
        ProxyRequest {
            host: "etoken.example.org".to_string(),
            port: 8082,
            proxy_id: "332576f78a4fe70a52048043e90cd11f".to_string(),
            vo: "gridit".to_string(),
            role: "gridit".to_string(),
            renewal: true,
        }
    }

    #[test]
    fn test_url_format() {
        assert_eq!(
            HttpProxyIssuer::url(&request()),
            "http://etoken.example.org:8082/eTokenServer/eToken/332576f78a4fe70a52048043e90cd11f?voms=gridit:gridit&proxy-renewal=true"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_private_sets_owner_only_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("proxy-1");
        write_private(&path, b"-----BEGIN CERTIFICATE-----").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        let dir = TempDir::new().unwrap();
        let issuer = HttpProxyIssuer::new(&ProxyConfig {
            dir: dir.path().to_path_buf(),
            timeout_secs: 2,
        })
        .unwrap();
        let mut req = request();
        req.host = "127.0.0.1".to_string();
        req.port = 1;

        let dest = dir.path().join("proxy-1");
        let result = issuer.issue(&req, &dest).await;
        assert!(matches!(result, Err(ProxyError::Request(_))));
        assert!(!dest.exists());
    }
}
