//! Error types for proxy issuance.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Proxy server request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Proxy server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Proxy server returned an empty credential")]
    Empty,

    #[error("Failed to store proxy: {0}")]
    Io(#[from] std::io::Error),
}
