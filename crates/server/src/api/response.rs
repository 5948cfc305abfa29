//! Response envelopes shared by every handler.
//!
//! Success bodies are `{"status":"OK", ...fields}`; failures are
//! `{"status":"KO","error":...}` plus `command` for catalog failures.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fileport_core::{ServiceError, Transfer};
use serde::Serialize;
use tracing::{error, warn};

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct OkBody<T> {
    pub status: &'static str,
    #[serde(flatten)]
    pub body: T,
}

/// Wraps a payload in the success envelope.
pub fn ok<T: Serialize>(body: T) -> Json<OkBody<T>> {
    Json(OkBody { status: "OK", body })
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// A failed request.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(ServiceError::BadRequest(message.into()))
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::CatalogUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ServiceError::StagingTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::BookingNotReady(_)
            | ServiceError::OrphanedTransfer(_)
            | ServiceError::TransactionClosed(_) => StatusCode::CONFLICT,
            ServiceError::MissingProxy(_) | ServiceError::ProxyUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            warn!(kind = self.0.kind(), error = %self.0, "Request rejected");
        }
        let body = ErrorBody {
            status: "KO",
            error: self.0.to_string(),
            command: self.0.command().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}

/// Streams a transfer as a file attachment.
pub fn download_response(transfer: Transfer) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        transfer.file_name.replace(['"', '\\'], "_")
    );
    let size = transfer.size;
    let body = Body::from_stream(transfer.into_stream());

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-download"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
