//! Metrics middleware and request extractors for API routes.

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Address of the caller, recorded on transactions.
///
/// Prefers the first `X-Forwarded-For` entry, then the peer address when
/// the server was started with connect info.
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        std::future::ready(Ok(ClientIp(forwarded.or(peer))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn echo_ip(ip: ClientIp) -> String {
        ip.0.unwrap_or_else(|| "unknown".to_string())
    }

    fn app() -> Router {
        Router::new()
            .route("/ip", get(echo_ip))
            .layer(middleware::from_fn(metrics_middleware))
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_client_ip_from_forwarded_header() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/ip")
                    .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "203.0.113.9");
    }

    #[tokio::test]
    async fn test_client_ip_missing() {
        let response = app()
            .oneshot(Request::builder().uri("/ip").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "unknown");
    }

    #[tokio::test]
    async fn test_metrics_middleware_counts_requests() {
        let before = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/ip", "200"])
            .get();
        app()
            .oneshot(Request::builder().uri("/ip").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let after = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/ip", "200"])
            .get();
        assert!(after > before);
    }
}
