//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router
//! with mock collaborators injected, so the whole HTTP surface can be
//! exercised without catalog tooling or a token server.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use fileport_core::{
    testing::{MockCatalog, MockProcessRunner, MockProxyIssuer},
    FileService, SqliteTransactionStore,
};
use fileport_server::api::create_router;
use fileport_server::state::AppState;

/// Re-export fixtures for test convenience
pub use fileport_core::testing::fixtures;

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_begin() {
///     let fixture = TestFixture::new();
///     let response = fixture.post("/api/v1/transactions", json!({
///         "user": "alice", "application": "astro"
///     })).await;
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Service shared with the router
    pub service: Arc<FileService>,
    /// Transaction store shared with the service
    pub store: Arc<SqliteTransactionStore>,
    /// Mock process table
    pub runner: Arc<MockProcessRunner>,
    /// Mock catalog - add files, inject failures
    pub catalog: Arc<MockCatalog>,
    /// Mock token server
    pub issuer: Arc<MockProxyIssuer>,
    /// Temporary directory for staging and proxies
    pub temp_dir: TempDir,
}

/// Response from a JSON request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Response from a download request
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = fixtures::config(temp_dir.path());

        let store = Arc::new(SqliteTransactionStore::in_memory().expect("Failed to create store"));
        let runner = Arc::new(MockProcessRunner::new());
        let catalog = Arc::new(MockCatalog::new(runner.clone()));
        let issuer = Arc::new(MockProxyIssuer::new());

        let service = Arc::new(FileService::new(
            &config,
            store.clone(),
            catalog.clone(),
            runner.clone(),
            issuer.clone(),
        ));
        service
            .seed_registry(&config.registry)
            .expect("Failed to seed registry");

        let state = Arc::new(AppState::new(config, service.clone()));
        let router = create_router(state);

        Self {
            router,
            service,
            store,
            runner,
            catalog,
            issuer,
            temp_dir,
        }
    }

    /// Starts a transaction for alice in astro and returns its id.
    pub async fn begin(&self) -> i64 {
        let response = self
            .post(
                "/api/v1/transactions",
                serde_json::json!({"user": "alice", "application": "astro"}),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["transaction_id"].as_i64().expect("transaction id")
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        self.send(Request::delete(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// GET returning the raw body, for downloads.
    pub async fn get_raw(&self, uri: &str) -> RawResponse {
        let response = self
            .router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        RawResponse {
            status,
            headers,
            body,
        }
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).to_string())
            })
        };
        TestResponse { status, body }
    }
}
