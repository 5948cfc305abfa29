use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use fileport_core::SanitizedConfig;

use crate::metrics::encode_metrics;
use crate::state::AppState;

/// Operations listed by the service information endpoint.
const OPERATIONS: &[&str] = &[
    "begin",
    "end",
    "list",
    "download",
    "delete",
    "locations",
    "register_location",
    "book",
    "poll",
    "close",
    "download_booked",
    "fixed_download",
];

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub operations: &'static [&'static str],
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "fileport",
        version: env!("CARGO_PKG_VERSION"),
        operations: OPERATIONS,
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
