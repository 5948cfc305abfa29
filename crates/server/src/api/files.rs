//! File API handlers: listing, direct download, delete and replicas.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use fileport_core::CatalogEntry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::response::{download_response, ok, ApiError, OkBody};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub files: Vec<CatalogEntry>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct LocationsResponse {
    pub file_name: String,
    pub locations: Vec<String>,
}

/// Request body for registering a storage URL
#[derive(Debug, Deserialize)]
pub struct RegisterLocationBody {
    pub surl: String,
    pub file_name: String,
    /// Directory under the virtual organisation replacing the default scope.
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterLocationResponse {
    pub catalog_id: String,
    pub path: String,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(tx): Path<i64>,
) -> Result<Json<OkBody<ListResponse>>, ApiError> {
    let files = state.service().list(tx).await?;
    Ok(ok(ListResponse { files }))
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Path((tx, name)): Path<(i64, String)>,
) -> Result<Response, ApiError> {
    let transfer = state.service().download(tx, &name).await?;
    Ok(download_response(transfer))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path((tx, name)): Path<(i64, String)>,
) -> Result<Json<OkBody<DeleteResponse>>, ApiError> {
    let path = state.service().delete(tx, &name).await?;
    Ok(ok(DeleteResponse { path }))
}

pub async fn locations(
    State(state): State<Arc<AppState>>,
    Path((tx, name)): Path<(i64, String)>,
) -> Result<Json<OkBody<LocationsResponse>>, ApiError> {
    let locations = state.service().locations(tx, &name).await?;
    Ok(ok(LocationsResponse {
        file_name: name,
        locations,
    }))
}

pub async fn register_location(
    State(state): State<Arc<AppState>>,
    Path(tx): Path<i64>,
    Json(body): Json<RegisterLocationBody>,
) -> Result<(StatusCode, Json<OkBody<RegisterLocationResponse>>), ApiError> {
    let registration = state
        .service()
        .register_location(tx, &body.surl, &body.file_name, body.path.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        ok(RegisterLocationResponse {
            catalog_id: registration.catalog_id,
            path: registration.logical_path,
        }),
    ))
}
