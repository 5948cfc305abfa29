//! Booking API handlers and the permanent download link.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use fileport_core::{BookingStatus, CloseReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::middleware::ClientIp;
use super::response::{download_response, ok, ApiError, OkBody};
use crate::state::AppState;

/// Request body for booking a file
#[derive(Debug, Deserialize)]
pub struct BookBody {
    pub file_name: String,
}

#[derive(Debug, Serialize)]
pub struct BookResponse {
    pub booking_id: i64,
    pub action_id: i64,
    pub file_name: String,
    pub expected_size: u64,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub bookings: Vec<BookingStatus>,
}

/// Query parameters for closing bookings
#[derive(Debug, Deserialize)]
pub struct CloseParams {
    /// Comma-separated booking ids; every open booking when omitted.
    pub ids: Option<String>,
}

pub async fn book(
    State(state): State<Arc<AppState>>,
    Path(tx): Path<i64>,
    Json(body): Json<BookBody>,
) -> Result<(StatusCode, Json<OkBody<BookResponse>>), ApiError> {
    let record = state.service().book(tx, &body.file_name).await?;
    Ok((
        StatusCode::CREATED,
        ok(BookResponse {
            booking_id: record.booking.id,
            action_id: record.action.id,
            file_name: record.action.remote_file,
            expected_size: record.booking.expected_size,
        }),
    ))
}

pub async fn poll(
    State(state): State<Arc<AppState>>,
    Path(tx): Path<i64>,
) -> Result<Json<OkBody<PollResponse>>, ApiError> {
    let bookings = state.service().poll(tx).await?;
    Ok(ok(PollResponse { bookings }))
}

pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(tx): Path<i64>,
    Query(params): Query<CloseParams>,
) -> Result<Json<OkBody<CloseReport>>, ApiError> {
    let ids = params.ids.as_deref().map(parse_ids).transpose()?;
    let report = state.service().close(tx, ids.as_deref()).await?;
    Ok(ok(report))
}

pub async fn download_booked(
    State(state): State<Arc<AppState>>,
    Path((tx, id)): Path<(i64, i64)>,
) -> Result<Response, ApiError> {
    let transfer = state.service().download_booked(tx, id).await?;
    Ok(download_response(transfer))
}

pub async fn fixed_download(
    State(state): State<Arc<AppState>>,
    client_ip: ClientIp,
    Path(guid): Path<String>,
) -> Result<Response, ApiError> {
    let transfer = state
        .service()
        .fixed_download(&guid, client_ip.as_deref())
        .await?;
    Ok(download_response(transfer))
}

fn parse_ids(raw: &str) -> Result<Vec<i64>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ApiError::bad_request(format!("Invalid booking id: {}", s)))
        })
        .collect()
}
