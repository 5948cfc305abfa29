//! Transaction API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::middleware::ClientIp;
use super::response::{ok, ApiError, OkBody};
use crate::state::AppState;

/// Request body for starting a transaction
#[derive(Debug, Deserialize)]
pub struct BeginBody {
    pub user: String,
    pub application: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: i64,
    pub user: String,
    pub application: String,
    pub opened_at: String,
}

#[derive(Debug, Serialize)]
pub struct EndResponse {
    pub transaction_id: i64,
    /// False when the transaction had already ended.
    pub closed: bool,
}

pub async fn begin(
    State(state): State<Arc<AppState>>,
    client_ip: ClientIp,
    Json(body): Json<BeginBody>,
) -> Result<(StatusCode, Json<OkBody<TransactionResponse>>), ApiError> {
    let user = body.user.trim();
    let application = body.application.trim();
    if user.is_empty() || application.is_empty() {
        return Err(ApiError::bad_request("user and application are required"));
    }

    let transaction = state
        .service()
        .begin(user, application, client_ip.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        ok(TransactionResponse {
            transaction_id: transaction.id,
            user: user.to_string(),
            application: application.to_string(),
            opened_at: transaction.opened_at.to_rfc3339(),
        }),
    ))
}

pub async fn end(
    State(state): State<Arc<AppState>>,
    Path(tx): Path<i64>,
) -> Result<Json<OkBody<EndResponse>>, ApiError> {
    let closed = state.service().end(tx).await?;
    Ok(ok(EndResponse {
        transaction_id: tx,
        closed,
    }))
}
