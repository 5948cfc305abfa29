use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{bookings, files, handlers, middleware::metrics_middleware, transactions};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Service information
        .route("/", get(handlers::service_info))
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Transactions
        .route("/transactions", post(transactions::begin))
        .route("/transactions/{tx}", axum::routing::delete(transactions::end))
        // Files
        .route("/transactions/{tx}/files", get(files::list))
        .route(
            "/transactions/{tx}/files/{name}",
            get(files::download).delete(files::delete),
        )
        .route(
            "/transactions/{tx}/files/{name}/locations",
            get(files::locations),
        )
        .route("/transactions/{tx}/locations", post(files::register_location))
        // Bookings
        .route(
            "/transactions/{tx}/bookings",
            post(bookings::book)
                .get(bookings::poll)
                .delete(bookings::close),
        )
        .route(
            "/transactions/{tx}/bookings/{id}/download",
            get(bookings::download_booked),
        )
        // Permanent links
        .route("/fixed/{guid}", get(bookings::fixed_download))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
