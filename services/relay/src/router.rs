//! Axum Router Configuration

use crate::{handlers, state::AppState, ws::ws_handler};
use axum::{
    Router,
    routing::{any, get},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Any method, so that non-upgrade requests get 426 rather than 405.
        .route("/realtime", any(ws_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}
