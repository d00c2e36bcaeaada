//! API route definitions.

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::handlers::{health, revalidate};
use crate::middleware::trace_layer;
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/revalidate", post(revalidate::revalidate))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .layer(trace_layer())
        .with_state(state)
}
