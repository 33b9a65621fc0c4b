pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::delivery::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/variants", post(handlers::handle_get_variant))
        .route("/api/v1/selfies", post(handlers::handle_get_selfie))
        .route("/api/v1/styles", put(handlers::handle_upsert_style))
        .with_state(state)
}
