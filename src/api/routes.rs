//! HTTP routes configuration

use crate::api::handlers::{self, ApiError, ApiState};
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

/// JSON 404 for unknown routes
async fn fallback_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            error: "Not Found".to_string(),
        }),
    )
}

/// Create the router with all routes
pub fn create_router(state: ApiState) -> Router {
    // the dashboard polls nodes from a browser
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/block", get(handlers::get_block).post(handlers::post_block))
        .route(
            "/txpool",
            get(handlers::get_txpool).post(handlers::post_txpool),
        )
        .route("/tx", post(handlers::submit_tx))
        .route("/balance", get(handlers::get_balance))
        .route("/mine", post(handlers::mine))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(cors)
}
