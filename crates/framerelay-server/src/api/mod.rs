mod assets;
mod offer;

use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Browser client
        .route("/", get(assets::index))
        .route("/client.js", get(assets::client_js))
        // Signaling
        .route("/offer", post(offer::accept_offer))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
