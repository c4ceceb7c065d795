//! Web API router construction.

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::web::{refresh, scores, status};

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/refresh", post(refresh::trigger_refresh))
        .route("/players/{username}/scores", get(scores::player_scores))
        .with_state(app_state);

    // No timeout layer: a full refresh pass legitimately runs for minutes.
    Router::new()
        .nest("/api", api_router)
        .layer(TraceLayer::new_for_http())
}
