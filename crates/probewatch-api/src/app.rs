use axum::http::Uri;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::metrics::metrics_handler;
use crate::routes;
use crate::state::AppState;

/// Full router: `/api/v1` plus the unversioned operational endpoints.
///
/// Every origin is allowed; the API carries no credentials of its own.
pub fn build_app(state: AppState) -> Router {
    let ops = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .nest("/api/v1", routes::router())
        .merge(ops)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}
