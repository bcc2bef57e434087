//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Callback reports
        .route(
            "/callbacks",
            get(handlers::callback::deliver_callback).post(handlers::callback::deliver_callback),
        )
        .route(
            "/callbacks/report",
            post(handlers::callback::deliver_callback_body),
        )
        // Executions
        .route(
            "/executions",
            get(handlers::execution::list_executions).post(handlers::execution::start_execution),
        )
        .route("/executions/{id}", get(handlers::execution::get_execution))
        .route(
            "/executions/{id}/checkpoints",
            get(handlers::execution::get_checkpoints),
        )
        .route(
            "/executions/{id}/wake",
            post(handlers::execution::wake_execution),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
