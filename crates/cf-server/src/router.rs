//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::rate_limit::admission_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Processing routes: each one starts an operation, so each is gated by
    // admission control.
    let processing = Router::new()
        .route("/add-text", post(routes::video::add_text))
        .route("/add-image", post(routes::video::add_image))
        .route("/change-speed", post(routes::video::change_speed))
        .route("/merge", post(routes::video::merge))
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            admission_middleware,
        ))
        .layer(DefaultBodyLimit::max(ctx.config.server.max_upload_bytes));

    let video = processing.route("/download/{filename}", get(routes::video::download));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/tools", get(routes::tools::tools))
        .nest("/api/video", video)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
