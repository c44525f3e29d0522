// HTTP server

pub mod error;
pub mod handlers;
pub mod params;
pub mod state;

pub use error::{ApiError, ApiResponse, ApiResult};
pub use params::FormParams;
pub use state::AppState;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

/// Build the router: API routes at the top level, files under the storage
/// root for everything else
pub fn build_router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let static_files = ServeDir::new(&state.config.storage.root);

    Router::new()
        .route("/delete", delete(handlers::delete_file))
        .route("/rename", post(handlers::rename_file))
        .route("/download", post(handlers::start_download))
        .route("/pause", put(handlers::pause_download))
        .route("/resume", put(handlers::resume_download))
        .route("/cancel", put(handlers::cancel_download))
        .route("/yt-dlp", post(handlers::start_extracted))
        .route("/status", get(handlers::get_status))
        .route("/stats", get(handlers::get_stats))
        .route("/encrypt", post(handlers::encrypt_file))
        .route("/decrypt", post(handlers::decrypt_file))
        .route("/health", get(handlers::health_check))
        .fallback_service(static_files)
        .with_state(state)
        .layer(middleware)
}
