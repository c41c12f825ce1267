//! Route table and middleware stack.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{system, tasks};
use crate::state::AppState;

/// Uploads are whole binaries; allow up to 256 MiB.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(system::root))
        .route("/system/status", get(system::system_status))
        .route("/preprocess_pe", post(tasks::preprocess_pe))
        .route("/preprocess_asm", post(tasks::preprocess_asm))
        .route("/task/{task_id}", get(tasks::task_status))
        .route("/result/{task_id}", get(tasks::task_result))
        .route("/download/{task_id}/{filename}", get(tasks::download))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
