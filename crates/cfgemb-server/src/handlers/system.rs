//! Service introspection handlers.

use axum::extract::State;
use axum::Json;

use crate::disk::disk_status;
use crate::error::ApiError;
use crate::schema::SystemStatusResponse;
use crate::state::AppState;

/// `GET /`: service descriptor.
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "cfgemb",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /preprocess_pe",
            "POST /preprocess_asm",
            "GET /task/{task_id}",
            "GET /result/{task_id}",
            "GET /download/{task_id}/{filename}",
            "GET /system/status",
        ],
    }))
}

/// `GET /system/status`: worker occupancy, queue depth, and disk headroom.
pub async fn system_status(
    State(state): State<AppState>,
) -> Result<Json<SystemStatusResponse>, ApiError> {
    let active = state.queue.active_count();
    let max = state.queue.max_concurrent();
    let disk = disk_status(&state.config.data_dir, state.config.min_disk_gb)?;

    Ok(Json(SystemStatusResponse {
        active_tasks: active,
        queue_length: state.queue.depth(),
        max_concurrent_tasks: max,
        status: if active < max { "normal" } else { "busy" },
        disk,
    }))
}
