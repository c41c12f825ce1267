//! Request/response types for the HTTP API.

use std::collections::HashMap;

use serde::Serialize;

use crate::disk::DiskStatus;
use crate::registry::TaskStatus;

/// Response of `GET /task/{task_id}`.
#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_files: Option<HashMap<String, String>>,
}

/// Response of submissions and `GET /result/{task_id}`.
#[derive(Debug, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    pub message: String,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_files: Option<HashMap<String, String>>,
}

/// Response of `GET /system/status`.
#[derive(Debug, Serialize)]
pub struct SystemStatusResponse {
    pub active_tasks: usize,
    pub queue_length: usize,
    pub max_concurrent_tasks: usize,
    /// "normal" while worker capacity remains, "busy" otherwise.
    pub status: &'static str,
    pub disk: DiskStatus,
}
