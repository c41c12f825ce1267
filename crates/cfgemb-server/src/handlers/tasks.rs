//! Submission, status, result, and download handlers.

use std::path::Path;

use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::disk::disk_status;
use crate::error::ApiError;
use crate::queue::{InputKind, Job};
use crate::registry::TaskStatus;
use crate::schema::{ProcessResult, TaskStatusResponse};
use crate::state::AppState;

/// Parsed multipart submission form.
struct Submission {
    task_id: String,
    label: i64,
    filename: String,
    bytes: Vec<u8>,
}

/// `POST /preprocess_pe`: queue a binary for the full pipeline, starting at
/// disassembly.
pub async fn preprocess_pe(
    state: State<AppState>,
    multipart: Multipart,
) -> Result<Json<ProcessResult>, ApiError> {
    submit(state, multipart, InputKind::Pe).await
}

/// `POST /preprocess_asm`: queue an assembly listing (or CFG interchange
/// JSON), skipping disassembly.
pub async fn preprocess_asm(
    state: State<AppState>,
    multipart: Multipart,
) -> Result<Json<ProcessResult>, ApiError> {
    submit(state, multipart, InputKind::Asm).await
}

async fn submit(
    State(state): State<AppState>,
    multipart: Multipart,
    kind: InputKind,
) -> Result<Json<ProcessResult>, ApiError> {
    let disk = disk_status(&state.config.data_dir, state.config.min_disk_gb)?;
    if !disk.disk_enough {
        return Err(ApiError::InsufficientStorage(format!(
            "{:.2} GB free, {:.2} GB required",
            disk.free_gb, disk.min_required_gb
        )));
    }

    let submission = read_submission(multipart).await?;
    validate_task_id(&submission.task_id)?;

    state
        .registry
        .create(&submission.task_id, submission.label, "queued")?;

    let ext = file_extension(&submission.filename);
    let input_path = state
        .config
        .upload_dir()
        .join(format!("{}{ext}", submission.task_id));
    if let Err(err) = tokio::fs::write(&input_path, &submission.bytes).await {
        state
            .registry
            .set_failed(&submission.task_id, &format!("saving upload failed: {err}"));
        return Err(err.into());
    }

    let position = state.queue.enqueue(Job {
        task_id: submission.task_id.clone(),
        input_path,
        kind,
        label: submission.label,
    });
    tracing::info!(task_id = %submission.task_id, position, "task queued");

    Ok(Json(ProcessResult {
        success: true,
        message: format!("queued at position {position}"),
        task_id: submission.task_id,
        result_files: None,
    }))
}

async fn read_submission(mut multipart: Multipart) -> Result<Submission, ApiError> {
    let mut task_id = None;
    let mut label = None;
    let mut filename = None;
    let mut bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("invalid multipart body: {err}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|err| ApiError::BadRequest(format!("reading upload: {err}")))?
                        .to_vec(),
                );
            }
            Some("task_id") => {
                task_id = Some(field.text().await.map_err(|err| {
                    ApiError::BadRequest(format!("reading task_id: {err}"))
                })?);
            }
            Some("label") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("reading label: {err}")))?;
                let parsed: i64 = text
                    .trim()
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("invalid label '{text}'")))?;
                label = Some(parsed);
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| ApiError::BadRequest("missing 'file' field".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }
    let filename =
        filename.ok_or_else(|| ApiError::BadRequest("upload has no filename".to_string()))?;
    // The classification label is required and non-negative: a defaulted
    // label would silently mark a sample benign.
    let label = label.ok_or_else(|| ApiError::BadRequest("missing 'label' field".to_string()))?;
    if label < 0 {
        return Err(ApiError::BadRequest(format!(
            "label must be non-negative, got {label}"
        )));
    }
    let task_id = match task_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        // Default the id to the upload's stem when the form omits it.
        _ => Path::new(&filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| ApiError::BadRequest("cannot derive task_id".to_string()))?,
    };

    Ok(Submission {
        task_id,
        label,
        filename,
        bytes,
    })
}

fn validate_task_id(task_id: &str) -> Result<(), ApiError> {
    if task_id.is_empty()
        || task_id == "."
        || task_id == ".."
        || task_id.contains(['/', '\\'])
        || task_id.contains('\0')
    {
        return Err(ApiError::BadRequest(format!(
            "invalid task_id '{task_id}'"
        )));
    }
    Ok(())
}

fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// `GET /task/{task_id}`: status read with the one-shot failure contract;
/// the first successful read of a failed task evicts it.
pub async fn task_status(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let task = state
        .registry
        .read_and_evict_if_failed(&task_id)
        .ok_or_else(|| ApiError::NotFound(format!("task '{task_id}'")))?;

    Ok(Json(TaskStatusResponse {
        task_id,
        status: task.status,
        message: task.message,
        result_files: task.result_files,
    }))
}

/// `GET /result/{task_id}`: artifact names for a completed task. Unlike the
/// status read, this never evicts. An unfinished or failed task is not an
/// HTTP error: the response carries `success: false` and a message.
pub async fn task_result(
    State(state): State<AppState>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<Json<ProcessResult>, ApiError> {
    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| ApiError::NotFound(format!("task '{task_id}'")))?;

    let (success, message, result_files) = match task.status {
        TaskStatus::Completed => (true, task.message, task.result_files),
        TaskStatus::Failed => (false, task.message, None),
        TaskStatus::Pending | TaskStatus::Processing => {
            (false, "task is not finished yet".to_string(), None)
        }
    };
    Ok(Json(ProcessResult {
        success,
        message,
        task_id,
        result_files,
    }))
}

/// `GET /download/{task_id}/{filename}`: serves one artifact. Only names
/// recorded in the task's `result_files` are reachable, so path traversal
/// through the filename is a non-issue.
pub async fn download(
    State(state): State<AppState>,
    UrlPath((task_id, filename)): UrlPath<(String, String)>,
) -> Result<Response, ApiError> {
    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| ApiError::NotFound(format!("task '{task_id}'")))?;

    if task.status != TaskStatus::Completed {
        return Err(ApiError::BadRequest(format!(
            "task '{task_id}' is not finished"
        )));
    }

    let known = task
        .result_files
        .as_ref()
        .is_some_and(|files| files.values().any(|name| name == &filename));
    if !known {
        return Err(ApiError::NotFound(format!(
            "file '{filename}' for task '{task_id}'"
        )));
    }

    let path = state.store.file_path(&task_id, &filename);
    let bytes = tokio::fs::read(&path).await.map_err(|_| {
        ApiError::NotFound(format!("file '{filename}' for task '{task_id}'"))
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
