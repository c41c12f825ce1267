//! HTTP surface tests driving the full router with fake capabilities.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::json;
use tower::ServiceExt;

use cfgemb_server::config::Config;
use cfgemb_server::disassembler::{Disassembler, DisassemblerError};
use cfgemb_server::encoder::{EncoderError, InstructionEncoder};
use cfgemb_server::router::build_router;
use cfgemb_server::state::AppState;

struct FakeEncoder;

#[async_trait]
impl InstructionEncoder for FakeEncoder {
    async fn encode(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EncoderError> {
        Ok(vec![vec![0.5; 8]; batch.len()])
    }
}

struct FailingDisassembler;

#[async_trait]
impl Disassembler for FailingDisassembler {
    async fn disassemble(
        &self,
        _input: &Path,
        _output_dir: &Path,
    ) -> Result<PathBuf, DisassemblerError> {
        Err(DisassemblerError::Exited("exit status: 1".to_string()))
    }
}

fn test_app() -> (Router, AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        stage_timeout: Duration::from_secs(30),
        max_concurrent: 1,
        encoder_url: "http://127.0.0.1:1".to_string(),
        ida_path: "/nonexistent/idat".into(),
        ida_script: "/nonexistent/export.py".into(),
        min_disk_gb: 0.0,
        port: 0,
    };
    let state = AppState::new(config, Arc::new(FakeEncoder), Arc::new(FailingDisassembler))
        .expect("failed to create AppState");
    (build_router(state.clone()), state, dir)
}

async fn get_json(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, body)
}

const BOUNDARY: &str = "------------cfgemb-test";

fn multipart_body(
    task_id: Option<&str>,
    label: Option<&str>,
    filename: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(task_id) = task_id {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"task_id\"\r\n\r\n{task_id}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(label) = label {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"label\"\r\n\r\n{label}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn submit(
    app: &Router,
    endpoint: &str,
    task_id: Option<&str>,
    label: Option<&str>,
    filename: &str,
    content: &[u8],
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(endpoint)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(multipart_body(task_id, label, filename, content)))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, body)
}

/// Polls the status endpoint until the task reaches a terminal state.
async fn wait_for_terminal(app: &Router, task_id: &str) -> serde_json::Value {
    for _ in 0..200 {
        let (status, body) = get_json(app, &format!("/task/{task_id}")).await;
        if status == StatusCode::OK {
            match body["status"].as_str() {
                Some("completed") | Some("failed") => return body,
                _ => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

/// CFG interchange fixture: a 12-block chain with an extra forward edge.
fn cfg_json() -> Vec<u8> {
    let addr = |i: usize| (4096 + i * 16).to_string();
    let mut entries = Vec::new();
    for i in 0..12 {
        let mut out = Vec::new();
        if i + 1 < 12 {
            out.push(format!("\"{}\"", addr(i + 1)));
        }
        if i == 0 {
            out.push(format!("\"{}\"", addr(11)));
        }
        entries.push(format!(
            "\"{}\": {{\"insn_list\": [{{\"opcode\": \"push\", \"operands\": [\"ebp\"]}}], \"out_edge_list\": [{}]}}",
            addr(i),
            out.join(", ")
        ));
    }
    format!("{{{}}}", entries.join(", ")).into_bytes()
}

#[tokio::test]
async fn root_lists_endpoints() {
    let (app, _state, _dir) = test_app();
    let (status, body) = get_json(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "cfgemb");
    assert!(body["endpoints"].as_array().unwrap().len() >= 6);
}

#[tokio::test]
async fn unknown_task_is_404() {
    let (app, _state, _dir) = test_app();
    let (status, body) = get_json(&app, "/task/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn submit_poll_download_roundtrip() {
    let (app, _state, _dir) = test_app();

    let (status, body) =
        submit(&app, "/preprocess_asm", Some("s1"), Some("1"), "s1.json", &cfg_json()).await;
    assert_eq!(status, StatusCode::OK, "{body:?}");
    assert_eq!(body["success"], true);
    assert_eq!(body["task_id"], "s1");

    let terminal = wait_for_terminal(&app, "s1").await;
    assert_eq!(terminal["status"], "completed", "{terminal:?}");
    assert_eq!(terminal["result_files"]["graph"], "graph_s1.json");

    let (status, body) = get_json(&app, "/result/s1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["result_files"]["sparse_matrix"],
        "graph_s1_sparse_matrix.json"
    );

    let (status, graph) = get_json(&app, "/download/s1/graph_s1.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(graph["x"].as_array().unwrap().len(), 12);
    assert_eq!(graph["y"], json!([0.0, 1.0]));

    // Only recorded artifact names are downloadable.
    let (status, _) = get_json(&app, "/download/s1/other.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_task_id_is_rejected() {
    let (app, _state, _dir) = test_app();

    let (status, _) =
        submit(&app, "/preprocess_asm", Some("dup"), Some("0"), "dup.json", &cfg_json()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        submit(&app, "/preprocess_asm", Some("dup"), Some("0"), "dup.json", &cfg_json()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn invalid_task_id_is_rejected() {
    let (app, _state, _dir) = test_app();
    let (status, _) = submit(
        &app,
        "/preprocess_asm",
        Some("../escape"),
        Some("0"),
        "x.json",
        &cfg_json(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_label_is_rejected() {
    let (app, _state, _dir) = test_app();
    let (status, body) = submit(
        &app,
        "/preprocess_asm",
        Some("lbl"),
        Some("two"),
        "lbl.json",
        &cfg_json(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body:?}");
}

#[tokio::test]
async fn missing_label_is_rejected_without_creating_task() {
    let (app, _state, _dir) = test_app();
    let (status, body) =
        submit(&app, "/preprocess_asm", Some("ml"), None, "ml.json", &cfg_json()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body:?}");
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // No task state was created by the rejected submission.
    let (status, _) = get_json(&app, "/task/ml").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn negative_label_is_rejected() {
    let (app, _state, _dir) = test_app();
    let (status, body) = submit(
        &app,
        "/preprocess_asm",
        Some("neg"),
        Some("-1"),
        "neg.json",
        &cfg_json(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body:?}");

    let (status, _) = get_json(&app, "/task/neg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unfinished_task_result_and_download_shapes() {
    let (app, state, _dir) = test_app();

    // A task that is still queued: registered but never enqueued, so it
    // stays pending for the duration of the test.
    state.registry.create("p1", 0, "queued").unwrap();

    // /result reports the unfinished task in-band, not as an HTTP error.
    let (status, body) = get_json(&app, "/result/p1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["task_id"], "p1");
    assert!(body.get("result_files").is_none());

    // /download of an unfinished task is a 400.
    let (status, _) = get_json(&app, "/download/p1/graph_p1.json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A failed task also reports in-band through /result, without eviction.
    state.registry.set_failed("p1", "boom");
    let (status, body) = get_json(&app, "/result/p1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "boom");
    let (status, _) = get_json(&app, "/result/p1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn failed_task_status_is_read_once() {
    let (app, _state, _dir) = test_app();

    // A binary submission hits the failing disassembler.
    let (status, _) = submit(&app, "/preprocess_pe", Some("f1"), Some("0"), "f1.exe", b"MZ...").await;
    assert_eq!(status, StatusCode::OK);

    let terminal = wait_for_terminal(&app, "f1").await;
    assert_eq!(terminal["status"], "failed");

    // The failed read evicted the task.
    let (status, _) = get_json(&app, "/task/f1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn task_id_defaults_to_upload_stem() {
    let (app, _state, _dir) = test_app();
    let (status, body) =
        submit(&app, "/preprocess_asm", None, Some("1"), "sample7.json", &cfg_json()).await;
    assert_eq!(status, StatusCode::OK, "{body:?}");
    assert_eq!(body["task_id"], "sample7");

    let terminal = wait_for_terminal(&app, "sample7").await;
    assert_eq!(terminal["status"], "completed", "{terminal:?}");
}

#[tokio::test]
async fn system_status_reports_pool_and_disk() {
    let (app, _state, _dir) = test_app();
    let (status, body) = get_json(&app, "/system/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_concurrent_tasks"], 1);
    assert_eq!(body["status"], "normal");
    assert!(body["disk"]["total_gb"].as_f64().unwrap() > 0.0);
    assert_eq!(body["disk"]["disk_enough"], true);
}
