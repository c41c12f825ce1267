//! Binary entrypoint for the cfgemb preprocessing server.
//!
//! Reads configuration from environment variables:
//! - `CFGEMB_DATA_DIR`: root for uploads, scratch, results (default: "./data")
//! - `CFGEMB_STAGE_TIMEOUT_SECS`: per-stage timeout (default: "600")
//! - `CFGEMB_MAX_CONCURRENT`: worker pool size (default: "1")
//! - `CFGEMB_ENCODER_URL`: embedding sidecar base URL
//! - `CFGEMB_IDA_PATH` / `CFGEMB_IDA_SCRIPT`: disassembler invocation
//! - `CFGEMB_MIN_DISK_GB`: submission disk preflight (default: "1.0")
//! - `CFGEMB_PORT`: server listen port (default: "17777")

use cfgemb_server::config::Config;
use cfgemb_server::router::build_router;
use cfgemb_server::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let port = config.port;

    let state = AppState::with_default_capabilities(config)
        .expect("Failed to initialize application state");

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("cfgemb server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
