//! Service configuration read from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration. Every knob has a default suitable for a local
/// single-worker deployment; the worker count stays at 1 unless the encoder
/// accelerator can take more.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for uploads, per-task scratch space, and results.
    pub data_dir: PathBuf,
    /// Wall-clock bound applied to each pipeline stage individually.
    pub stage_timeout: Duration,
    /// Worker pool size (= maximum concurrently processing tasks).
    pub max_concurrent: usize,
    /// Base URL of the embedding encoder sidecar.
    pub encoder_url: String,
    /// Disassembler executable invoked in batch mode.
    pub ida_path: PathBuf,
    /// Listing-export script handed to the disassembler.
    pub ida_script: PathBuf,
    /// Minimum free disk space (GB) required to accept a submission.
    pub min_disk_gb: f64,
    /// HTTP listen port.
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            data_dir: env_or("CFGEMB_DATA_DIR", "./data").into(),
            stage_timeout: Duration::from_secs(
                env_parse("CFGEMB_STAGE_TIMEOUT_SECS", 600u64),
            ),
            max_concurrent: env_parse("CFGEMB_MAX_CONCURRENT", 1usize).max(1),
            encoder_url: env_or("CFGEMB_ENCODER_URL", "http://127.0.0.1:17778"),
            ida_path: env_or("CFGEMB_IDA_PATH", "./ida/idat").into(),
            ida_script: env_or("CFGEMB_IDA_SCRIPT", "./scripts/export_listing.py").into(),
            min_disk_gb: env_parse("CFGEMB_MIN_DISK_GB", 1.0f64),
            port: env_parse("CFGEMB_PORT", 17777u16),
        }
    }

    /// Where uploaded inputs are written before processing.
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("samples")
    }

    /// Per-task scratch space, removed on every exit path.
    pub fn processing_dir(&self) -> PathBuf {
        self.data_dir.join("processing")
    }

    /// Where finished artifacts live, one subdirectory per task.
    pub fn result_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
