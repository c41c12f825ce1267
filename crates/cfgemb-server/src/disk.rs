//! Disk-space preflight for submissions and the system status surface.

use std::path::Path;

use serde::Serialize;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Disk summary reported by `GET /system/status`.
#[derive(Debug, Clone, Serialize)]
pub struct DiskStatus {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub usage_percent: f64,
    pub min_required_gb: f64,
    pub disk_enough: bool,
}

/// Reads the filesystem holding `path`.
pub fn disk_status(path: &Path, min_required_gb: f64) -> std::io::Result<DiskStatus> {
    let total = fs2::total_space(path)? as f64;
    let free = fs2::available_space(path)? as f64;
    let used = total - free;

    let free_gb = free / GB;
    Ok(DiskStatus {
        total_gb: round2(total / GB),
        used_gb: round2(used / GB),
        free_gb: round2(free_gb),
        usage_percent: round2(if total > 0.0 { used / total * 100.0 } else { 0.0 }),
        min_required_gb,
        disk_enough: free_gb >= min_required_gb,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
