//! Injected disassembler capability.
//!
//! Given a binary path, produces a textual disassembly listing consumable by
//! the CFG extractor. The production implementation shells out to IDA in
//! batch mode with a listing-export script; failure is signaled by a
//! non-zero exit or by the expected `.asm` output not appearing. The batch
//! run leaves database/residue files next to the input, which the task
//! cleanup removes regardless of outcome.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisassemblerError {
    #[error("failed to run disassembler: {0}")]
    Spawn(String),
    #[error("disassembler exited with {0}")]
    Exited(String),
    #[error("disassembler produced no listing at {0}")]
    MissingListing(PathBuf),
}

/// `disassemble(input, output_dir) -> listing path`.
#[async_trait]
pub trait Disassembler: Send + Sync {
    async fn disassemble(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, DisassemblerError>;
}

/// IDA batch-mode invocation: `idat -A -S"<script> <output_dir>" <input>`.
pub struct IdaDisassembler {
    ida_path: PathBuf,
    script_path: PathBuf,
}

impl IdaDisassembler {
    pub fn new(ida_path: PathBuf, script_path: PathBuf) -> Self {
        IdaDisassembler {
            ida_path,
            script_path,
        }
    }
}

#[async_trait]
impl Disassembler for IdaDisassembler {
    async fn disassemble(
        &self,
        input: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, DisassemblerError> {
        let script_arg = format!(
            "-S{} {}",
            self.script_path.display(),
            output_dir.display()
        );
        let output = tokio::process::Command::new(&self.ida_path)
            .arg("-A")
            .arg(script_arg)
            .arg(input)
            .output()
            .await
            .map_err(|err| DisassemblerError::Spawn(err.to_string()))?;

        if !output.status.success() {
            return Err(DisassemblerError::Exited(output.status.to_string()));
        }

        let listing = expected_listing_path(input, output_dir);
        if !listing.is_file() {
            return Err(DisassemblerError::MissingListing(listing));
        }
        Ok(listing)
    }
}

/// The export script writes `<input stem>.asm` into the output directory.
pub fn expected_listing_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{stem}.asm"))
}

/// Extensions of database/residue files the batch run leaves next to the
/// input binary.
pub const RESIDUE_EXTENSIONS: &[&str] = &[".i64", ".idb", ".id0", ".id1", ".id2", ".nam", ".til"];
