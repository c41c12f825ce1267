//! Stage driver for one task: disassemble -> extract CFG -> build graph.
//!
//! Every stage runs under the configured per-stage timeout. All errors are
//! caught at the worker boundary ([`run_job`]) and folded into the task's
//! terminal `failed` state; scratch files are cleaned up unconditionally on
//! every exit path, so a crashed stage cannot leak working directories or
//! disassembler residue.

use std::path::Path;
use std::sync::Arc;

use cfgemb_core::{
    listing::parse_listing, parse_cfg, Cfg, GraphBuilder, PreparedGraph, ENCODE_BATCH_SIZE,
};
use thiserror::Error;
use tokio::time::timeout;

use crate::artifacts::{ArtifactNames, ArtifactStore, StoreError};
use crate::config::Config;
use crate::disassembler::{Disassembler, RESIDUE_EXTENSIONS};
use crate::encoder::{EncoderError, InstructionEncoder};
use crate::queue::{InputKind, Job};
use crate::registry::TaskRegistry;

/// Everything a worker needs to drive a task through the pipeline.
pub struct PipelineContext {
    pub registry: Arc<TaskRegistry>,
    pub store: Arc<ArtifactStore>,
    pub encoder: Arc<dyn InstructionEncoder>,
    pub disassembler: Arc<dyn Disassembler>,
    pub config: Arc<Config>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage timed out after {timeout_secs}s")]
    StageTimeout {
        stage: &'static str,
        timeout_secs: u64,
    },
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error(transparent)]
    Build(#[from] cfgemb_core::BuildError),
    #[error("CFG extraction failed: {0}")]
    Listing(#[from] cfgemb_core::ListingError),
    #[error("encoding failed: {0}")]
    Encoder(#[from] EncoderError),
    #[error("artifact persistence failed: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs one dequeued job to its terminal state. Never returns an error: any
/// failure becomes the task's `failed` message, and cleanup always runs.
pub async fn run_job(ctx: &PipelineContext, job: &Job) {
    ctx.registry
        .set_processing(&job.task_id, "processing started");

    let result = match job.kind {
        InputKind::Pe => process_pe(ctx, job).await,
        InputKind::Asm => process_listing_input(ctx, job, &job.input_path).await,
    };

    match result {
        Ok(names) => {
            tracing::info!(task_id = %job.task_id, "task completed");
            ctx.registry.set_completed(
                &job.task_id,
                [
                    ("graph".to_string(), names.graph),
                    ("sparse_matrix".to_string(), names.sparse_matrix),
                ]
                .into_iter()
                .collect(),
            );
        }
        Err(err) => {
            tracing::warn!(task_id = %job.task_id, error = %err, "task failed");
            ctx.registry.set_failed(&job.task_id, &err.to_string());
        }
    }

    cleanup(ctx, job).await;
}

/// Binary entry point: disassemble first, then continue with the listing.
async fn process_pe(ctx: &PipelineContext, job: &Job) -> Result<ArtifactNames, PipelineError> {
    ctx.registry
        .set_message(&job.task_id, "converting binary to assembly listing");

    let asm_dir = ctx
        .config
        .processing_dir()
        .join(&job.task_id)
        .join("asm");
    tokio::fs::create_dir_all(&asm_dir).await?;

    let listing_path = run_stage(ctx, "disassemble", async {
        ctx.disassembler
            .disassemble(&job.input_path, &asm_dir)
            .await
            .map_err(|err| PipelineError::MalformedInput(err.to_string()))
    })
    .await?;

    process_listing_input(ctx, job, &listing_path).await
}

/// Listing entry point, shared by both kinds. Also accepts a CFG interchange
/// JSON file directly (the disassembler boundary allows either form).
async fn process_listing_input(
    ctx: &PipelineContext,
    job: &Job,
    input: &Path,
) -> Result<ArtifactNames, PipelineError> {
    let file_id = file_id_of(input);

    // Idempotent skip: both artifacts already present means an earlier run
    // finished this sample.
    if ctx.store.exists(&job.task_id, &file_id) {
        tracing::info!(task_id = %job.task_id, "artifacts already present, skipping");
        return Ok(ArtifactNames::for_file_id(&file_id));
    }

    ctx.registry.set_message(&job.task_id, "extracting CFG");
    let cfg = run_stage(ctx, "extract CFG", extract_cfg(input)).await?;

    ctx.registry
        .set_message(&job.task_id, "building graph embeddings");
    let prepared = GraphBuilder::prepare(&cfg, job.label)?;
    let artifact = run_stage(ctx, "build graph", async {
        let vectors = encode_blocks(ctx.encoder.as_ref(), &prepared).await?;
        Ok(prepared.finish(vectors)?)
    })
    .await?;

    Ok(ctx.store.persist(&job.task_id, &file_id, &artifact)?)
}

/// Applies the per-stage timeout. The in-flight future is dropped on
/// expiry; external side effects are dealt with by the task cleanup.
async fn run_stage<T>(
    ctx: &PipelineContext,
    stage: &'static str,
    fut: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    let duration = ctx.config.stage_timeout;
    match timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::StageTimeout {
            stage,
            timeout_secs: duration.as_secs(),
        }),
    }
}

async fn extract_cfg(input: &Path) -> Result<Cfg, PipelineError> {
    let text = tokio::fs::read_to_string(input).await.map_err(|err| {
        PipelineError::MalformedInput(format!("cannot read {}: {err}", input.display()))
    })?;

    if input.extension().is_some_and(|ext| ext == "json") {
        return parse_cfg(&text)
            .map_err(|err| PipelineError::MalformedInput(format!("invalid CFG JSON: {err}")));
    }
    Ok(parse_listing(&text)?)
}

/// Encodes every block's token strings through the external capability in
/// order-preserving batches, returning per-instruction vectors per block.
async fn encode_blocks(
    encoder: &dyn InstructionEncoder,
    prepared: &PreparedGraph,
) -> Result<Vec<Vec<Vec<f32>>>, PipelineError> {
    let mut all = Vec::with_capacity(prepared.node_count());
    for tokens in prepared.block_tokens() {
        let mut block_vectors = Vec::with_capacity(tokens.len());
        for batch in tokens.chunks(ENCODE_BATCH_SIZE) {
            let vectors = encoder.encode(batch).await?;
            if vectors.len() != batch.len() {
                return Err(EncoderError::Protocol(format!(
                    "asked for {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                ))
                .into());
            }
            block_vectors.extend(vectors);
        }
        all.push(block_vectors);
    }
    Ok(all)
}

/// Unconditional cleanup: scratch directory, disassembler residue next to
/// the input, and the uploaded input itself.
async fn cleanup(ctx: &PipelineContext, job: &Job) {
    let scratch = ctx.config.processing_dir().join(&job.task_id);
    if let Err(err) = tokio::fs::remove_dir_all(&scratch).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(task_id = %job.task_id, error = %err, "scratch cleanup failed");
        }
    }

    let parent = job.input_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = file_id_of(&job.input_path);
    for ext in RESIDUE_EXTENSIONS {
        let residue = parent.join(format!("{stem}{ext}"));
        let _ = tokio::fs::remove_file(&residue).await;
    }

    let _ = tokio::fs::remove_file(&job.input_path).await;
}

fn file_id_of(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cfgemb_core::{Block, Cfg, GraphBuilder, Instruction};

    /// Hands out one-dimensional vectors carrying a global sequence number,
    /// so batch boundaries that reorder or drop rows become visible.
    struct CountingEncoder {
        next: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl InstructionEncoder for CountingEncoder {
        async fn encode(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EncoderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(batch
                .iter()
                .map(|_| vec![self.next.fetch_add(1, Ordering::SeqCst) as f32])
                .collect())
        }
    }

    #[tokio::test]
    async fn oversized_block_is_encoded_across_batches_in_order() {
        let addr = |i: usize| (4096 + i * 16).to_string();
        let mut cfg = Cfg::new();
        for i in 0..12 {
            let count = if i == 0 { ENCODE_BATCH_SIZE + 1 } else { 1 };
            let out = if i + 1 < 12 { vec![addr(i + 1)] } else { vec![] };
            cfg.insert(
                addr(i),
                Block {
                    insn_list: vec![Instruction::new("nop", &[]); count],
                    out_edge_list: out,
                },
            );
        }

        let encoder = CountingEncoder {
            next: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        };
        let prepared = GraphBuilder::prepare(&cfg, 0).unwrap();
        let vectors = encode_blocks(&encoder, &prepared).await.unwrap();
        assert_eq!(vectors[0].len(), ENCODE_BATCH_SIZE + 1);
        // First block takes two calls (1000 + 1), the other eleven one each.
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 13);

        let artifact = prepared.finish(vectors).unwrap();
        // Sequence values 0..=1000 mean-pool to exactly 500; later blocks
        // continue the sequence, proving nothing was reordered or dropped.
        assert_eq!(artifact.x[0], vec![500.0]);
        for i in 1..12 {
            assert_eq!(artifact.x[i], vec![(ENCODE_BATCH_SIZE + i) as f32]);
        }
    }
}
