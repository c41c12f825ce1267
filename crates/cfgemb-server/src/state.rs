//! Shared application state wiring the registry, queue, artifact store, and
//! injected capabilities together.

use std::sync::Arc;

use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::disassembler::{Disassembler, IdaDisassembler};
use crate::encoder::{HttpEncoder, InstructionEncoder};
use crate::pipeline::PipelineContext;
use crate::queue::{spawn_workers, JobQueue};
use crate::registry::TaskRegistry;

/// Shared state handed to every axum handler. Cloning is cheap; everything
/// mutable lives behind its own synchronization.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TaskRegistry>,
    pub store: Arc<ArtifactStore>,
    pub queue: Arc<JobQueue>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Builds the state with injected capabilities and spawns the worker
    /// pool. Must run inside a tokio runtime.
    pub fn new(
        config: Config,
        encoder: Arc<dyn InstructionEncoder>,
        disassembler: Arc<dyn Disassembler>,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(config.upload_dir())?;
        std::fs::create_dir_all(config.processing_dir())?;
        std::fs::create_dir_all(config.result_dir())?;

        let config = Arc::new(config);
        let registry = Arc::new(TaskRegistry::new());
        let store = Arc::new(ArtifactStore::new(config.result_dir()));
        let (queue, rx) = JobQueue::new(config.max_concurrent);

        let ctx = Arc::new(PipelineContext {
            registry: Arc::clone(&registry),
            store: Arc::clone(&store),
            encoder,
            disassembler,
            config: Arc::clone(&config),
        });
        spawn_workers(Arc::clone(&queue), rx, ctx);

        Ok(AppState {
            registry,
            store,
            queue,
            config,
        })
    }

    /// Production wiring: HTTP encoder sidecar plus IDA batch disassembly.
    pub fn with_default_capabilities(config: Config) -> std::io::Result<Self> {
        let encoder = Arc::new(HttpEncoder::new(&config.encoder_url));
        let disassembler = Arc::new(IdaDisassembler::new(
            config.ida_path.clone(),
            config.ida_script.clone(),
        ));
        Self::new(config, encoder, disassembler)
    }
}
