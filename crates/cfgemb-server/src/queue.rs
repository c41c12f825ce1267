//! Bounded-concurrency job queue and worker pool.
//!
//! Submissions append to an unbounded FIFO channel; a fixed pool of worker
//! loops (default size 1, because the encoder monopolizes a shared
//! accelerator) consumes it. The queue depth and the set of actively
//! processing task ids exist purely for status reporting; once dequeued, a
//! task owns its working directory exclusively.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::pipeline::{self, PipelineContext};

/// Selects the pipeline entry stage: a binary starts at disassembly, an
/// assembly listing (or CFG JSON) starts at CFG extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pe,
    Asm,
}

/// One queued unit of work.
#[derive(Debug)]
pub struct Job {
    pub task_id: String,
    pub input_path: PathBuf,
    pub kind: InputKind,
    pub label: i64,
}

/// Submission side of the queue plus the status-reporting counters.
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
    depth: AtomicUsize,
    active: Mutex<HashSet<String>>,
    max_concurrent: usize,
}

impl JobQueue {
    pub fn new(max_concurrent: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(JobQueue {
            tx,
            depth: AtomicUsize::new(0),
            active: Mutex::new(HashSet::new()),
            max_concurrent,
        });
        (queue, rx)
    }

    /// Appends a job and returns the queue depth after insertion (the
    /// caller-visible "queue position").
    pub fn enqueue(&self, job: Job) -> usize {
        self.depth.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as the worker pool; a send failure
        // means the service is shutting down and the depth no longer matters.
        if self.tx.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        self.depth.load(Ordering::SeqCst)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn mark_active(&self, task_id: &str) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut set) = self.active.lock() {
            set.insert(task_id.to_string());
        }
    }

    fn mark_done(&self, task_id: &str) {
        if let Ok(mut set) = self.active.lock() {
            set.remove(task_id);
        }
    }
}

/// Spawns `queue.max_concurrent()` worker loops over a shared receiver.
/// A worker never dies on task failure; every outcome is folded into the
/// task's terminal state and the loop moves on.
pub fn spawn_workers(
    queue: Arc<JobQueue>,
    rx: mpsc::UnboundedReceiver<Job>,
    ctx: Arc<PipelineContext>,
) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for worker_id in 0..queue.max_concurrent() {
        let rx = Arc::clone(&rx);
        let queue = Arc::clone(&queue);
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            loop {
                let job = { rx.lock().await.recv().await };
                let Some(job) = job else {
                    tracing::debug!(worker_id, "job channel closed, worker exiting");
                    break;
                };
                queue.mark_active(&job.task_id);
                tracing::info!(worker_id, task_id = %job.task_id, "task dequeued");
                pipeline::run_job(&ctx, &job).await;
                queue.mark_done(&job.task_id);
            }
        });
    }
}
