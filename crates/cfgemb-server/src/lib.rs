//! HTTP/JSON service that converts binary samples into graph-structured
//! feature sets for malware classification.
//!
//! Clients submit a binary (or an assembly listing), poll task status, and
//! download two artifacts per sample: a node-feature/label file and a sparse
//! adjacency file. This crate contains the task registry, the bounded
//! worker pool that drives the pipeline stages, the artifact store, the
//! injected encoder/disassembler capabilities, and the axum API surface.

pub mod artifacts;
pub mod config;
pub mod disassembler;
pub mod disk;
pub mod encoder;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod router;
pub mod schema;
pub mod state;
