//! Core data model and algorithms for turning disassembled binaries into
//! graph-structured feature sets.
//!
//! This crate is pure: it knows nothing about HTTP, task queues, or the
//! external embedding model. It provides instruction normalization, the CFG
//! interchange types, listing-to-CFG extraction, and the graph builder with
//! its quality gates. The asynchronous encoder call happens in the server
//! crate between [`graph::GraphBuilder::prepare`] and
//! [`graph::PreparedGraph::finish`].

pub mod cfg;
pub mod csr;
pub mod error;
pub mod graph;
pub mod listing;
pub mod norm;

pub use cfg::{parse_cfg, Block, Cfg, Instruction};
pub use csr::CsrMatrix;
pub use error::{BuildError, ListingError};
pub use graph::{GraphArtifact, GraphBuilder, PreparedGraph, ENCODE_BATCH_SIZE};
pub use norm::NormMode;
