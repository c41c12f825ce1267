//! Error types for CFG construction and validation.
//!
//! Uses `thiserror` for structured, matchable variants. Quality-gate
//! failures carry the offending metric so callers can report it verbatim.

use thiserror::Error;

/// Errors produced while building or validating a graph artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The classification label was outside the binary {0, 1} range.
    #[error("label out of range: {label} (expected 0 or 1)")]
    LabelOutOfRange { label: i64 },

    /// A basic block contained no instructions; its embedding would be a
    /// division by zero.
    #[error("basic block at address {address} has no instructions")]
    EmptyBlock { address: String },

    /// An out-edge referenced an address with no block in the CFG mapping.
    #[error("dangling edge: block {from} references unknown address {to}")]
    DanglingEdge { from: String, to: String },

    /// Encoder output did not line up with the requested token strings.
    #[error("encoder returned {got} vectors for block {block}, expected {expected}")]
    VectorCountMismatch {
        block: usize,
        expected: usize,
        got: usize,
    },

    /// Encoder vectors disagreed on dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Quality gate: the adjacency matrix exceeds the row limit.
    #[error("sparse matrix too large: {rows} rows (limit {limit})")]
    GraphTooLarge { rows: usize, limit: usize },

    /// Quality gate: too few basic blocks to be informative.
    #[error("too few basic blocks: {nodes} (minimum {minimum})")]
    TooFewNodes { nodes: usize, minimum: usize },

    /// Quality gate: too few non-self-loop edges in the upper triangle.
    #[error("too few informative edges: {edges} (minimum {minimum})")]
    TooFewEdges { edges: usize, minimum: usize },
}

/// Errors produced while parsing a textual disassembly listing.
#[derive(Debug, Error)]
pub enum ListingError {
    /// The listing contained no parseable instruction lines.
    #[error("listing contains no parseable instructions")]
    NoInstructions,
}
