//! Graph construction from a CFG: node-id assignment, instruction
//! tokenization, embedding aggregation, sparse adjacency assembly, and the
//! quality gates applied before anything is persisted.
//!
//! Building is split into two phases so the external encoder call can stay
//! asynchronous at the service boundary while everything here remains pure:
//!
//! 1. [`GraphBuilder::prepare`] validates the label, assigns deterministic
//!    node ids in CFG iteration order, and produces per-block encoder token
//!    strings.
//! 2. The caller encodes each block's tokens (batched, order-preserving) and
//!    hands the per-instruction vectors to [`PreparedGraph::finish`], which
//!    aggregates block embeddings, resolves edges, builds the CSR adjacency,
//!    and runs the gates.

use std::collections::HashMap;

use petgraph::graphmap::DiGraphMap;
use serde::Serialize;

use crate::cfg::Cfg;
use crate::csr::CsrMatrix;
use crate::error::BuildError;
use crate::norm::{normalize, tokenize_for_encoder, NormMode};

/// Maximum token strings per external encoder call.
pub const ENCODE_BATCH_SIZE: usize = 1000;
/// Quality gate: maximum adjacency matrix row count.
pub const MAX_ADJACENCY_ROWS: usize = 46000;
/// Quality gate: minimum basic block count.
pub const MIN_NODE_COUNT: usize = 10;
/// Quality gate: minimum non-self-loop upper-triangular edge count.
pub const MIN_INFORMATIVE_EDGES: usize = 3;
/// Binary classification: the label vector is one-hot over two classes.
pub const NUM_CLASSES: usize = 2;

/// The immutable per-task output: node features, one-hot label, and sparse
/// directed adjacency.
#[derive(Debug, Clone, Serialize)]
pub struct GraphArtifact {
    /// Node-feature matrix, one row per basic block in node-id order.
    pub x: Vec<Vec<f32>>,
    /// One-hot label vector of length [`NUM_CLASSES`].
    pub y: [f32; NUM_CLASSES],
    /// Sparse directed adjacency over exactly the node-id space.
    pub adjacency: CsrMatrix,
}

/// Entry point for graph construction.
pub struct GraphBuilder;

impl GraphBuilder {
    /// Phase one: validates the label, assigns node ids by CFG iteration
    /// order (0-based, monotonically increasing), and tokenizes every
    /// instruction for the encoder, preserving block-internal order.
    ///
    /// A block with zero instructions is rejected here: its embedding would
    /// otherwise be a mean over nothing.
    pub fn prepare(cfg: &Cfg, label: i64) -> Result<PreparedGraph, BuildError> {
        if label != 0 && label != 1 {
            return Err(BuildError::LabelOutOfRange { label });
        }

        let mut addr_to_id = HashMap::with_capacity(cfg.len());
        let mut block_tokens = Vec::with_capacity(cfg.len());
        let mut out_edges = Vec::new();

        for (id, (addr, block)) in cfg.iter().enumerate() {
            addr_to_id.insert(addr.clone(), id);

            if block.insn_list.is_empty() {
                return Err(BuildError::EmptyBlock {
                    address: addr.clone(),
                });
            }

            let tokens: Vec<String> = block
                .insn_list
                .iter()
                .map(|insn| {
                    let canonical = normalize(&insn.opcode, &insn.operands, NormMode::Comma);
                    tokenize_for_encoder(&canonical, None, None)
                })
                .collect();
            block_tokens.push(tokens);

            for target in &block.out_edge_list {
                out_edges.push((addr.clone(), target.clone()));
            }
        }

        Ok(PreparedGraph {
            addr_to_id,
            block_tokens,
            out_edges,
            label,
        })
    }
}

/// Output of [`GraphBuilder::prepare`]: everything needed to finish the
/// build once embeddings are available.
pub struct PreparedGraph {
    addr_to_id: HashMap<String, usize>,
    block_tokens: Vec<Vec<String>>,
    out_edges: Vec<(String, String)>,
    label: i64,
}

impl PreparedGraph {
    /// Encoder token strings per block, in node-id order.
    pub fn block_tokens(&self) -> &[Vec<String>] {
        &self.block_tokens
    }

    /// Number of basic blocks (= rows of the eventual feature matrix).
    pub fn node_count(&self) -> usize {
        self.block_tokens.len()
    }

    /// The deterministic address -> node id assignment.
    pub fn node_id(&self, addr: &str) -> Option<usize> {
        self.addr_to_id.get(addr).copied()
    }

    /// Phase two: aggregates per-instruction vectors into per-block features
    /// by arithmetic mean, resolves edges, builds the CSR adjacency, and
    /// applies the quality gates in order. Any gate failure aborts with the
    /// offending metric; no partial artifact is produced.
    ///
    /// `block_vectors[i]` must hold one vector per token string of block `i`,
    /// in order, all of the same dimension.
    pub fn finish(self, block_vectors: Vec<Vec<Vec<f32>>>) -> Result<GraphArtifact, BuildError> {
        let n = self.block_tokens.len();
        if block_vectors.len() != n {
            return Err(BuildError::VectorCountMismatch {
                block: 0,
                expected: n,
                got: block_vectors.len(),
            });
        }

        let mut dim: Option<usize> = None;
        let mut x = Vec::with_capacity(n);
        for (block_id, (tokens, vectors)) in
            self.block_tokens.iter().zip(&block_vectors).enumerate()
        {
            if vectors.len() != tokens.len() {
                return Err(BuildError::VectorCountMismatch {
                    block: block_id,
                    expected: tokens.len(),
                    got: vectors.len(),
                });
            }
            for vector in vectors {
                match dim {
                    None => dim = Some(vector.len()),
                    Some(d) if d != vector.len() => {
                        return Err(BuildError::DimensionMismatch {
                            expected: d,
                            got: vector.len(),
                        })
                    }
                    Some(_) => {}
                }
            }
            x.push(mean_vector(vectors));
        }

        let mut y = [0.0f32; NUM_CLASSES];
        y[self.label as usize] = 1.0;

        // Resolve successor addresses through the same assignment used for
        // the feature rows; an unknown target means the CFG is malformed.
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for id in 0..n {
            graph.add_node(id);
        }
        for (from, to) in &self.out_edges {
            let from_id = self.addr_to_id[from];
            let to_id = *self
                .addr_to_id
                .get(to)
                .ok_or_else(|| BuildError::DanglingEdge {
                    from: from.clone(),
                    to: to.clone(),
                })?;
            graph.add_edge(from_id, to_id, ());
        }

        let mut edges: Vec<(usize, usize)> = graph.all_edges().map(|(a, b, _)| (a, b)).collect();
        edges.sort_unstable();
        let adjacency = CsrMatrix::from_sorted_edges(n, &edges);

        // Quality gates, in order; each failure short-circuits.
        if adjacency.rows() > MAX_ADJACENCY_ROWS {
            return Err(BuildError::GraphTooLarge {
                rows: adjacency.rows(),
                limit: MAX_ADJACENCY_ROWS,
            });
        }
        if n < MIN_NODE_COUNT {
            return Err(BuildError::TooFewNodes {
                nodes: n,
                minimum: MIN_NODE_COUNT,
            });
        }
        let informative = adjacency.upper_triangle_nnz();
        if informative < MIN_INFORMATIVE_EDGES {
            return Err(BuildError::TooFewEdges {
                edges: informative,
                minimum: MIN_INFORMATIVE_EDGES,
            });
        }

        Ok(GraphArtifact { x, y, adjacency })
    }
}

fn mean_vector(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dim = vectors.first().map(Vec::len).unwrap_or(0);
    let mut mean = vec![0.0f32; dim];
    for vector in vectors {
        for (acc, v) in mean.iter_mut().zip(vector) {
            *acc += v;
        }
    }
    let count = vectors.len() as f32;
    for value in &mut mean {
        *value /= count;
    }
    mean
}
