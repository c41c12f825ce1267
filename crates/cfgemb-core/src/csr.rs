//! Row-compressed sparse matrix representation for the adjacency artifact.
//!
//! Field layout mirrors the scipy CSR triple (`indptr`, `indices`, `data`)
//! so downstream training code can consume the serialized form directly.

use serde::{Deserialize, Serialize};

/// A square sparse directed adjacency matrix in CSR form. Entries are 1
/// wherever an edge exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrMatrix {
    /// `[rows, cols]`; always square for an adjacency matrix.
    pub shape: [usize; 2],
    /// Row pointer array, length `rows + 1`.
    pub indptr: Vec<usize>,
    /// Column index of each stored entry, row-major.
    pub indices: Vec<usize>,
    /// Stored entry values (all ones for an adjacency matrix).
    pub data: Vec<u8>,
}

impl CsrMatrix {
    /// Builds an `n x n` matrix from an edge list sorted by `(row, col)`
    /// with no duplicates.
    pub fn from_sorted_edges(n: usize, edges: &[(usize, usize)]) -> Self {
        let mut indptr = Vec::with_capacity(n + 1);
        let mut indices = Vec::with_capacity(edges.len());

        indptr.push(0);
        let mut edge_iter = edges.iter().peekable();
        for row in 0..n {
            while let Some(&&(r, c)) = edge_iter.peek() {
                if r != row {
                    break;
                }
                indices.push(c);
                edge_iter.next();
            }
            indptr.push(indices.len());
        }

        let data = vec![1u8; indices.len()];
        CsrMatrix {
            shape: [n, n],
            indptr,
            indices,
            data,
        }
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    /// Counts entries strictly above the diagonal, i.e. the non-zero count
    /// of the upper triangle after self-loops are removed. This is the
    /// "informative branching structure" metric used by the quality gates.
    pub fn upper_triangle_nnz(&self) -> usize {
        let mut count = 0;
        for row in 0..self.rows() {
            for &col in &self.indices[self.indptr[row]..self.indptr[row + 1]] {
                if col > row {
                    count += 1;
                }
            }
        }
        count
    }
}
