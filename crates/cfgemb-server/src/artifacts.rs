//! Idempotent artifact persistence.
//!
//! Two files per task under `results/<task_id>/`, named deterministically
//! from the sample file id: `graph_<id>.json` (features + one-hot label) and
//! `graph_<id>_sparse_matrix.json` (CSR adjacency). Writes go through a
//! named temp file in the target directory followed by a rename, so
//! [`ArtifactStore::exists`] never reports a half-written pair.

use std::path::{Path, PathBuf};

use cfgemb_core::GraphArtifact;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Deterministic artifact names for one sample.
#[derive(Debug, Clone)]
pub struct ArtifactNames {
    pub graph: String,
    pub sparse_matrix: String,
}

impl ArtifactNames {
    pub fn for_file_id(file_id: &str) -> Self {
        ArtifactNames {
            graph: format!("graph_{file_id}.json"),
            sparse_matrix: format!("graph_{file_id}_sparse_matrix.json"),
        }
    }
}

pub struct ArtifactStore {
    result_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(result_dir: PathBuf) -> Self {
        ArtifactStore { result_dir }
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.result_dir.join(task_id)
    }

    /// True iff both expected output files are already present, i.e. the
    /// pipeline may skip recomputation.
    pub fn exists(&self, task_id: &str, file_id: &str) -> bool {
        let names = ArtifactNames::for_file_id(file_id);
        let dir = self.task_dir(task_id);
        dir.join(&names.graph).is_file() && dir.join(&names.sparse_matrix).is_file()
    }

    /// Writes both artifacts atomically (temp name, then rename) and returns
    /// their names.
    pub fn persist(
        &self,
        task_id: &str,
        file_id: &str,
        artifact: &GraphArtifact,
    ) -> Result<ArtifactNames, StoreError> {
        let names = ArtifactNames::for_file_id(file_id);
        let dir = self.task_dir(task_id);
        std::fs::create_dir_all(&dir)?;

        let graph_file = GraphFile {
            x: &artifact.x,
            y: &artifact.y,
        };
        write_atomic(&dir, &names.graph, &graph_file)?;
        write_atomic(&dir, &names.sparse_matrix, &artifact.adjacency)?;
        Ok(names)
    }

    /// Absolute path of a named artifact for download serving.
    pub fn file_path(&self, task_id: &str, filename: &str) -> PathBuf {
        self.task_dir(task_id).join(filename)
    }
}

/// Node features plus one-hot label, the first of the two per-task outputs.
#[derive(Serialize)]
struct GraphFile<'a> {
    x: &'a [Vec<f32>],
    y: &'a [f32],
}

fn write_atomic<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(temp.path(), &bytes)?;
    temp.persist(dir.join(name)).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgemb_core::CsrMatrix;

    fn artifact() -> GraphArtifact {
        GraphArtifact {
            x: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
            y: [1.0, 0.0],
            adjacency: CsrMatrix::from_sorted_edges(2, &[(0, 1)]),
        }
    }

    #[test]
    fn persist_then_exists_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());

        assert!(!store.exists("t1", "t1"));
        let names = store.persist("t1", "t1", &artifact()).unwrap();
        assert_eq!(names.graph, "graph_t1.json");
        assert_eq!(names.sparse_matrix, "graph_t1_sparse_matrix.json");
        assert!(store.exists("t1", "t1"));

        // The serialized graph file carries x and y.
        let raw = std::fs::read_to_string(store.file_path("t1", &names.graph)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["x"].as_array().unwrap().len(), 2);
        assert_eq!(value["y"], serde_json::json!([1.0, 0.0]));
    }

    #[test]
    fn half_written_pair_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());

        let task_dir = store.task_dir("t1");
        std::fs::create_dir_all(&task_dir).unwrap();
        std::fs::write(task_dir.join("graph_t1.json"), b"{}").unwrap();

        assert!(!store.exists("t1", "t1"));
    }
}
