use std::fs;
use std::path::PathBuf;

use crate::domain::{MatrixQuery, MetagenomeId};
use crate::error::MgError;
use crate::matrix::{self, SparseMatrix};

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Fetches one matrix fragment for a batch of metagenome ids. Implemented by
/// the HTTP client; tests substitute mocks.
pub trait MatrixFetch: Send + Sync {
    fn fetch_matrix(
        &self,
        query: &MatrixQuery,
        ids: &[MetagenomeId],
    ) -> Result<SparseMatrix, MgError>;
}

/// Receives the accumulated matrix after every merged batch. Overwrite
/// semantics: each save replaces the previous snapshot.
pub trait CheckpointSink {
    fn save(&self, matrix: &SparseMatrix) -> Result<(), MgError>;
}

/// Checkpoint sink writing BIOM JSON to a fixed path.
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CheckpointSink for FileCheckpoint {
    fn save(&self, matrix: &SparseMatrix) -> Result<(), MgError> {
        let json = serde_json::to_string(matrix)
            .map_err(|err| MgError::Filesystem(err.to_string()))?;
        fs::write(&self.path, json).map_err(|err| {
            MgError::Filesystem(format!("write checkpoint {}: {err}", self.path.display()))
        })
    }
}

/// Splits a request spanning many metagenomes into bounded batches, one fetch
/// per batch, and folds the fragments into a single accumulated matrix.
pub struct BatchMerger<'a, F: MatrixFetch> {
    fetcher: &'a F,
    batch_size: usize,
}

impl<'a, F: MatrixFetch> BatchMerger<'a, F> {
    pub fn new(fetcher: &'a F) -> Self {
        Self {
            fetcher,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(fetcher: &'a F, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self {
            fetcher,
            batch_size,
        }
    }

    /// Runs the batched retrieval. Any fetch failure aborts the whole run;
    /// nothing is retried and no partial result is returned. Returns `None`
    /// for an empty id list.
    pub fn run(
        &self,
        query: &MatrixQuery,
        ids: &[MetagenomeId],
        checkpoint: Option<&dyn CheckpointSink>,
    ) -> Result<Option<SparseMatrix>, MgError> {
        let mut accumulated: Option<SparseMatrix> = None;
        let batches = ids.chunks(self.batch_size);
        let total = batches.len();
        for (index, batch) in batches.enumerate() {
            tracing::debug!(batch = index + 1, total, size = batch.len(), "fetching batch");
            let fragment = self.fetcher.fetch_matrix(query, batch)?;
            accumulated = Some(matrix::merge(accumulated, &fragment)?);
            if let (Some(sink), Some(current)) = (checkpoint, accumulated.as_ref()) {
                sink.save(current)?;
            }
        }
        Ok(accumulated)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Map;

    use super::*;
    use crate::matrix::{Axis, ElementType, MatrixType};

    struct RecordingFetch {
        calls: Mutex<Vec<usize>>,
    }

    impl RecordingFetch {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl MatrixFetch for RecordingFetch {
        fn fetch_matrix(
            &self,
            _query: &MatrixQuery,
            ids: &[MetagenomeId],
        ) -> Result<SparseMatrix, MgError> {
            self.calls.lock().unwrap().push(ids.len());
            Ok(SparseMatrix {
                id: "fragment".to_string(),
                matrix_type: MatrixType::Sparse,
                matrix_element_type: ElementType::Int,
                shape: [0, ids.len()],
                rows: Vec::new(),
                columns: ids
                    .iter()
                    .map(|id| Axis {
                        id: id.as_str().to_string(),
                        metadata: None,
                    })
                    .collect(),
                data: Vec::new(),
                extra: Map::new(),
            })
        }
    }

    fn query() -> MatrixQuery {
        MatrixQuery {
            group_level: "function".to_string(),
            source: "Subsystems".to_string(),
            evalue: 5,
            identity: 60,
            length: 15,
            intersect: None,
        }
    }

    fn ids(count: usize) -> Vec<MetagenomeId> {
        (0..count)
            .map(|n| format!("mgm{n}.3").parse().unwrap())
            .collect()
    }

    #[test]
    fn small_request_issues_single_fetch() {
        let fetch = RecordingFetch::new();
        let merger = BatchMerger::new(&fetch);
        let result = merger.run(&query(), &ids(50), None).unwrap().unwrap();
        assert_eq!(*fetch.calls.lock().unwrap(), vec![50]);
        assert_eq!(result.shape[1], 50);
    }

    #[test]
    fn large_request_is_chunked() {
        let fetch = RecordingFetch::new();
        let merger = BatchMerger::new(&fetch);
        let result = merger.run(&query(), &ids(120), None).unwrap().unwrap();
        assert_eq!(*fetch.calls.lock().unwrap(), vec![50, 50, 20]);
        assert_eq!(result.shape[1], 120);
    }

    #[test]
    fn empty_request_fetches_nothing() {
        let fetch = RecordingFetch::new();
        let merger = BatchMerger::new(&fetch);
        let result = merger.run(&query(), &[], None).unwrap();
        assert!(result.is_none());
        assert!(fetch.calls.lock().unwrap().is_empty());
    }
}
