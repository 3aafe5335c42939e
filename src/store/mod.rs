//! Store module - persistent chunk storage with vector search
//!
//! - LanceDB: chunk rows + ANN similarity search
//! - Manifest: sealed flag, stats, and the store-wide embedding identity
//!
//! Lifecycle: `create` (ingestion only) -> `put`* -> `seal` -> `open_read_only`
//! (query time). The ingestion pipeline is the only writer; the query service
//! only ever opens sealed stores read-only.

mod lance;
mod manifest;

pub use lance::LanceChunkStore;
pub use manifest::{StoreManifest, MANIFEST_FILE};

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Data Directory
// ============================================================================

/// Default data directory (~/.tafsiir-rag/).
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tafsiir-rag")
}

/// Default vector store location inside the data directory.
pub fn default_store_path() -> PathBuf {
    get_data_dir().join("tafsiir.lance")
}

// ============================================================================
// Errors
// ============================================================================

/// Vector store failures. A failed search is an error, never an empty
/// result set.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store already exists at {0}; remove it before re-ingesting")]
    AlreadyExists(PathBuf),

    #[error("vector store not found at {0}")]
    NotFound(PathBuf),

    #[error("vector store at {0} is not sealed; run ingestion to completion first")]
    NotSealed(PathBuf),

    #[error("embedding dimension {actual} does not match store dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store is read-only")]
    ReadOnly,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ============================================================================
// Types
// ============================================================================

/// One persisted chunk entry. The embedding identity is store-wide and lives
/// in the manifest rather than on every row.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub title: String,
    pub text: String,
    pub labels: Vec<String>,
    pub embedding: Vec<f32>,
}

/// One similarity-search hit, highest score first.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub text: String,
    /// Similarity in (0, 1], derived from the index distance.
    pub score: f32,
}

/// Store statistics reported after sealing.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub size_bytes: u64,
}

// ============================================================================
// Helpers
// ============================================================================

/// Total on-disk size of the store directory.
pub(crate) fn dir_size_bytes(path: &std::path::Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_size_counts_files_recursively() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 100]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b.bin"), vec![0u8; 50]).unwrap();

        assert_eq!(dir_size_bytes(dir.path()), 150);
    }

    #[test]
    fn test_default_store_path_under_data_dir() {
        assert!(default_store_path().starts_with(get_data_dir()));
    }
}
