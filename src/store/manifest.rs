//! Store manifest - sealed flag, stats, and embedding identity
//!
//! A small JSON sidecar inside the store directory. Written unsealed at
//! `create`, rewritten sealed with final stats at `seal`. The query service
//! refuses to search a store whose manifest is missing or unsealed.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingIdentity;

use super::StoreError;

/// Manifest file name inside the store directory.
pub const MANIFEST_FILE: &str = "manifest.json";

const MANIFEST_VERSION: u32 = 1;

/// Store-level metadata persisted alongside the vector table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreManifest {
    pub version: u32,
    pub sealed: bool,
    pub chunk_count: usize,
    pub size_bytes: u64,
    pub embedding_identity: EmbeddingIdentity,
    pub created_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
}

impl StoreManifest {
    /// Fresh, unsealed manifest for a new store.
    pub fn new(identity: EmbeddingIdentity) -> Self {
        Self {
            version: MANIFEST_VERSION,
            sealed: false,
            chunk_count: 0,
            size_bytes: 0,
            embedding_identity: identity,
            created_at: Utc::now(),
            sealed_at: None,
        }
    }

    fn file_path(store_path: &Path) -> PathBuf {
        store_path.join(MANIFEST_FILE)
    }

    /// Load the manifest from a store directory, `None` when absent.
    pub fn load(store_path: &Path) -> Result<Option<Self>, StoreError> {
        let path = Self::file_path(store_path);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read manifest at {}", path.display()))?;
        let manifest: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse manifest at {}", path.display()))?;

        Ok(Some(manifest))
    }

    /// Persist the manifest into the store directory.
    pub fn save(&self, store_path: &Path) -> Result<(), StoreError> {
        let path = Self::file_path(store_path);
        let content =
            serde_json::to_string_pretty(self).context("failed to serialize manifest")?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write manifest at {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> EmbeddingIdentity {
        EmbeddingIdentity {
            provider: "gemini".to_string(),
            model: "gemini-embedding-001".to_string(),
            dimension: 768,
        }
    }

    #[test]
    fn test_new_manifest_is_unsealed() {
        let manifest = StoreManifest::new(identity());
        assert!(!manifest.sealed);
        assert_eq!(manifest.chunk_count, 0);
        assert!(manifest.sealed_at.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();

        let mut manifest = StoreManifest::new(identity());
        manifest.sealed = true;
        manifest.chunk_count = 42;
        manifest.save(dir.path()).unwrap();

        let loaded = StoreManifest::load(dir.path()).unwrap().unwrap();
        assert!(loaded.sealed);
        assert_eq!(loaded.chunk_count, 42);
        assert_eq!(loaded.embedding_identity, identity());
    }

    #[test]
    fn test_load_missing_manifest_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(StoreManifest::load(dir.path()).unwrap().is_none());
    }
}
