//! Ingestion pipeline - corpus rebuild end to end
//!
//! Drives chunking -> embedding -> storage for a full corpus rebuild:
//! the old store is deleted, every chunk is embedded and written with a
//! fixed inter-request delay, failed chunks are skipped after a longer
//! backoff, and the store is sealed with final stats. Callers must construct
//! the embedder (validating credentials) before invoking the pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::corpus::{ChunkConfig, QuranCorpus, VerseChunk, VerseChunker};
use crate::embedding::EmbeddingProvider;
use crate::store::{LanceChunkStore, StoreStats, StoredChunk};

// ============================================================================
// Configuration
// ============================================================================

/// Ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Quran corpus JSON path.
    pub corpus_path: PathBuf,
    /// Vector store path (deleted and rebuilt).
    pub store_path: PathBuf,
    /// Verses per chunk.
    pub chunk_size: usize,
    /// Courtesy delay between successful embed+write steps.
    pub request_delay: Duration,
    /// Longer delay after a failed chunk before moving on.
    pub error_backoff: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            corpus_path: PathBuf::from("data/quran.json"),
            store_path: crate::store::default_store_path(),
            chunk_size: 5,
            request_delay: Duration::from_millis(4000),
            error_backoff: Duration::from_millis(5000),
        }
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Chunks written and sealed into the store.
    pub chunk_count: usize,
    /// Chunks skipped after an embedding or write failure.
    pub skipped: usize,
    pub stats: StoreStats,
}

// ============================================================================
// IngestPipeline
// ============================================================================

/// Single-writer, strictly sequential corpus ingestion.
pub struct IngestPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: IngestConfig) -> Self {
        Self { embedder, config }
    }

    /// Run a full corpus rebuild.
    ///
    /// A run that ends with zero ingested chunks is an error and leaves the
    /// store unsealed; per-chunk failures only skip the failing chunk.
    pub async fn run(&self) -> Result<IngestReport> {
        // Load and chunk before touching the old store
        let corpus = QuranCorpus::load(&self.config.corpus_path)
            .with_context(|| format!("failed to load corpus {}", self.config.corpus_path.display()))?;

        tracing::info!(
            "Loaded corpus: {} chapters, {} verses",
            corpus.chapter_count(),
            corpus.verse_count()
        );

        let chunker = VerseChunker::new(ChunkConfig::new(self.config.chunk_size));
        let chunks: Vec<VerseChunk> = chunker.chunk(&corpus).collect();

        if chunks.is_empty() {
            bail!("corpus produced no chunks");
        }
        tracing::info!("Prepared {} chunks (size {})", chunks.len(), self.config.chunk_size);

        // Full rebuild: delete the stale store, then create fresh
        if self.config.store_path.exists() {
            tracing::info!("Deleting existing store at {}", self.config.store_path.display());
            std::fs::remove_dir_all(&self.config.store_path)
                .context("failed to delete existing store")?;
        }

        let store = LanceChunkStore::create(&self.config.store_path, &self.embedder.identity())
            .await
            .context("failed to create vector store")?;

        let total = chunks.len();
        let mut ingested = 0usize;
        let mut skipped = 0usize;

        for (i, chunk) in chunks.iter().enumerate() {
            match self.ingest_chunk(&store, chunk).await {
                Ok(()) => {
                    ingested += 1;
                    if ingested % 20 == 0 {
                        tracing::info!("Processed {} chunks ({}/{})", ingested, i + 1, total);
                    }
                    tokio::time::sleep(self.config.request_delay).await;
                }
                Err(e) => {
                    tracing::warn!("Failed chunk \"{}\": {:#}", chunk.title, e);
                    skipped += 1;
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        if ingested == 0 {
            bail!("ingestion wrote no chunks ({} attempted, all failed)", total);
        }

        tracing::info!("Sealing store...");
        let stats = store.seal().await.context("failed to seal store")?;

        tracing::info!(
            "Ingestion complete: {} chunks, {} skipped, {} bytes at {}",
            stats.chunk_count,
            skipped,
            stats.size_bytes,
            self.config.store_path.display()
        );

        Ok(IngestReport {
            chunk_count: stats.chunk_count,
            skipped,
            stats,
        })
    }

    /// Embed one chunk and append it to the store.
    async fn ingest_chunk(&self, store: &LanceChunkStore, chunk: &VerseChunk) -> Result<()> {
        let embedding = self
            .embedder
            .embed(&chunk.text)
            .await
            .context("embedding failed")?;

        store
            .put(&StoredChunk {
                title: chunk.title.clone(),
                text: chunk.text.clone(),
                labels: chunk.labels.clone(),
                embedding,
            })
            .await
            .context("store write failed")?;

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingIdentity};
    use async_trait::async_trait;
    use tempfile::TempDir;

    const DIM: usize = 768;

    /// Deterministic embedder; fails on chunk titles containing a marker.
    struct FakeEmbedder {
        fail_marker: Option<&'static str>,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if let Some(marker) = self.fail_marker {
                if text.contains(marker) {
                    return Err(EmbeddingError::Api {
                        status: "UNAVAILABLE".to_string(),
                        message: "simulated failure".to_string(),
                    });
                }
            }
            let fill = (text.len() % 97) as f32 / 97.0;
            Ok(vec![fill; DIM])
        }

        fn identity(&self) -> EmbeddingIdentity {
            EmbeddingIdentity {
                provider: "fake".to_string(),
                model: "fake-embed".to_string(),
                dimension: DIM,
            }
        }
    }

    fn write_corpus(dir: &TempDir, verse_count: u32) -> PathBuf {
        let verses: Vec<String> = (1..=verse_count)
            .map(|v| {
                format!(
                    r#"{{"id": {v}, "sura": 2, "aya": {v}, "arabic_text": "ar{v}", "translation": "so{v}"}}"#
                )
            })
            .collect();
        let json = format!(r#"{{"2": {{"result": [{}]}}}}"#, verses.join(","));

        let path = dir.path().join("quran.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    fn test_config(dir: &TempDir, corpus_path: PathBuf) -> IngestConfig {
        IngestConfig {
            corpus_path,
            store_path: dir.path().join("store.lance"),
            chunk_size: 5,
            request_delay: Duration::ZERO,
            error_backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_ten_verses_ingest_as_two_chunks() {
        let dir = TempDir::new().unwrap();
        let corpus_path = write_corpus(&dir, 10);
        let config = test_config(&dir, corpus_path);
        let store_path = config.store_path.clone();

        let pipeline = IngestPipeline::new(Arc::new(FakeEmbedder { fail_marker: None }), config);
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.chunk_count, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.stats.chunk_count, 2);

        let reader = crate::store::LanceChunkStore::open_read_only(&store_path)
            .await
            .unwrap();
        assert_eq!(reader.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_chunk_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let corpus_path = write_corpus(&dir, 15);
        let config = test_config(&dir, corpus_path);

        // Chunk 2 covers verses 6-10; its text contains "[Surah 2:6]"
        let pipeline = IngestPipeline::new(
            Arc::new(FakeEmbedder {
                fail_marker: Some("[Surah 2:6]"),
            }),
            config,
        );
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.chunk_count, 2);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_missing_corpus_fails_before_store_deletion() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, dir.path().join("absent.json"));
        config.store_path = dir.path().join("existing.lance");

        // Pre-existing store must survive a corpus failure
        std::fs::create_dir_all(&config.store_path).unwrap();
        std::fs::write(config.store_path.join("marker"), b"keep").unwrap();

        let pipeline = IngestPipeline::new(Arc::new(FakeEmbedder { fail_marker: None }), config.clone());
        assert!(pipeline.run().await.is_err());
        assert!(config.store_path.join("marker").exists());
    }

    #[tokio::test]
    async fn test_all_chunks_failing_is_an_error() {
        let dir = TempDir::new().unwrap();
        let corpus_path = write_corpus(&dir, 5);
        let config = test_config(&dir, corpus_path);
        let store_path = config.store_path.clone();

        let pipeline = IngestPipeline::new(
            Arc::new(FakeEmbedder {
                fail_marker: Some("[Surah"),
            }),
            config,
        );
        assert!(pipeline.run().await.is_err());

        // The store stays unsealed and unreadable for queries
        let result = crate::store::LanceChunkStore::open_read_only(&store_path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_store() {
        let dir = TempDir::new().unwrap();
        let corpus_path = write_corpus(&dir, 10);
        let config = test_config(&dir, corpus_path.clone());

        let pipeline = IngestPipeline::new(Arc::new(FakeEmbedder { fail_marker: None }), config.clone());
        pipeline.run().await.unwrap();

        // Second run over the same path succeeds (stale store deleted first)
        let pipeline = IngestPipeline::new(Arc::new(FakeEmbedder { fail_marker: None }), config);
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.chunk_count, 2);
    }
}
