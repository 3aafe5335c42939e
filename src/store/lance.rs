//! LanceDB chunk store - durable vectors with ANN search
//!
//! One store is a LanceDB directory holding a single `chunks` table plus the
//! JSON manifest. Rows carry a monotonically increasing `seq` column so that
//! equal-similarity hits keep their insertion order.
//!
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use chrono::Utc;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::embedding::EmbeddingIdentity;

use super::manifest::StoreManifest;
use super::{dir_size_bytes, SearchHit, StoreError, StoreStats, StoredChunk};

/// Chunk table name.
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceChunkStore
// ============================================================================

/// File-backed chunk store over LanceDB.
pub struct LanceChunkStore {
    db: Connection,
    path: PathBuf,
    manifest: StoreManifest,
    read_only: bool,
    next_seq: AtomicI64,
}

impl LanceChunkStore {
    /// Initialize a new, empty store at `path`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the path is occupied;
    /// deleting a stale store is the caller's responsibility.
    pub async fn create(
        path: &Path,
        identity: &EmbeddingIdentity,
    ) -> Result<Self, StoreError> {
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("failed to create store parent directory")?;
            }
        }
        std::fs::create_dir_all(path).context("failed to create store directory")?;

        let db = connect(path).await?;

        let manifest = StoreManifest::new(identity.clone());
        manifest.save(path)?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            manifest,
            read_only: false,
            next_seq: AtomicI64::new(0),
        })
    }

    /// Open an existing sealed store for searching.
    ///
    /// Fails with [`StoreError::NotFound`] when nothing was ingested at
    /// `path`, and [`StoreError::NotSealed`] when an ingestion run is
    /// incomplete. Callers should treat both as "not yet ready".
    pub async fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let manifest = match StoreManifest::load(path)? {
            Some(m) if m.sealed => m,
            _ => return Err(StoreError::NotSealed(path.to_path_buf())),
        };

        let db = connect(path).await?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            next_seq: AtomicI64::new(manifest.chunk_count as i64),
            manifest,
            read_only: true,
        })
    }

    /// Store path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Embedding identity recorded at creation.
    pub fn identity(&self) -> &EmbeddingIdentity {
        &self.manifest.embedding_identity
    }

    /// Append one chunk. Single-writer, strictly sequential.
    pub async fn put(&self, chunk: &StoredChunk) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }

        let expected = self.manifest.embedding_identity.dimension;
        if chunk.embedding.len() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: chunk.embedding.len(),
            });
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let batch = chunk_to_batch(chunk, seq, expected as i32)?;
        let schema = batch.schema();

        if self.table_exists().await {
            let table = self
                .db
                .open_table(TABLE_NAME)
                .execute()
                .await
                .context("failed to open chunk table")?;

            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            table
                .add(batches)
                .execute()
                .await
                .context("failed to append chunk")?;
        } else {
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("failed to create chunk table")?;
        }

        Ok(())
    }

    /// Finalize the store for reads: count rows, measure on-disk size, and
    /// mark the manifest sealed. Consumes the handle; a sealed store is only
    /// reachable through [`Self::open_read_only`] afterwards.
    pub async fn seal(mut self) -> Result<StoreStats, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }

        let chunk_count = self.count().await?;

        self.manifest.sealed = true;
        self.manifest.chunk_count = chunk_count;
        self.manifest.sealed_at = Some(Utc::now());
        // Size without the manifest's own final bytes; close enough for stats
        self.manifest.size_bytes = dir_size_bytes(&self.path);
        self.manifest.save(&self.path)?;

        Ok(StoreStats {
            chunk_count,
            size_bytes: self.manifest.size_bytes,
        })
    }

    /// k-nearest chunks by vector similarity, highest score first, ties
    /// broken by insertion order.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if !self.table_exists().await {
            // A sealed store without a table can only be legitimately empty
            if self.manifest.chunk_count == 0 {
                return Ok(vec![]);
            }
            return Err(StoreError::Other(anyhow!(
                "chunk table missing from store at {}",
                self.path.display()
            )));
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("failed to open chunk table for search")?;

        let results = table
            .vector_search(query_embedding.to_vec())
            .context("failed to build vector search")?
            .limit(k)
            .execute()
            .await
            .context("failed to execute vector search")?;

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .context("failed to collect search results")?;

        let mut hits: Vec<(i64, SearchHit)> = Vec::new();

        for batch in batches {
            let seqs = batch
                .column_by_name("seq")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow!("missing seq column"))?;

            let titles = batch
                .column_by_name("title")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow!("missing title column"))?;

            let texts = batch
                .column_by_name("text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow!("missing text column"))?;

            // _distance is added by LanceDB
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow!("missing _distance column"))?;

            for i in 0..batch.num_rows() {
                // L2 distance -> bounded similarity score
                let score = 1.0 / (1.0 + distances.value(i));

                hits.push((
                    seqs.value(i),
                    SearchHit {
                        title: titles.value(i).to_string(),
                        text: texts.value(i).to_string(),
                        score,
                    },
                ));
            }
        }

        hits.sort_by(|(seq_a, a), (seq_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(seq_a.cmp(seq_b))
        });
        hits.truncate(k);

        Ok(hits.into_iter().map(|(_, hit)| hit).collect())
    }

    /// Number of stored chunks.
    pub async fn count(&self) -> Result<usize, StoreError> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("failed to open chunk table for count")?;

        let count = table
            .count_rows(None)
            .await
            .context("failed to count chunks")?;
        Ok(count)
    }

    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }
}

// ============================================================================
// Arrow Conversion
// ============================================================================

fn chunk_schema(dimension: i32) -> Schema {
    Schema::new(vec![
        Field::new("seq", DataType::Int64, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("labels", DataType::Utf8, false),
        Field::new(
            "embedding",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension,
            ),
            false,
        ),
    ])
}

fn chunk_to_batch(chunk: &StoredChunk, seq: i64, dimension: i32) -> Result<RecordBatch, StoreError> {
    let labels_json =
        serde_json::to_string(&chunk.labels).context("failed to encode chunk labels")?;

    let values = Float32Array::from(chunk.embedding.clone());
    let field = Arc::new(Field::new("item", DataType::Float32, true));
    let embedding_list = FixedSizeListArray::try_new(
        field,
        dimension,
        Arc::new(values) as Arc<dyn Array>,
        None,
    )
    .context("failed to build embedding array")?;

    let batch = RecordBatch::try_new(
        Arc::new(chunk_schema(dimension)),
        vec![
            Arc::new(Int64Array::from(vec![seq])),
            Arc::new(StringArray::from(vec![chunk.title.as_str()])),
            Arc::new(StringArray::from(vec![chunk.text.as_str()])),
            Arc::new(StringArray::from(vec![labels_json.as_str()])),
            Arc::new(embedding_list),
        ],
    )
    .context("failed to build chunk batch")?;

    Ok(batch)
}

async fn connect(path: &Path) -> Result<Connection, StoreError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("invalid store path encoding"))?;

    let db = lancedb::connect(path_str)
        .execute()
        .await
        .context("failed to connect to LanceDB")?;

    Ok(db)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 768;

    fn identity() -> EmbeddingIdentity {
        EmbeddingIdentity {
            provider: "gemini".to_string(),
            model: "gemini-embedding-001".to_string(),
            dimension: DIM,
        }
    }

    fn chunk(title: &str, fill: f32) -> StoredChunk {
        StoredChunk {
            title: title.to_string(),
            text: format!("text for {}", title),
            labels: vec!["quran".to_string()],
            embedding: vec![fill; DIM],
        }
    }

    #[tokio::test]
    async fn test_create_put_seal_open_search() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lance");

        let store = LanceChunkStore::create(&path, &identity()).await.unwrap();
        store.put(&chunk("Surah 1, Verses 1-5 (Somali)", 0.1)).await.unwrap();
        store.put(&chunk("Surah 1, Verses 6-7 (Somali)", 0.9)).await.unwrap();

        let stats = store.seal().await.unwrap();
        assert_eq!(stats.chunk_count, 2);
        assert!(stats.size_bytes > 0);

        let reader = LanceChunkStore::open_read_only(&path).await.unwrap();
        assert_eq!(reader.count().await.unwrap(), 2);
        assert_eq!(reader.identity(), &identity());

        let hits = reader.search(&vec![0.1; DIM], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Surah 1, Verses 1-5 (Somali)");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_create_fails_on_existing_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("existing.lance");
        std::fs::create_dir_all(&path).unwrap();

        let result = LanceChunkStore::create(&path, &identity()).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_open_missing_store_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.lance");

        let result = LanceChunkStore::open_read_only(&path).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_open_unsealed_store_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unsealed.lance");

        let store = LanceChunkStore::create(&path, &identity()).await.unwrap();
        store.put(&chunk("c", 0.5)).await.unwrap();
        drop(store);

        let result = LanceChunkStore::open_read_only(&path).await;
        assert!(matches!(result, Err(StoreError::NotSealed(_))));
    }

    #[tokio::test]
    async fn test_put_rejects_wrong_dimension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dims.lance");

        let store = LanceChunkStore::create(&path, &identity()).await.unwrap();
        let bad = StoredChunk {
            embedding: vec![0.1; 16],
            ..chunk("bad", 0.0)
        };

        let result = store.put(&bad).await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch {
                expected: DIM,
                actual: 16
            })
        ));
    }

    #[tokio::test]
    async fn test_put_rejected_on_read_only_handle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.lance");

        let store = LanceChunkStore::create(&path, &identity()).await.unwrap();
        store.put(&chunk("c", 0.5)).await.unwrap();
        store.seal().await.unwrap();

        let reader = LanceChunkStore::open_read_only(&path).await.unwrap();
        let result = reader.put(&chunk("d", 0.5)).await;
        assert!(matches!(result, Err(StoreError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_search_scores_descending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("order.lance");

        let store = LanceChunkStore::create(&path, &identity()).await.unwrap();
        for (i, fill) in [0.2, 0.8, 0.4].iter().enumerate() {
            store.put(&chunk(&format!("chunk-{}", i), *fill)).await.unwrap();
        }
        store.seal().await.unwrap();

        let reader = LanceChunkStore::open_read_only(&path).await.unwrap();
        let hits = reader.search(&vec![0.5; DIM], 3).await.unwrap();

        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_empty_sealed_store_searches_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.lance");

        let store = LanceChunkStore::create(&path, &identity()).await.unwrap();
        store.seal().await.unwrap();

        let reader = LanceChunkStore::open_read_only(&path).await.unwrap();
        let hits = reader.search(&vec![0.5; DIM], 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
