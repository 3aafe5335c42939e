//! tafsiir-rag - Somali Quran tafsiir RAG pipeline
//!
//! Ingests the Quran verse corpus into a LanceDB vector store and answers
//! questions grounded strictly in the retrieved verses:
//!
//! - Corpus: chapter-keyed verse JSON, chunked per chapter
//! - Embedding: Gemini `gemini-embedding-001`
//! - Store: LanceDB + sealed manifest (stats, embedding identity)
//! - Query: embed -> k-NN search -> grounded generation with model fallback

pub mod cli;
pub mod corpus;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod query;
pub mod server;
pub mod store;

// Re-exports
pub use corpus::{ChunkConfig, CorpusError, QuranCorpus, VerseChunk, VerseChunker, VerseRecord};
pub use embedding::{
    create_embedder, get_api_key, has_api_key, EmbeddingError, EmbeddingIdentity,
    EmbeddingProvider, GeminiEmbedding,
};
pub use generation::{
    generate_with_fallback, GeminiGenerator, GenerationError, TextGenerator, MODEL_FALLBACK,
};
pub use ingest::{IngestConfig, IngestPipeline, IngestReport};
pub use query::{
    normalize_answer, ChatConfig, ChatError, ChatReply, ChatService, SourceRef,
    NOT_READY_MESSAGE, QUOTA_MESSAGE, REFUSAL_MESSAGE,
};
pub use store::{
    default_store_path, get_data_dir, LanceChunkStore, SearchHit, StoreError, StoreManifest,
    StoreStats, StoredChunk,
};
