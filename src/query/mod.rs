//! Query module - grounded question answering
//!
//! One request: embed the question, retrieve the nearest chunks, assemble a
//! bounded context, and generate an answer that is restricted to that
//! context, walking the model fallback list on quota errors. When the
//! context does not support an answer the model emits a fixed Somali refusal
//! sentence; when no store has been ingested yet the service degrades to a
//! friendly not-ready reply instead of an error.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::corpus::CHUNK_SEPARATOR;
use crate::embedding::{get_api_key, EmbeddingProvider, GeminiEmbedding};
use crate::generation::{
    generate_with_fallback, GeminiGenerator, GenerationError, TextGenerator, MODEL_FALLBACK,
};
use crate::store::{LanceChunkStore, SearchHit, StoreError};

// ============================================================================
// User-Facing Messages (Somali)
// ============================================================================

/// Refusal sentence the model must emit verbatim when the retrieved context
/// does not support an answer.
pub const REFUSAL_MESSAGE: &str =
    "Ma helin tafsiir cad oo ku saabsan su’aashan. Sidaas darteed kama jawaabi karo anigoo aan hubin.";

/// Reply when no vector store has been ingested yet.
pub const NOT_READY_MESSAGE: &str =
    "Nidaamku wali ma diyaarsana (vector store missing). Fadlan maamulaha la xiriir.";

/// Reply when every fallback model is out of quota.
pub const QUOTA_MESSAGE: &str =
    "Xadka API (quota) waa la qaaday. Fadlan ku dayo dabayaaqad (sida daqiiqado yar) ama fiiri billing/plan-ka Google AI.";

// ============================================================================
// Errors
// ============================================================================

/// Query-time failures, mapped to HTTP statuses by the server layer.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message is required")]
    EmptyMessage,

    #[error("embedding API key not configured")]
    MissingApiKey,

    #[error("generation quota exhausted across all fallback models")]
    RateLimited,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

// ============================================================================
// Types
// ============================================================================

/// Source reference returned with an answer.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SourceRef {
    pub title: String,
    pub score: f32,
}

/// One answered request.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    /// `None` for the not-ready reply; otherwise the hits the answer used.
    pub sources: Option<Vec<SourceRef>>,
}

/// Query service settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub store_path: PathBuf,
    /// Nearest chunks retrieved per question.
    pub top_k: usize,
    /// Per-hit snippet cap (characters) when assembling the context.
    pub snippet_chars: usize,
    /// Ordered generation model fallback list.
    pub models: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            store_path: crate::store::default_store_path(),
            top_k: 5,
            snippet_chars: 2000,
            models: MODEL_FALLBACK.iter().map(|m| m.to_string()).collect(),
        }
    }
}

// ============================================================================
// ChatService
// ============================================================================

/// Long-lived query service: owns the embedding and generation clients and
/// opens the store read-only per request. Construct once per process.
pub struct ChatService {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn TextGenerator>,
    config: ChatConfig,
}

impl ChatService {
    /// Build the service with Gemini clients from the environment.
    ///
    /// Fails fast with [`ChatError::MissingApiKey`] so a misconfigured server
    /// never starts accepting requests it cannot answer.
    pub fn from_env(config: ChatConfig) -> Result<Self, ChatError> {
        let api_key = get_api_key().map_err(|_| ChatError::MissingApiKey)?;

        let embedder = GeminiEmbedding::new(api_key.clone())
            .map_err(|e| ChatError::Internal(anyhow::Error::new(e)))?;
        let generator = GeminiGenerator::new(api_key)
            .map_err(|e| ChatError::Internal(anyhow::Error::new(e)))?;

        Ok(Self::with_clients(
            Arc::new(embedder),
            Arc::new(generator),
            config,
        ))
    }

    /// Build the service over explicit clients.
    pub fn with_clients(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn TextGenerator>,
        config: ChatConfig,
    ) -> Self {
        Self {
            embedder,
            generator,
            config,
        }
    }

    /// Answer one question using only retrieved context.
    pub async fn answer(&self, message: &str) -> Result<ChatReply, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        tracing::debug!("Answering: {}", message);

        // An unseeded system degrades to a friendly message, not an error
        let store = match LanceChunkStore::open_read_only(&self.config.store_path).await {
            Ok(store) => store,
            Err(StoreError::NotFound(path)) | Err(StoreError::NotSealed(path)) => {
                tracing::warn!("Vector store not ready at {}", path.display());
                return Ok(ChatReply {
                    text: NOT_READY_MESSAGE.to_string(),
                    sources: None,
                });
            }
            Err(e) => {
                return Err(ChatError::Internal(
                    anyhow::Error::new(e).context("failed to open vector store"),
                ))
            }
        };

        // Mixed identities silently degrade retrieval; warn loudly
        let store_identity = store.identity();
        let query_identity = self.embedder.identity();
        if store_identity != &query_identity {
            tracing::warn!(
                "Embedding identity mismatch: store {} vs query {}; retrieval quality will degrade",
                store_identity,
                query_identity
            );
        }

        let query_embedding = self
            .embedder
            .embed(message)
            .await
            .map_err(|e| anyhow::Error::new(e).context("question embedding failed"))?;

        let hits = store
            .search(&query_embedding, self.config.top_k)
            .await
            .map_err(|e| anyhow::Error::new(e).context("vector search failed"))?;

        tracing::debug!("Retrieved {} chunks", hits.len());

        // Zero hits still go through generation; the prompt contract handles
        // the refusal
        let context = assemble_context(&hits, self.config.snippet_chars);
        let prompt = build_prompt(&context, message);

        let models: Vec<&str> = self.config.models.iter().map(|m| m.as_str()).collect();
        let raw = match generate_with_fallback(self.generator.as_ref(), &models, &prompt).await {
            Ok(text) => text,
            Err(GenerationError::RateLimited { model }) => {
                tracing::warn!("All fallback models exhausted (last: {})", model);
                return Err(ChatError::RateLimited);
            }
            Err(e) => {
                return Err(ChatError::Internal(
                    anyhow::Error::new(e).context("answer generation failed"),
                ))
            }
        };

        let sources = hits
            .iter()
            .map(|hit| SourceRef {
                title: hit.title.clone(),
                score: hit.score,
            })
            .collect();

        Ok(ChatReply {
            text: normalize_answer(&raw),
            sources: Some(sources),
        })
    }
}

// ============================================================================
// Context Assembly
// ============================================================================

/// Concatenate hit texts into the context string, each capped to
/// `snippet_chars` characters.
fn assemble_context(hits: &[SearchHit], snippet_chars: usize) -> String {
    hits.iter()
        .map(|hit| truncate_chars(&hit.text, snippet_chars))
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// Prompt
// ============================================================================

/// Build the generation prompt: topic restriction, grounding contract with
/// the literal refusal sentence, formatting rules, context, question.
fn build_prompt(context: &str, question: &str) -> String {
    format!(
        r#"INSTRUCTIONS:
You are a Somali Quran Tafsir and Translation assistant.
You ONLY answer questions about the Quran: its verses (aayaad), tafsir (interpretation), translation (tarjumaad), and Surah context.
Do NOT answer questions about general Islamic topics, fiqh, siirada nabiga, or anything outside the Quran.
Answer the question strictly based on the provided Context below.
If the answer is not in the context, say: "{refusal}"
Do not invent information not present in the context.
Language: Af-Soomaali.

FORMATTING RULES:
Always separate the Arabic text and the Somali tafsiir into distinct blocks for maximum clarity. Match the clean reference style.

When displaying Quranic verses, use this EXACT format:

### Suurad [Surah Name] • Aayad [verse number]

[Arabic Text]

---

**Tafsiir:**
[Somali Translation]

---

RULES:
1. NEVER use the word "Carabi" or labels like "Carabi:".
2. NEVER use the word "Soomaali" as a label; use "**Tafsiir:**" instead.
3. ALWAYS put the Arabic text centered and alone after the heading.
4. Use "---" (horizontal rule) to separate the Arabic block from the Tafsiir.
5. Ensure there are double newlines between everything.

Keep your explanations clear and organized. Use proper headings (###), bold text (**), and spacing for readability.

CONTEXT:
{context}

QUESTION:
{question}
"#,
        refusal = REFUSAL_MESSAGE,
        context = context,
        question = question
    )
}

// ============================================================================
// Answer Normalization
// ============================================================================

/// Label-rewrite rules applied to every generated answer. Deterministic text
/// transform, not an LLM call.
fn rewrite_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            // Arabic-label leakage is removed outright
            (Regex::new(r"(?i):?\s*Carabi\s*:?").unwrap(), ""),
            // Somali labels become the canonical Tafsiir marker
            (Regex::new(r"(?i)\*\*Soomaali\*\s*:?").unwrap(), "**Tafsiir:**"),
            (Regex::new(r"(?i)Soomaali\s*:?\s*").unwrap(), "Tafsiir: "),
            // Whitespace runs collapse to a single paragraph break
            (Regex::new(r"\s{2,}").unwrap(), "\n\n"),
        ]
    })
}

/// Clean a raw generated answer: strip disallowed source-language labels and
/// normalize blank lines.
pub fn normalize_answer(raw: &str) -> String {
    let mut text = raw.to_string();
    for (pattern, replacement) in rewrite_rules() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    text.trim().to_string()
}

// ============================================================================
// Tests
// ============================================================================
