//! Embedding module - text vectorization via the Gemini API
//!
//! Maps chunk and question text to fixed-dimension vectors with
//! `gemini-embedding-001`. Every vector is stamped with an
//! [`EmbeddingIdentity`] so the store can enforce that one index never mixes
//! vectors from different providers, models, or dimensions.
//!
//! ## Usage
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env()?;
//! let vector = embedder.embed("Aayadda kowaad").await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// Errors
// ============================================================================

/// Embedding-provider failures. Recoverable per-chunk during ingestion
/// (skip-and-continue), fatal for a single query.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error(
        "embedding API key not configured; set GOOGLE_API_KEY or GEMINI_API_KEY \
         (https://aistudio.google.com/app/apikey)"
    )]
    MissingApiKey,

    #[error("invalid embedding dimension {0}: must be 768, 1536, or 3072")]
    InvalidDimension(usize),

    #[error("embedding rate limit exceeded (429) after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Gemini embedding API error ({status}): {message}")]
    Api { status: String, message: String },

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

// ============================================================================
// EmbeddingIdentity
// ============================================================================

/// Provider/model/dimension triple identifying how a vector was produced.
///
/// All vectors in one store must share a single identity; mixing identities
/// silently breaks similarity search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingIdentity {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
}

impl std::fmt::Display for EmbeddingIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({}d)", self.provider, self.model, self.dimension)
    }
}

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// Interface for mapping text to an embedding vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Identity stamped on every vector this provider produces.
    fn identity(&self) -> EmbeddingIdentity;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini embedding API endpoint (gemini-embedding-001, MRL dimensions)
/// ref: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

pub const EMBEDDING_PROVIDER: &str = "gemini";
pub const EMBEDDING_MODEL: &str = "gemini-embedding-001";

/// Default embedding dimension.
pub const DEFAULT_DIMENSION: usize = 768;

/// Rate limiter settings (Gemini free tier: 60 RPM).
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// Minimum delay between calls (1000ms keeps us under 60 RPM).
const MIN_DELAY_MS: u64 = 1000;
/// Max retries on a 429 before giving up.
const MAX_RETRIES: u32 = 3;
/// Initial retry backoff (ms), doubled per attempt.
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Gemini embedding client.
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

/// Rate limiter with a minimum delay between requests.
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay: Duration::from_millis(MIN_DELAY_MS),
            last_request: None,
        }
    }

    /// Wait until the next request is allowed.
    async fn acquire(&mut self) {
        // Minimum delay between consecutive calls (burst prevention)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();

        // Drop requests that fell out of the window
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // Wait out the window when the RPM budget is spent
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window - now.duration_since(oldest);
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

impl GeminiEmbedding {
    /// Create a client with the default dimension.
    pub fn new(api_key: String) -> Result<Self, EmbeddingError> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// Create a client with an explicit dimension (768, 1536, or 3072).
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self, EmbeddingError> {
        if ![768, 1536, 3072].contains(&dimension) {
            return Err(EmbeddingError::InvalidDimension(dimension));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
            RATE_LIMIT_RPM,
            RATE_LIMIT_WINDOW,
        )));

        Ok(Self {
            api_key,
            client,
            dimension,
            rate_limiter,
        })
    }

    /// Create from environment variables (GOOGLE_API_KEY, then GEMINI_API_KEY).
    pub fn from_env() -> Result<Self, EmbeddingError> {
        Self::new(get_api_key()?)
    }

    /// Create from environment variables with an explicit dimension.
    pub fn from_env_with_dimension(dimension: usize) -> Result<Self, EmbeddingError> {
        Self::with_dimension(get_api_key()?, dimension)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Gemini embedContent request body.
/// ref: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API error envelope.
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        // Empty text embeds to the zero vector without a network call
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: format!("models/{}", EMBEDDING_MODEL),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
            output_dimensionality: Some(self.dimension),
        };

        // Retry loop: exponential backoff on 429 and transport failures
        for attempt in 0..=MAX_RETRIES {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            // API key goes in a header, not the URL
            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Embedding request failed ({}), retrying in {:?} (attempt {}/{})",
                            e,
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(EmbeddingError::Transport(e));
                }
            };

            let status = response.status();
            let body = response.text().await?;

            if status.is_success() {
                let embed_response: EmbedResponse = serde_json::from_str(&body)
                    .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;
                let values = embed_response.embedding.values;

                if values.len() != self.dimension {
                    return Err(EmbeddingError::MalformedResponse(format!(
                        "expected {} values, got {}",
                        self.dimension,
                        values.len()
                    )));
                }
                return Ok(values);
            }

            if status.as_u16() == 429 {
                if attempt < MAX_RETRIES {
                    let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                    tracing::warn!(
                        "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                return Err(EmbeddingError::RateLimited {
                    attempts: MAX_RETRIES + 1,
                });
            }

            // Any other status fails immediately
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                return Err(EmbeddingError::Api {
                    status: error.error.status,
                    message: error.error.message,
                });
            }
            return Err(EmbeddingError::Api {
                status: status.to_string(),
                message: body,
            });
        }

        Err(EmbeddingError::RateLimited {
            attempts: MAX_RETRIES + 1,
        })
    }

    fn identity(&self) -> EmbeddingIdentity {
        EmbeddingIdentity {
            provider: EMBEDDING_PROVIDER.to_string(),
            model: EMBEDDING_MODEL.to_string(),
            dimension: self.dimension,
        }
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// True when the value is a real key rather than a template placeholder.
fn is_usable_key(key: &str) -> bool {
    !key.is_empty() && !key.contains("PLACEHOLDER") && !key.contains("YOUR_")
}

/// Load the API key from the environment.
///
/// Priority:
/// 1. `GOOGLE_API_KEY`
/// 2. `GEMINI_API_KEY`
pub fn get_api_key() -> Result<String, EmbeddingError> {
    for var in ["GOOGLE_API_KEY", "GEMINI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if is_usable_key(&key) {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    Err(EmbeddingError::MissingApiKey)
}

/// True when a usable API key is configured.
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Factory Function
// ============================================================================

/// Create the Gemini embedder from the environment, logging its identity.
pub fn create_embedder() -> Result<GeminiEmbedding, EmbeddingError> {
    create_embedder_with_dimension(DEFAULT_DIMENSION)
}

/// Create the Gemini embedder with an explicit dimension.
pub fn create_embedder_with_dimension(
    dimension: usize,
) -> Result<GeminiEmbedding, EmbeddingError> {
    let embedder = GeminiEmbedding::from_env_with_dimension(dimension)?;
    tracing::info!("Using Gemini embedding ({})", embedder.identity());
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
