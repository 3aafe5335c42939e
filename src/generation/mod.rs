//! Generation module - grounded answer generation via the Gemini API
//!
//! Calls `models/{id}:generateContent` and walks an ordered fallback list of
//! model identifiers. Only quota (429) and model-not-found (404) errors are
//! retryable by substituting the next model; anything else aborts the request.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ordered model identifiers tried at query time.
/// ref: https://ai.google.dev/gemini-api/docs/models
pub const MODEL_FALLBACK: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-2.5-flash",
    "gemini-pro",
];

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// ============================================================================
// Errors
// ============================================================================

/// Generation failures.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model {model} quota exhausted (429)")]
    RateLimited { model: String },

    #[error("model {model} not found (404)")]
    ModelNotFound { model: String },

    #[error("Gemini generation API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed generation response: {0}")]
    MalformedResponse(String),

    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GenerationError {
    /// True for errors the fallback list may substitute another model for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. } | GenerationError::ModelNotFound { .. }
        )
    }
}

// ============================================================================
// TextGenerator Trait
// ============================================================================

/// Interface for generating text from a prompt with a named model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationError>;
}

// ============================================================================
// Model Fallback
// ============================================================================

/// Try `models` in order until one succeeds.
///
/// A retryable error (429/404) on a non-final model logs a warning and moves
/// to the next identifier; a retryable error on the final model, or any
/// non-retryable error, is returned as-is.
pub async fn generate_with_fallback(
    generator: &dyn TextGenerator,
    models: &[&str],
    prompt: &str,
) -> Result<String, GenerationError> {
    let mut last_error = None;

    for (i, model) in models.iter().enumerate() {
        match generator.generate(model, prompt).await {
            Ok(text) => {
                tracing::debug!("Generation succeeded with model {}", model);
                return Ok(text);
            }
            Err(e) if e.is_retryable() && i + 1 < models.len() => {
                tracing::warn!("Model {} unavailable ({}), trying {}", model, e, models[i + 1]);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error
        .unwrap_or_else(|| GenerationError::MalformedResponse("empty model list".to_string())))
}

// ============================================================================
// Google Gemini Generator
// ============================================================================

/// Gemini generateContent client.
#[derive(Debug)]
pub struct GeminiGenerator {
    api_key: String,
    client: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(api_key: String) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { api_key, client })
    }

    /// Create from environment variables (GOOGLE_API_KEY, then GEMINI_API_KEY).
    pub fn from_env() -> Result<Self, GenerationError> {
        let api_key = crate::embedding::get_api_key().map_err(|_| GenerationError::Api {
            status: 401,
            message: "API key not configured".to_string(),
        })?;
        Self::new(api_key)
    }
}

/// generateContent request body.
/// ref: https://ai.google.dev/api/generate-content
#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Gemini API error envelope.
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, model);

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                429 => GenerationError::RateLimited {
                    model: model.to_string(),
                },
                404 => GenerationError::ModelNotFound {
                    model: model.to_string(),
                },
                code => {
                    let message = serde_json::from_str::<GeminiError>(&body)
                        .map(|e| e.error.message)
                        .unwrap_or(body);
                    GenerationError::Api {
                        status: code,
                        message,
                    }
                }
            });
        }

        let generate_response: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        let text: String = generate_response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GenerationError::MalformedResponse(
                "response contains no candidate text".to_string(),
            ));
        }

        Ok(text)
    }
}

// ============================================================================
// Tests
// ============================================================================
