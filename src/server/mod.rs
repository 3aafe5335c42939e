//! Server module - chat HTTP API
//!
//! Single chat endpoint over axum:
//! - `POST /api/chat` `{"message": "..."}` -> `{"text": "...", "sources": [...]}`
//! - `GET /healthz`
//!
//! Error contract: 400 for a missing message, 429 with a localized quota
//! message when every fallback model is exhausted, 500 with a generic body
//! otherwise. Provider errors never reach clients; full detail stays in the
//! operator logs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::query::{ChatError, ChatReply, ChatService, SourceRef, QUOTA_MESSAGE};

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRef>>,
}

impl From<ChatReply> for ChatResponse {
    fn from(reply: ChatReply) -> Self {
        Self {
            text: reply.text,
            sources: reply.sources,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

// ============================================================================
// Router
// ============================================================================

#[derive(Clone)]
struct AppState {
    chat: Arc<ChatService>,
}

/// Build the application router.
pub fn router(chat: Arc<ChatService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/chat", post(chat_handler))
        .with_state(AppState { chat })
}

/// Bind and serve until shutdown.
pub async fn serve(bind: &str, chat: Arc<ChatService>) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {}", bind))?;

    let app = router(chat);

    tracing::info!("tafsiir-rag listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let message = request.message.unwrap_or_default();

    match state.chat.answer(&message).await {
        Ok(reply) => (StatusCode::OK, Json(ChatResponse::from(reply))).into_response(),
        Err(e) => error_response(e),
    }
}

/// Map a [`ChatError`] onto the wire contract.
fn error_response(error: ChatError) -> Response {
    match error {
        ChatError::EmptyMessage => (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "Message is required".to_string(),
            }),
        )
            .into_response(),
        ChatError::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ChatResponse {
                text: QUOTA_MESSAGE.to_string(),
                sources: None,
            }),
        )
            .into_response(),
        ChatError::MissingApiKey => {
            tracing::error!("Chat request failed: API key not configured");
            internal_error()
        }
        ChatError::Internal(e) => {
            tracing::error!("Chat request failed: {:#}", e);
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "Internal Server Error".to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_empty_message_maps_to_400() {
        let response = error_response(ChatError::EmptyMessage);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Message is required");
    }

    #[tokio::test]
    async fn test_rate_limited_maps_to_429_with_quota_text() {
        let response = error_response(ChatError::RateLimited);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = body_json(response).await;
        assert_eq!(body["text"], QUOTA_MESSAGE);
        assert!(body.get("sources").is_none());
    }

    #[tokio::test]
    async fn test_internal_errors_map_to_generic_500() {
        let response = error_response(ChatError::Internal(anyhow::anyhow!("provider detail")));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // Provider detail must not leak to clients
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal Server Error");
    }

    #[tokio::test]
    async fn test_not_ready_reply_serializes_without_sources_key() {
        let response = (
            StatusCode::OK,
            Json(ChatResponse {
                text: crate::query::NOT_READY_MESSAGE.to_string(),
                sources: None,
            }),
        )
            .into_response();

        let body = body_json(response).await;
        assert!(body.get("sources").is_none());
        assert_eq!(body["text"], crate::query::NOT_READY_MESSAGE);
    }

    #[tokio::test]
    async fn test_reply_serializes_sources() {
        let response = (
            StatusCode::OK,
            Json(ChatResponse {
                text: "jawaab".to_string(),
                sources: Some(vec![SourceRef {
                    title: "Surah 1, Verses 1-5 (Somali)".to_string(),
                    score: 0.9,
                }]),
            }),
        )
            .into_response();

        let body = body_json(response).await;
        assert_eq!(body["sources"][0]["title"], "Surah 1, Verses 1-5 (Somali)");
    }
}
