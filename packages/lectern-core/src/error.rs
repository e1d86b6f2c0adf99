//! Centralized error types for the Lectern core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Maps errors to the small table of user-facing messages sent over SSE
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type for the Lectern pipeline and API.
#[derive(Debug, Error)]
pub enum LecternError {
    /// Network failure or timeout talking to an external service.
    /// Retryable at the call site with backoff.
    #[error("Network error: {0}")]
    Network(String),

    /// The fetcher reached a login wall despite injected session cookies.
    #[error("Authentication required for {0}")]
    AuthRequired(String),

    /// A media embed was detected but no downloader supports it.
    /// Degrades to text-only processing.
    #[error("Unsupported media platform: {0}")]
    ClassificationMiss(String),

    /// All transcript strategies were exhausted.
    #[error("No transcript available for {0}")]
    TranscriptUnavailable(String),

    /// The LLM returned something that could not be parsed at all.
    #[error("AI response parse failure: {0}")]
    LlmParse(String),

    /// An external service reported rate limiting.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// URL uniqueness hit by a concurrent writer. Converted by the
    /// persistence layer into an already-processed terminal event.
    #[error("Content already persisted: {0}")]
    PersistenceConflict(String),

    /// Database failure, unrecoverable at the call site.
    #[error("Database error: {0}")]
    Database(String),

    /// Object storage failure, unrecoverable at the call site.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The request context was cancelled (client disconnect).
    /// Not an error condition; produces no `error` event.
    #[error("Cancelled")]
    Cancelled,

    /// Requested article does not exist.
    #[error("Article not found: {0}")]
    ArticleNotFound(i64),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid bearer token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error that does not fit a more specific kind.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LecternError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::AuthRequired(_) => "auth_required",
            Self::ClassificationMiss(_) => "unsupported_media",
            Self::TranscriptUnavailable(_) => "transcript_unavailable",
            Self::LlmParse(_) => "ai_parse_error",
            Self::RateLimited(_) => "rate_limited",
            Self::PersistenceConflict(_) => "already_processed",
            Self::Database(_) => "database_error",
            Self::Storage(_) => "storage_error",
            Self::Cancelled => "cancelled",
            Self::ArticleNotFound(_) => "article_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ArticleNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the user-facing message published on the SSE `error`
    /// event. Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "The request timed out. Please try again.".to_string(),
            Self::AuthRequired(_) => {
                "This content requires refreshed authentication. Please update the browser session."
                    .to_string()
            }
            Self::ClassificationMiss(_) => {
                "The embedded media is not supported; the article was processed as text."
                    .to_string()
            }
            Self::LlmParse(_) => "AI service returned an unexpected response".to_string(),
            Self::RateLimited(_) => {
                "The AI service is temporarily busy. Please wait a moment and try again."
                    .to_string()
            }
            Self::Database(_) | Self::PersistenceConflict(_) => {
                "There was a database error. Please try again later.".to_string()
            }
            Self::Storage(_) => "There was a storage error. Please try again later.".to_string(),
            Self::ArticleNotFound(id) => format!("Article {} not found", id),
            other => format!("Sorry, there was an error: {}", other),
        }
    }

    /// Whether the call site may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited(_))
    }
}

/// Convenient Result alias for application-wide operations.
pub type LecternResult<T> = Result<T, LecternError>;

/// JSON response body for non-SSE error responses: `{error, message, path}`.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    path: Option<String>,
}

impl IntoResponse for LecternError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.user_message(),
            path: None,
        };
        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for LecternError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(format!("request timed out: {}", err))
        } else if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            Self::RateLimited(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<sqlx::Error> for LecternError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::PersistenceConflict(db.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<std::io::Error> for LecternError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("io error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_busy_message() {
        let err = LecternError::RateLimited("429".into());
        assert_eq!(err.code(), "rate_limited");
        assert!(err.user_message().contains("temporarily busy"));
        assert!(err.is_retryable());
    }

    #[test]
    fn llm_parse_uses_fixed_user_message() {
        let err = LecternError::LlmParse("bad json".into());
        assert_eq!(err.user_message(), "AI service returned an unexpected response");
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = LecternError::ArticleNotFound(42);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn cancelled_is_not_retryable() {
        assert!(!LecternError::Cancelled.is_retryable());
    }
}
