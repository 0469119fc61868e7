//! Error types for the storyloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all storyloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Request validation ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Embedding errors ---
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    // --- Persistence errors ---
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A chat request was rejected before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("user id is required")]
    MissingUserId,

    #[error("model is required")]
    MissingModel,

    #[error("at least one message is required")]
    NoMessages,

    #[error("latest message has no content")]
    EmptyContent,
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Network(String),

    #[error("Embedding API returned status {status_code}: {body}")]
    Status { status_code: u16, body: String },

    #[error("Failed to decode embedding response: {0}")]
    Decode(String),

    #[error("Embedding response incomplete: expected {expected} vectors, got {received}")]
    Incomplete { expected: usize, received: usize },

    #[error("No embedding returned")]
    Empty,

    #[error("Embedder not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Writing to the requesting client failed. Never fatal to a turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("client disconnected")]
    Closed,

    #[error("client write failed: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn embedding_status_error_keeps_body() {
        let err = EmbeddingError::Status {
            status_code: 401,
            body: "invalid api key".into(),
        };
        let text = Error::from(err).to_string();
        assert!(text.contains("401"));
        assert!(text.contains("invalid api key"));
    }

    #[test]
    fn not_found_names_entity() {
        let err = RepositoryError::not_found("thread", "abc");
        assert_eq!(err.to_string(), "thread not found: abc");
    }
}
