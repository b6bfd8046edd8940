//! Error types for the retrieval engine.

use thiserror::Error;

use docchat_documents::{ChunkerError, ExtractError};
use docchat_embeddings::{EmbeddingError, IndexError};

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the retrieval engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Invalid settings; fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The session does not exist or was deleted.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session exists but has no indexed document.
    #[error("no document loaded for session {0}; upload a document first")]
    DocumentNotLoaded(String),

    /// Another ingest for the same session is still running.
    #[error("session {0} is already processing a document")]
    SessionBusy(String),

    /// The uploaded document has no extractable text.
    #[error("document {0} contains no text")]
    EmptyDocument(String),

    /// The identifier is not a session id this service could have issued.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// Embedding backend error.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Generation backend error.
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Vector index error; the session must be re-ingested.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Prompt template error.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Text extraction error.
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChunkerError> for RetrievalError {
    fn from(err: ChunkerError) -> Self {
        RetrievalError::Configuration(err.to_string())
    }
}

/// Errors from the text generation backend.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Provider not configured.
    #[error("generation provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors in prompt templates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The template names a variable nothing can supply.
    #[error("unknown template variable {{{0}}}")]
    UnknownVariable(String),

    /// A `{` or `}` is not part of a placeholder or an escape.
    #[error("unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),

    /// No template is registered under this name.
    #[error("no prompt template named {0:?}")]
    UnknownTemplate(String),
}
