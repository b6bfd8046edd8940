//! Error types for the embeddings system.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors raised by an embedding backend or by the adapter that checks its
/// output.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider not configured.
    #[error("embedding provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The backend returned a different number of vectors than texts sent.
    #[error("vector count mismatch: sent {expected} texts, got {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised while building, searching or persisting a vector index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Chunks and vectors were not paired one to one.
    #[error("index needs one vector per chunk: {chunks} chunks, {vectors} vectors")]
    LengthMismatch { chunks: usize, vectors: usize },

    /// A vector (or query) did not match the index dimension.
    #[error("dimension mismatch: index is {expected}-dimensional, got {actual}")]
    Dimension { expected: usize, actual: usize },

    /// A vector contained NaN or infinite values.
    #[error("vector {position} contains non-finite values")]
    InvalidVector { position: usize },

    /// The persisted index cannot be trusted; the document must be re-ingested.
    #[error("index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
