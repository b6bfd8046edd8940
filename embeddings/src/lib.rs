//! # Embeddings
//!
//! Embedding backends and the per-session vector index used by document
//! chat.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors through a
//!   pluggable backend (Gemini, OpenAI, or an offline hashing provider)
//! - **Checked Adapter**: [`Embedder`] guarantees one vector per text and a
//!   uniform dimension
//! - **Vector Index**: Cosine-similarity search over one document's chunks,
//!   persisted atomically and reloaded with a dimension check
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedder ──► VectorIndex                 │
//! │       │                                  │                      │
//! │       ▼                                  ▼                      │
//! │  Gemini/OpenAI/Hashing             save / load (JSON)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod index;
pub mod provider;
pub mod similarity;

pub use error::{EmbeddingError, IndexError, Result};
pub use index::{SearchHit, VectorIndex};
pub use provider::{Embedder, EmbeddingProvider, GeminiProvider, HashingProvider, OpenAIProvider};
pub use similarity::{cosine_similarity, normalize};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
