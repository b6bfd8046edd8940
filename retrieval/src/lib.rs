//! # Retrieval Engine
//!
//! Session-scoped question answering over a single uploaded document:
//!
//! - **Sessions**: isolated directories holding one document and its index
//! - **Ingest**: extract, chunk, embed and persist a document atomically
//! - **Answering**: retrieve the closest chunks and prompt a generative model
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Retrieval Engine                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   Session    │  │    Prompt    │  │  Generation  │           │
//! │  │    Store     │  │   Library    │  │   Provider   │           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! │         │                 │                  │                  │
//! │         ▼                 └────────┬─────────┘                  │
//! │  ┌──────────────┐                  ▼                            │
//! │  │ TextSplitter │          ┌──────────────┐                     │
//! │  │   Embedder   │          │    answer    │                     │
//! │  │ VectorIndex  │          │  summarize   │                     │
//! │  └──────────────┘          └──────────────┘                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docchat_retrieval::{Document, RetrievalEngine};
//!
//! let engine = RetrievalEngine::builder()
//!     .with_sessions_dir("backend/sessions")
//!     .build()
//!     .await?;
//!
//! let id = engine.create_session().await?;
//! engine.ingest(id.as_str(), Document::new("plan.pdf", bytes)?).await?;
//! let answer = engine.answer(id.as_str(), "How often should I ice?", None).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod prompt;
pub mod session;

pub use config::{
    ChunkingConfig, EmbeddingConfig, EmbeddingProviderType, GenerationConfig, PromptConfig,
    QueryConfig, RetrievalConfig,
};
pub use engine::{
    BackendStatus, FALLBACK_ANSWER, NO_DOCUMENT_SUMMARY, RetrievalEngine, RetrievalEngineBuilder,
    RetrievedChunk, build_context,
};
pub use error::{GenerationError, Result, RetrievalError, TemplateError};
pub use generation::{GeminiGenerator, GenerationProvider, SamplingParams};
pub use prompt::{PromptLibrary, PromptTemplate, assemble};
pub use session::{
    Document, DocumentRecord, IngestReport, SessionEngine, SessionId, SessionInfo,
    SessionRegistry, SessionState, SessionStore,
};

// Re-export from dependencies for convenience
pub use docchat_documents::{DocumentChunk, DocumentKind, TextSplitter};
pub use docchat_embeddings::{Embedder, EmbeddingProvider, HashingProvider};
