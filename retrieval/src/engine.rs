//! Retrieval engine: answers questions about a session's document.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use docchat_documents::DocumentChunk;
use docchat_embeddings::{Embedder, SearchHit};

use crate::config::{EmbeddingProviderType, RetrievalConfig};
use crate::error::{Result, RetrievalError};
use crate::generation::GenerationProvider;
use crate::prompt::PromptLibrary;
use crate::session::{
    Document, IngestReport, SessionEngine, SessionId, SessionInfo, SessionStore,
};

/// Returned when the generation backend produces no text for a question.
pub const FALLBACK_ANSWER: &str =
    "I apologize, but I couldn't generate a response. Please try rephrasing your question.";

/// Summary reported for a session without an indexed document.
pub const NO_DOCUMENT_SUMMARY: &str = "No document loaded";

const EMPTY_SUMMARY: &str = "Unable to generate summary";

/// Document question answering over isolated sessions.
///
/// Owns the session store, the generation backend and the prompt templates.
/// All methods take caller-supplied session ids and validate them first.
pub struct RetrievalEngine {
    config: RetrievalConfig,
    store: SessionStore,
    generator: Arc<dyn GenerationProvider>,
    prompts: PromptLibrary,
}

/// Which backends have credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub embedding: bool,
    pub generation: bool,
}

impl RetrievalEngine {
    /// Create a new retrieval engine builder.
    pub fn builder() -> RetrievalEngineBuilder {
        RetrievalEngineBuilder::new()
    }

    /// Initialize the engine with the backends named in `config`.
    pub async fn new(config: RetrievalConfig) -> Result<Self> {
        Self::builder().with_config(config).build().await
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn prompts(&self) -> &PromptLibrary {
        &self.prompts
    }

    /// Whether the embedding and generation backends are configured.
    pub fn backends(&self) -> BackendStatus {
        BackendStatus {
            embedding: self.store.embedder().is_available(),
            generation: self.generator.is_available(),
        }
    }

    /// Create a new, empty session.
    pub async fn create_session(&self) -> Result<SessionId> {
        self.store.create().await
    }

    /// Every stored session.
    pub async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        self.store.list().await
    }

    /// Index a document into a session, replacing any previous document.
    pub async fn ingest(&self, session_id: &str, document: Document) -> Result<IngestReport> {
        let id = SessionId::parse(session_id)?;
        self.store.ingest(&id, document).await
    }

    /// Delete a session. Deleting an unknown session succeeds.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let id = SessionId::parse(session_id)?;
        self.store.delete(&id).await
    }

    /// Session status, with a document summary once the session is ready.
    ///
    /// Does not load the session into the registry.
    pub async fn describe(&self, session_id: &str) -> Result<SessionInfo> {
        let id = SessionId::parse(session_id)?;
        let (mut info, engine) = self.store.inspect(&id).await?;
        if let Some(engine) = engine {
            info.document_summary = Some(self.summarize_engine(&engine).await);
        }
        Ok(info)
    }

    /// The chunks of a session's document most relevant to `question`.
    pub async fn retrieve(&self, session_id: &str, question: &str) -> Result<Vec<RetrievedChunk>> {
        let id = SessionId::parse(session_id)?;
        let engine = self
            .store
            .get_engine(&id)
            .await?
            .ok_or_else(|| RetrievalError::DocumentNotLoaded(id.to_string()))?;

        let query = self.store.embedder().embed_query(question).await?;
        let hits = engine.search(&query, self.config.query.top_k)?;
        debug!("Retrieved {} chunks for session {id}", hits.len());
        Ok(hits.into_iter().map(RetrievedChunk::from).collect())
    }

    /// Answer `question` from the session's document.
    ///
    /// `template` names a prompt template; `None` uses the configured default.
    pub async fn answer(
        &self,
        session_id: &str,
        question: &str,
        template: Option<&str>,
    ) -> Result<String> {
        let template = self.prompts.select(template)?;
        let chunks = self.retrieve(session_id, question).await?;
        let prompt = template.render(&build_context(&chunks), question);

        let response = self.generator.generate(&prompt).await?;
        if response.trim().is_empty() {
            warn!("Empty generation for session {session_id}; returning fallback answer");
            return Ok(FALLBACK_ANSWER.to_string());
        }
        Ok(response)
    }

    /// Summarize the beginning of the session's document.
    ///
    /// Backend failures are reported in the returned text rather than as an
    /// error, so status reporting keeps working while the backend is down.
    pub async fn summarize(&self, session_id: &str) -> Result<String> {
        let id = SessionId::parse(session_id)?;
        let engine = match self.store.get_engine(&id).await {
            Ok(Some(engine)) => engine,
            Ok(None) | Err(RetrievalError::SessionNotFound(_)) => {
                return Ok(NO_DOCUMENT_SUMMARY.to_string());
            }
            Err(e) => return Err(e),
        };
        Ok(self.summarize_engine(&engine).await)
    }

    async fn summarize_engine(&self, engine: &SessionEngine) -> String {
        let sample: String = engine
            .chunks()
            .iter()
            .take(self.config.query.summary_chunks)
            .map(|chunk| format!("{}\n\n", chunk.text))
            .collect();
        if sample.is_empty() {
            return NO_DOCUMENT_SUMMARY.to_string();
        }

        match self.generator.generate(&summary_prompt(&sample)).await {
            Ok(summary) if summary.trim().is_empty() => EMPTY_SUMMARY.to_string(),
            Ok(summary) => summary,
            Err(e) => {
                warn!(
                    "Summary generation failed for session {}: {e}",
                    engine.session_id()
                );
                format!("Error generating summary: {e}")
            }
        }
    }
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

impl From<SearchHit<'_, DocumentChunk>> for RetrievedChunk {
    fn from(hit: SearchHit<'_, DocumentChunk>) -> Self {
        Self {
            chunk: hit.chunk.clone(),
            score: hit.score,
        }
    }
}

/// Number each retrieved chunk as a section, best match first.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, retrieved)| format!("Section {}:\n{}\n", i + 1, retrieved.chunk.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summary_prompt(sample: &str) -> String {
    format!(
        "Provide a brief summary of this physiotherapy document based on the following content:\n\n{sample}\n\nSummary:"
    )
}

/// Builder for [`RetrievalEngine`].
///
/// Backends not set explicitly are constructed from the configuration.
pub struct RetrievalEngineBuilder {
    config: RetrievalConfig,
    embedder: Option<Embedder>,
    generator: Option<Arc<dyn GenerationProvider>>,
}

impl RetrievalEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RetrievalConfig::default(),
            embedder: None,
            generator: None,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the sessions directory.
    pub fn with_sessions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.sessions_dir = dir.into();
        self
    }

    /// Set the embedding provider type.
    pub fn with_embedding_provider(mut self, provider: EmbeddingProviderType) -> Self {
        self.config.embedding.provider = provider;
        self
    }

    /// Use an already constructed embedder.
    pub fn with_embedder(mut self, embedder: Embedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use an already constructed generation backend.
    pub fn with_generator(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Build the engine.
    pub async fn build(self) -> Result<RetrievalEngine> {
        let config = self.config;
        config.validate()?;

        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => config.embedding.build_embedder()?,
        };
        let generator = self
            .generator
            .unwrap_or_else(|| config.generation.build_generator());
        let prompts = PromptLibrary::from_config(&config.prompts)?;
        let splitter = config.chunking.splitter()?;

        if !embedder.is_available() {
            warn!("Embedding provider {} has no API key", embedder.model());
        }
        if !generator.is_available() {
            warn!("Generation provider {} has no API key", generator.name());
        }

        let store = SessionStore::open(&config.sessions_dir, embedder, splitter).await?;
        info!(
            "Retrieval engine ready (top_k {}, chunk size {}, overlap {})",
            config.query.top_k, config.chunking.chunk_size, config.chunking.overlap
        );

        Ok(RetrievalEngine {
            config,
            store,
            generator,
            prompts,
        })
    }
}

impl Default for RetrievalEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
