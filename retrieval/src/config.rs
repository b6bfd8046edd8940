//! Configuration for the document retrieval engine.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use docchat_documents::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, TextSplitter};
use docchat_embeddings::{
    Embedder, EmbeddingProvider, GeminiProvider, HashingProvider, OpenAIProvider,
};

use crate::error::{Result, RetrievalError};
use crate::generation::{GeminiGenerator, GenerationProvider, SamplingParams};
use crate::prompt::{PHYSIOTHERAPY, PromptLibrary};

/// Configuration for the document retrieval engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Directory holding one subdirectory per session.
    pub sessions_dir: PathBuf,

    /// Chunking configuration.
    pub chunking: ChunkingConfig,

    /// Query processing configuration.
    pub query: QueryConfig,

    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Generation backend configuration.
    pub generation: GenerationConfig,

    /// Prompt templates.
    pub prompts: PromptConfig,
}

impl RetrievalConfig {
    /// Create a new configuration with default values.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            chunking: ChunkingConfig::default(),
            query: QueryConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            prompts: PromptConfig::default(),
        }
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    /// Set the query configuration.
    pub fn with_query(mut self, config: QueryConfig) -> Self {
        self.query = config;
        self
    }

    /// Set the chunking configuration.
    pub fn with_chunking(mut self, config: ChunkingConfig) -> Self {
        self.chunking = config;
        self
    }

    /// Check every setting that would otherwise fail on first use.
    pub fn validate(&self) -> Result<()> {
        self.chunking.splitter()?;
        if self.query.top_k == 0 {
            return Err(RetrievalError::Configuration(
                "query.top_k must be greater than 0".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(RetrievalError::Configuration(
                "embedding.batch_size must be greater than 0".to_string(),
            ));
        }
        PromptLibrary::from_config(&self.prompts)?;
        Ok(())
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self::new("backend/sessions")
    }
}

/// How documents are cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,

    /// Characters repeated between consecutive chunks.
    pub overlap: usize,
}

impl ChunkingConfig {
    /// Build the splitter these settings describe.
    pub fn splitter(&self) -> Result<TextSplitter> {
        Ok(TextSplitter::new(self.chunk_size, self.overlap)?)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Configuration for query processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Chunks retrieved per question.
    pub top_k: usize,

    /// Leading chunks fed to the summary prompt.
    pub summary_chunks: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            summary_chunks: 3,
        }
    }
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which provider to use.
    pub provider: EmbeddingProviderType,

    /// Model to use for embeddings.
    pub model: Option<String>,

    /// Output dimension; required with a custom Gemini model, and the bucket
    /// count for the local provider.
    pub dimension: Option<usize>,

    /// API key; falls back to the provider's environment variable.
    pub api_key: Option<String>,

    /// Override of the provider's API base URL.
    pub base_url: Option<String>,

    /// Texts sent per backend call.
    pub batch_size: usize,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::Gemini,
            model: None,
            dimension: None,
            api_key: None,
            base_url: None,
            batch_size: docchat_embeddings::provider::DEFAULT_BATCH_SIZE,
            timeout_secs: 60,
        }
    }
}

impl EmbeddingConfig {
    /// Construct the configured embedder.
    pub fn build_embedder(&self) -> Result<Embedder> {
        let timeout = Duration::from_secs(self.timeout_secs);
        let provider: Arc<dyn EmbeddingProvider> = match self.provider {
            EmbeddingProviderType::Gemini => {
                let mut provider = GeminiProvider::new().with_timeout(timeout);
                if let Some(model) = &self.model {
                    let dimension = self.dimension.ok_or_else(|| {
                        RetrievalError::Configuration(format!(
                            "embedding.dimension is required for model {model}"
                        ))
                    })?;
                    provider = provider.with_model(model.as_str(), dimension);
                }
                if let Some(key) = &self.api_key {
                    provider = provider.with_api_key(key.as_str());
                }
                if let Some(url) = &self.base_url {
                    provider = provider.with_base_url(url.as_str());
                }
                Arc::new(provider)
            }
            EmbeddingProviderType::OpenAI => {
                let mut provider = OpenAIProvider::new().with_timeout(timeout);
                if let Some(model) = &self.model {
                    provider = provider.with_model(model.as_str());
                }
                if let Some(key) = &self.api_key {
                    provider = provider.with_api_key(key.as_str());
                }
                if let Some(url) = &self.base_url {
                    provider = provider.with_base_url(url.as_str());
                }
                Arc::new(provider)
            }
            EmbeddingProviderType::Local => match self.dimension {
                Some(dimension) => Arc::new(HashingProvider::new(dimension)),
                None => Arc::new(HashingProvider::default()),
            },
        };
        Ok(Embedder::new(provider).with_batch_size(self.batch_size))
    }
}

/// Type of embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// Google Gemini embeddings API.
    Gemini,
    /// OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
    /// Offline token hashing; no network access.
    Local,
}

/// Configuration for the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Gemini model name.
    pub model: String,

    /// Sampling parameters.
    #[serde(flatten)]
    pub sampling: SamplingParams,

    /// API key; falls back to `GOOGLE_API_KEY`.
    pub api_key: Option<String>,

    /// Override of the API base URL.
    pub base_url: Option<String>,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            sampling: SamplingParams::default(),
            api_key: None,
            base_url: None,
            timeout_secs: 120,
        }
    }
}

impl GenerationConfig {
    /// Construct the configured generator.
    pub fn build_generator(&self) -> Arc<dyn GenerationProvider> {
        let mut generator = GeminiGenerator::new()
            .with_model(self.model.as_str())
            .with_sampling(self.sampling)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(key) = &self.api_key {
            generator = generator.with_api_key(key.as_str());
        }
        if let Some(url) = &self.base_url {
            generator = generator.with_base_url(url.as_str());
        }
        Arc::new(generator)
    }
}

/// Prompt template selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Template used when a question names none.
    pub default_template: String,

    /// Extra or overriding templates by name.
    pub templates: BTreeMap<String, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            default_template: PHYSIOTHERAPY.to_string(),
            templates: BTreeMap::new(),
        }
    }
}
