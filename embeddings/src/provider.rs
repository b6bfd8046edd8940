//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the boundary to an external embedding backend.
//! [`Embedder`] wraps a provider and enforces what the index relies on: one
//! vector per text, every vector of the provider's dimension, no NaNs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Largest batch the Gemini `batchEmbedContents` endpoint accepts.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Model the vectors come from.
    fn model(&self) -> &str;

    /// Dimension of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed document passages, one vector per text, in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".into()))
    }

    /// Check if the provider is available (API key set, etc.).
    fn is_available(&self) -> bool;
}

/// Checked front end over an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl Embedder {
    /// Wrap a provider.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the number of texts sent per backend call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Dimension of the vectors this embedder produces.
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Model the vectors come from.
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Whether the underlying provider is configured.
    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }

    /// Embed document passages. Either every text gets a vector or the call
    /// fails; texts are never skipped.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.provider.embed_documents(batch).await?;
            if embedded.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                });
            }
            for vector in &embedded {
                self.check(vector)?;
            }
            vectors.extend(embedded);
        }

        debug!(
            "Embedded {} passages with {}/{}",
            vectors.len(),
            self.provider.name(),
            self.provider.model()
        );
        Ok(vectors)
    }

    /// Embed a question.
    pub async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let vector = self.provider.embed_query(text).await?;
        self.check(&vector)?;
        Ok(vector)
    }

    fn check(&self, vector: &Embedding) -> Result<()> {
        let expected = self.provider.dimension();
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::InvalidResponse(
                "vector contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}

/// Google Gemini embedding provider.
pub struct GeminiProvider {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model name, including the `models/` prefix.
    model: String,

    /// Vector dimension of `model`.
    dimension: usize,
}

impl GeminiProvider {
    /// Create a new Gemini provider reading `GOOGLE_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("GOOGLE_API_KEY").ok(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            client: reqwest::Client::new(),
            model: "models/embedding-001".to_string(),
            dimension: 768,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model and its output dimension.
    pub fn with_model(mut self, model: impl Into<String>, dimension: usize) -> Self {
        let model = model.into();
        self.model = if model.starts_with("models/") {
            model
        } else {
            format!("models/{model}")
        };
        self.dimension = dimension;
        self
    }

    /// Set a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::ProviderNotConfigured("GOOGLE_API_KEY is not set".into()))
    }

    fn request(&self, text: &str, task_type: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "content": { "parts": [{ "text": text }] },
            "taskType": task_type,
        })
    }

    async fn post<R: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<R> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(format!("{}/{}:{method}", self.base_url, self.model))
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Generating batch embeddings for {} texts with model: {}",
            texts.len(),
            self.model
        );

        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| self.request(text, "RETRIEVAL_DOCUMENT"))
            .collect();
        let body = serde_json::json!({ "requests": requests });

        let result: GeminiBatchResponse = self.post("batchEmbedContents", &body).await?;
        let vectors: Vec<Embedding> = result.embeddings.into_iter().map(|e| e.values).collect();

        info!("Generated {} batch embeddings", vectors.len());
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let body = self.request(text, "RETRIEVAL_QUERY");
        let result: GeminiSingleResponse = self.post("embedContent", &body).await?;
        Ok(result.embedding.values)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct GeminiBatchResponse {
    #[serde(default)]
    embeddings: Vec<GeminiValues>,
}

#[derive(Debug, Deserialize)]
struct GeminiSingleResponse {
    embedding: GeminiValues,
}

#[derive(Debug, Deserialize)]
struct GeminiValues {
    values: Vec<f32>,
}

/// OpenAI embedding provider.
pub struct OpenAIProvider {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Default model.
    model: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider reading `OPENAI_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            model: "text-embedding-3-small".to_string(),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let api_key = self.api_key.as_ref().ok_or_else(|| {
            EmbeddingError::ProviderNotConfigured("OPENAI_API_KEY is not set".into())
        })?;

        debug!(
            "Generating batch embeddings for {} texts with model: {}",
            texts.len(),
            self.model
        );

        let body = serde_json::json!({
            "input": texts,
            "model": self.model
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await?;

        let response = check_status(response).await?;
        let mut result: OpenAIEmbeddingResponse = response.json().await?;

        // The API documents `index` as the input position; do not rely on
        // response order.
        result.data.sort_by_key(|item| item.index);
        let vectors: Vec<Embedding> = result.data.into_iter().map(|item| item.embedding).collect();

        info!("Generated {} batch embeddings", vectors.len());
        Ok(vectors)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Offline provider that hashes word tokens into a fixed number of buckets.
///
/// The vectors carry lexical overlap only, which is enough for local runs
/// without an API key and for deterministic tests.
pub struct HashingProvider {
    dimension: usize,
}

impl HashingProvider {
    /// Create a hashing provider with `dimension` buckets.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            vector[slot] += 1.0;
        }
        vector
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        "token-hash-sha256"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_text(text))
    }

    fn is_available(&self) -> bool {
        true
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        return Err(EmbeddingError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::ApiRequest(format!(
            "API error ({status}): {error_text}"
        )));
    }

    Ok(response)
}
