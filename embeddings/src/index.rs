//! Per-session vector index.
//!
//! A [`VectorIndex`] pairs every chunk of one document with exactly one
//! unit-length vector. It is built in one step from already-embedded chunks,
//! searched by cosine similarity, and persisted as a single JSON file that is
//! written to a temporary path and renamed into place.
//!
//! Callers can attach metadata describing the indexed document. It travels in
//! the same file as the entries, so both are replaced by the same rename.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::IndexError;
use crate::similarity::{normalize, rank_top_k};

/// Version of the on-disk layout written by [`VectorIndex::save`].
pub const INDEX_FORMAT_VERSION: u32 = 1;

type Result<T> = std::result::Result<T, IndexError>;

/// One search result, borrowed from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a, T> {
    /// Position of the chunk in insertion order.
    pub position: usize,

    /// The matched chunk.
    pub chunk: &'a T,

    /// Cosine similarity between the query and the chunk vector.
    pub score: f32,
}

/// A similarity index over the chunks of a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex<T> {
    chunks: Vec<T>,
    vectors: Vec<Embedding>,
    dimension: usize,
    model: String,
    metadata: Value,
}

#[derive(Serialize)]
struct StoredIndexRef<'a, T> {
    format_version: u32,
    dimension: usize,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Value>,
    entries: Vec<StoredEntryRef<'a, T>>,
}

#[derive(Serialize)]
struct StoredEntryRef<'a, T> {
    chunk: &'a T,
    embedding: &'a [f32],
}

#[derive(Deserialize)]
struct StoredIndex<T> {
    format_version: u32,
    dimension: usize,
    model: String,
    #[serde(default)]
    metadata: Value,
    entries: Vec<StoredEntry<T>>,
}

#[derive(Deserialize)]
struct StoredEntry<T> {
    chunk: T,
    embedding: Embedding,
}

impl<T> VectorIndex<T> {
    /// Build an index from chunks and their vectors, paired by position.
    ///
    /// Vectors are normalized here so that search can use the inner product.
    pub fn build(chunks: Vec<T>, vectors: Vec<Embedding>, model: impl Into<String>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }

        let dimension = vectors.first().map_or(0, Vec::len);
        let mut normalized = Vec::with_capacity(vectors.len());
        for (position, mut vector) in vectors.into_iter().enumerate() {
            if vector.len() != dimension {
                return Err(IndexError::Dimension {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(IndexError::InvalidVector { position });
            }
            normalize(&mut vector);
            normalized.push(vector);
        }

        debug!("Built vector index with {} entries ({dimension}D)", chunks.len());
        Ok(Self {
            chunks,
            vectors: normalized,
            dimension,
            model: model.into(),
            metadata: Value::Null,
        })
    }

    /// Attach metadata that is saved and loaded with the index.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Return up to `k` chunks ranked by similarity to `query`, best first.
    ///
    /// Asking for more results than there are chunks returns every chunk.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit<'_, T>>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::Dimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let hits = rank_top_k(&query, &self.vectors, k)?
            .into_iter()
            .map(|(position, score)| SearchHit {
                position,
                chunk: &self.chunks[position],
                score,
            })
            .collect();
        Ok(hits)
    }

    /// Chunks in insertion order.
    pub fn chunks(&self) -> &[T] {
        &self.chunks
    }

    /// Stored (normalized) vectors in insertion order.
    pub fn vectors(&self) -> &[Embedding] {
        &self.vectors
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Dimension shared by every vector in the index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embedding model the vectors came from.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Metadata attached with [`VectorIndex::with_metadata`], `Null` if none.
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }
}

impl<T: Serialize> VectorIndex<T> {
    /// Serialize the index to JSON.
    pub fn to_json(&self) -> Result<String> {
        let stored = StoredIndexRef {
            format_version: INDEX_FORMAT_VERSION,
            dimension: self.dimension,
            model: &self.model,
            metadata: (!self.metadata.is_null()).then_some(&self.metadata),
            entries: self
                .chunks
                .iter()
                .zip(self.vectors.iter())
                .map(|(chunk, embedding)| StoredEntryRef { chunk, embedding })
                .collect(),
        };
        Ok(serde_json::to_string(&stored)?)
    }

    /// Persist the index to `destination`.
    ///
    /// The file is written next to the destination and renamed over it, so a
    /// reader never observes a partially written index.
    pub fn save(&self, destination: &Path) -> Result<()> {
        let content = self.to_json()?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = destination.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, destination)?;

        info!(
            "Saved vector index with {} entries to {}",
            self.len(),
            destination.display()
        );
        Ok(())
    }
}

impl<T: DeserializeOwned> VectorIndex<T> {
    /// Load an index from JSON, rejecting it unless every vector has
    /// `expected_dimension` components.
    pub fn from_json(json: &str, expected_dimension: usize, source: &Path) -> Result<Self> {
        let corrupt = |reason: String| IndexError::Corrupt {
            path: source.to_path_buf(),
            reason,
        };

        let stored: StoredIndex<T> =
            serde_json::from_str(json).map_err(|e| corrupt(format!("unreadable: {e}")))?;

        if stored.format_version != INDEX_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                stored.format_version
            )));
        }
        if stored.dimension != expected_dimension {
            return Err(corrupt(format!(
                "stored dimension {} does not match expected {expected_dimension}",
                stored.dimension
            )));
        }

        let mut chunks = Vec::with_capacity(stored.entries.len());
        let mut vectors = Vec::with_capacity(stored.entries.len());
        for (position, entry) in stored.entries.into_iter().enumerate() {
            if entry.embedding.len() != stored.dimension {
                return Err(corrupt(format!(
                    "entry {position} has {} components, header says {}",
                    entry.embedding.len(),
                    stored.dimension
                )));
            }
            chunks.push(entry.chunk);
            vectors.push(entry.embedding);
        }

        Ok(Self {
            chunks,
            vectors,
            dimension: stored.dimension,
            model: stored.model,
            metadata: stored.metadata,
        })
    }

    /// Load an index previously written by [`VectorIndex::save`].
    pub fn load(source: &Path, expected_dimension: usize) -> Result<Self> {
        let content = fs::read_to_string(source)?;
        let index = Self::from_json(&content, expected_dimension, source)?;
        info!(
            "Loaded {} entries into vector index from {}",
            index.len(),
            source.display()
        );
        Ok(index)
    }
}
