//! Similarity computation for embeddings.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use crate::error::{IndexError, Result};
use crate::{Embedding, EmbeddingError};

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical vectors
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot_product = dot(a, b);
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot_product / (magnitude_a * magnitude_b))
}

/// Inner product of two equal-length slices. Callers check lengths.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Normalize an embedding to unit length.
///
/// Zero vectors are left untouched.
pub fn normalize(embedding: &mut Embedding) {
    let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Rank unit-length candidates against a unit-length query.
///
/// Returns `(position, score)` pairs, best score first. Equal scores keep
/// candidate order so the ranking is deterministic.
pub(crate) fn rank_top_k(
    query: &[f32],
    candidates: &[Embedding],
    k: usize,
) -> std::result::Result<Vec<(usize, f32)>, IndexError> {
    let mut scored = Vec::with_capacity(candidates.len());
    for (position, candidate) in candidates.iter().enumerate() {
        if candidate.len() != query.len() {
            return Err(IndexError::Dimension {
                expected: candidate.len(),
                actual: query.len(),
            });
        }
        scored.push((position, dot(query, candidate)));
    }

    scored.sort_by_key(|&(position, score)| (Reverse(OrderedFloat(score)), position));
    scored.truncate(k);
    Ok(scored)
}
