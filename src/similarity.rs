//! Cosine similarity and top-k chunk retrieval.
//!
//! ## Two Retrieval Paths
//!
//! | Path | Where | Cost |
//! |------|-------|------|
//! | [`Store::nearest_chunks`] | store-side index | depends on the store |
//! | [`find_similar_truncated`] | in-process scan | O(N x d) per query |
//!
//! The truncated path exists for Matryoshka models, whose leading dimensions
//! form a usable embedding on their own. It loads every chunk embedding for
//! the model, so keep it to corpora below roughly 10k chunks.

use serde::{Deserialize, Serialize};

use crate::store::{Store, StoredChunk};
use crate::{Error, Result};

/// Cosine similarity of two vectors: `dot / (|a| |b|)`.
///
/// Accumulates in `f64`. A zero-norm vector has similarity exactly `0.0`
/// with everything.
///
/// ```rust
/// use cleave::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]).unwrap() - 1.0).abs() < 1e-6);
/// assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap(), 0.0);
/// assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).is_err());
/// ```
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    #[allow(clippy::cast_possible_truncation)]
    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32;
    Ok(similarity)
}

/// A retrieved chunk and its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarChunk {
    /// The chunk.
    pub chunk: StoredChunk,
    /// Cosine similarity to the query (`1 - distance`).
    pub similarity: f32,
}

/// Score candidates against `query` and keep the `top_k` most similar,
/// best first. Ties keep candidate order.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if any candidate length differs from
/// the query.
pub fn rank_by_similarity(
    query: &[f32],
    candidates: Vec<(StoredChunk, Vec<f32>)>,
    top_k: usize,
) -> Result<Vec<SimilarChunk>> {
    let mut scored = candidates
        .into_iter()
        .map(|(chunk, vector)| {
            cosine_similarity(query, &vector).map(|similarity| SimilarChunk { chunk, similarity })
        })
        .collect::<Result<Vec<_>>>()?;

    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(top_k);
    Ok(scored)
}

/// Retrieve with vectors truncated to their first `target_dim` components.
///
/// # Errors
///
/// Returns [`Error::InvalidModelConfig`] if `target_dim` is zero or longer
/// than the query, and [`Error::DimensionMismatch`] if a stored embedding is
/// shorter than `target_dim`.
pub async fn find_similar_truncated(
    store: &dyn Store,
    query: &[f32],
    model_id: &str,
    target_dim: usize,
    top_k: usize,
) -> Result<Vec<SimilarChunk>> {
    if target_dim == 0 || target_dim > query.len() {
        return Err(Error::InvalidModelConfig(format!(
            "cannot truncate a {}-dimensional query to {target_dim}",
            query.len()
        )));
    }

    let candidates = store
        .chunk_embeddings(model_id)
        .await?
        .into_iter()
        .map(|(chunk, mut vector)| {
            if vector.len() < target_dim {
                return Err(Error::DimensionMismatch {
                    left: target_dim,
                    right: vector.len(),
                });
            }
            vector.truncate(target_dim);
            Ok((chunk, vector))
        })
        .collect::<Result<Vec<_>>>()?;

    rank_by_similarity(&query[..target_dim], candidates, top_k)
}

/// How evaluation retrieves chunks for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Full vectors through [`Store::nearest_chunks`].
    #[default]
    Nearest,
    /// Matryoshka truncation through [`find_similar_truncated`].
    Truncated {
        /// Leading components to keep.
        dims: usize,
    },
}

impl RetrievalMode {
    /// Retrieve the `top_k` chunks most similar to `query`.
    ///
    /// # Errors
    ///
    /// Propagates store and dimension errors.
    pub async fn retrieve(
        self,
        store: &dyn Store,
        query: &[f32],
        model_id: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarChunk>> {
        match self {
            Self::Nearest => store.nearest_chunks(query, model_id, top_k).await,
            Self::Truncated { dims } => find_similar_truncated(store, query, model_id, dims, top_k).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chunk, MemoryStore};

    #[test]
    fn test_self_similarity_is_one() {
        let v = [0.3_f32, -1.2, 4.0, 0.01];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_symmetric() {
        let a = [1.0_f32, 2.0, 3.0];
        let b = [-2.0_f32, 0.5, 1.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), cosine_similarity(&b, &a).unwrap());
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_length_mismatch_errors() {
        assert!(matches!(
            cosine_similarity(&[1.0, 2.0], &[1.0]),
            Err(Error::DimensionMismatch { left: 2, right: 1 })
        ));
    }

    #[test]
    fn test_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]).unwrap(), 0.0);
    }

    async fn store_with(vectors: Vec<Vec<f32>>) -> (MemoryStore, Vec<StoredChunk>) {
        let store = MemoryStore::new();
        let doc = store.add_document("d", "x", vec![]);
        let chunks = (0..vectors.len())
            .map(|i| Chunk::new(format!("c{i}"), i, None))
            .collect();
        let stored = store.replace_chunks(doc, chunks).await.unwrap();
        store
            .save_chunk_embeddings("m", stored.iter().map(|c| c.id).zip(vectors).collect())
            .await
            .unwrap();
        (store, stored)
    }

    #[tokio::test]
    async fn test_truncated_uses_leading_dims() {
        // Leading dims agree with chunk 0; trailing dims favour chunk 1
        let (store, stored) = store_with(vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.6, 0.1, 5.0, 5.0]]).await;
        let query = [1.0, 0.0, 5.0, 5.0];

        let full = RetrievalMode::Nearest.retrieve(&store, &query, "m", 2).await.unwrap();
        assert_eq!(full[0].chunk.id, stored[1].id);

        let truncated = RetrievalMode::Truncated { dims: 2 }
            .retrieve(&store, &query, "m", 2)
            .await
            .unwrap();
        assert_eq!(truncated[0].chunk.id, stored[0].id);
    }

    #[tokio::test]
    async fn test_truncated_rejects_bad_dims() {
        let (store, _) = store_with(vec![vec![1.0, 0.0]]).await;
        assert!(find_similar_truncated(&store, &[1.0, 0.0], "m", 0, 5).await.is_err());
        assert!(find_similar_truncated(&store, &[1.0, 0.0], "m", 3, 5).await.is_err());
    }

    #[test]
    fn test_rank_limits_and_orders() {
        let chunk = |i| StoredChunk {
            id: crate::store::ChunkId::new(),
            document_id: crate::store::DocumentId::new(),
            generation: 1,
            chunk: Chunk::new("x", i, None),
        };
        let candidates = vec![
            (chunk(0), vec![0.0, 1.0]),
            (chunk(1), vec![1.0, 0.0]),
            (chunk(2), vec![1.0, 1.0]),
        ];
        let ranked = rank_by_similarity(&[1.0, 0.0], candidates, 2).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk.chunk.chunk_index, 1);
        assert_eq!(ranked[1].chunk.chunk.chunk_index, 2);
    }
}
