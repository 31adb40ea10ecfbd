//! Embedding providers.
//!
//! The core never talks to a model directly. It consumes an [`Embedder`]:
//! one vector per input text, order preserved, failures returned as errors.
//!
//! ## Roles
//!
//! Asymmetric retrieval models embed queries and passages differently and
//! expect a marker prefix on each:
//!
//! ```text
//! nomic-embed-text:  "search_query: how do I..."   vs  "search_document: To do X..."
//! e5:                "query: how do I..."          vs  "passage: To do X..."
//! ```
//!
//! [`EmbeddingRole`] selects which configured prefix is applied. Providers
//! apply it; callers pass raw text.

mod http;
#[cfg(feature = "fastembed")]
mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{EmbeddingModelConfig, Error, Result};

pub use http::HttpEmbedder;
#[cfg(feature = "fastembed")]
pub use local::LocalEmbedder;

/// Texts per embedding request.
pub const EMBED_BATCH_SIZE: usize = 50;

/// Whether texts are being embedded as passages or as search queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingRole {
    /// Passages stored for retrieval.
    Document,
    /// Search queries.
    Query,
}

/// An embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input text (in order).
    async fn embed(&self, texts: &[String], role: EmbeddingRole) -> Result<Vec<Vec<f32>>>;

    /// The model this embedder produces vectors for.
    fn model(&self) -> &EmbeddingModelConfig;
}

/// Prepend the model's prefix for `role` to each text.
pub fn apply_prefix(model: &EmbeddingModelConfig, texts: &[String], role: EmbeddingRole) -> Vec<String> {
    let prefix = match role {
        EmbeddingRole::Document => model.document_prefix(),
        EmbeddingRole::Query => model.query_prefix(),
    };
    match prefix {
        Some(prefix) => texts.iter().map(|t| format!("{prefix}{t}")).collect(),
        None => texts.to_vec(),
    }
}

/// Embed `texts` in sequential batches of `batch_size`.
///
/// The first failing batch aborts the call; use this where an embedding
/// failure must propagate (e.g. semantic chunking).
///
/// # Errors
///
/// Propagates provider errors, and returns [`Error::Embedding`] if a provider
/// returns a different number of vectors than it was given texts.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[String],
    role: EmbeddingRole,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = embedder.embed(batch, role).await?;
        check_count(batch.len(), embedded.len())?;
        vectors.extend(embedded);
    }
    Ok(vectors)
}

/// Verify a provider returned exactly one vector per input.
pub(crate) fn check_count(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::Embedding(format!(
            "provider returned {actual} vectors for {expected} texts"
        )))
    }
}

/// Verify every vector has the model's dimensionality.
pub(crate) fn check_dimensions(expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    match vectors.iter().find(|v| v.len() != expected) {
        Some(bad) => Err(Error::DimensionMismatch {
            left: expected,
            right: bad.len(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic embedders for tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Provider;

    /// One-hot on the most frequent keyword (plus a small constant
    /// component so no vector has zero norm); counts calls.
    pub struct KeywordEmbedder {
        model: EmbeddingModelConfig,
        pub calls: AtomicUsize,
        keywords: Vec<&'static str>,
    }

    impl KeywordEmbedder {
        pub fn new(keywords: Vec<&'static str>) -> Self {
            let model = EmbeddingModelConfig::builder("keyword", Provider::Local, keywords.len() + 1)
                .build()
                .unwrap();
            Self {
                model,
                calls: AtomicUsize::new(0),
                keywords,
            }
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String], _role: EmbeddingRole) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|text| {
                    let lower = text.to_lowercase();
                    let counts: Vec<usize> = self.keywords.iter().map(|k| lower.matches(k).count()).collect();
                    let mut v = vec![0.0; self.keywords.len() + 1];
                    let best = counts.iter().copied().max().unwrap_or(0);
                    if best > 0 {
                        let idx = counts.iter().position(|&c| c == best).unwrap();
                        v[idx] = 1.0;
                    }
                    v[self.keywords.len()] = 0.01;
                    v
                })
                .collect())
        }

        fn model(&self) -> &EmbeddingModelConfig {
            &self.model
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::KeywordEmbedder;
    use super::*;
    use crate::Provider;

    #[test]
    fn test_apply_prefix_by_role() {
        let model = EmbeddingModelConfig::builder("m", Provider::Local, 4)
            .query_prefix("query: ")
            .document_prefix("passage: ")
            .build()
            .unwrap();
        let texts = vec!["hello".to_string()];

        assert_eq!(apply_prefix(&model, &texts, EmbeddingRole::Query), ["query: hello"]);
        assert_eq!(apply_prefix(&model, &texts, EmbeddingRole::Document), ["passage: hello"]);
    }

    #[test]
    fn test_no_prefix_passthrough() {
        let model = EmbeddingModelConfig::builder("m", Provider::Local, 4).build().unwrap();
        let texts = vec!["hello".to_string()];
        assert_eq!(apply_prefix(&model, &texts, EmbeddingRole::Query), ["hello"]);
    }

    #[tokio::test]
    async fn test_batches_are_sequential_and_ordered() {
        let embedder = KeywordEmbedder::new(vec!["cat", "dog"]);
        let texts: Vec<String> = (0..7)
            .map(|i| if i % 2 == 0 { "cat".into() } else { "dog".into() })
            .collect();

        let vectors = embed_in_batches(&embedder, &texts, EmbeddingRole::Document, 3)
            .await
            .unwrap();

        assert_eq!(vectors.len(), 7);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(vectors[0][0], 1.0);
        assert_eq!(vectors[1][1], 1.0);
    }

    #[test]
    fn test_check_count() {
        assert!(check_count(2, 2).is_ok());
        assert!(matches!(check_count(2, 1), Err(Error::Embedding(_))));
    }
}
