//! In-process embeddings via fastembed.

use std::sync::Arc;

use async_trait::async_trait;

use super::{apply_prefix, check_count, check_dimensions, Embedder, EmbeddingRole};
use crate::{EmbeddingModelConfig, Error, Provider, Result};

/// Embedder running fastembed's default model (BGE-small-en, 384 dimensions)
/// on the blocking thread pool.
///
/// ```rust,ignore
/// use cleave::{EmbeddingModelConfig, LocalEmbedder, Provider};
///
/// let model = EmbeddingModelConfig::builder("bge-small-en", Provider::Local, 384).build()?;
/// let embedder = LocalEmbedder::new(model)?;
/// ```
pub struct LocalEmbedder {
    inner: Arc<fastembed::TextEmbedding>,
    model: EmbeddingModelConfig,
}

impl LocalEmbedder {
    /// Load the default model. Downloads weights on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModelConfig`] for a non-local model config and
    /// [`Error::Embedding`] if the model fails to load.
    pub fn new(model: EmbeddingModelConfig) -> Result<Self> {
        if model.provider() != Provider::Local {
            return Err(Error::InvalidModelConfig(format!(
                "model {:?} is not local",
                model.name()
            )));
        }
        let inner = fastembed::TextEmbedding::try_new(Default::default())
            .map_err(|e| Error::Embedding(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(inner),
            model,
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, texts: &[String], role: EmbeddingRole) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let input = apply_prefix(&self.model, texts, role);
        let inner = Arc::clone(&self.inner);

        let vectors = tokio::task::spawn_blocking(move || inner.embed(input, None))
            .await
            .map_err(|e| Error::Embedding(format!("embedding task failed: {e}")))?
            .map_err(|e| Error::Embedding(e.to_string()))?;

        check_count(texts.len(), vectors.len())?;
        check_dimensions(self.model.dimensions(), &vectors)?;
        Ok(vectors)
    }

    fn model(&self) -> &EmbeddingModelConfig {
        &self.model
    }
}
