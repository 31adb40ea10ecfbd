//! Chunking and embedding-model configuration.
//!
//! ## Token Budgets
//!
//! A [`ChunkConfig`] expresses sizes in estimated tokens:
//!
//! - `target_tokens`: where a chunk closes.
//! - `overlap_tokens`: how much trailing text is repeated at the start of the
//!   next chunk.
//!
//! The overlap must be strictly smaller than the target. A chunk that repeats
//! its whole body never makes progress:
//!
//! ```text
//! target = 100, overlap = 100
//!
//! Chunk 0: [s1 s2 s3]
//! Chunk 1: [s1 s2 s3]  <- same sentences again, forever
//! ```
//!
//! Configs are validated at construction, so every [`ChunkConfig`] that exists
//! is usable.
//!
//! ## Model Configs
//!
//! [`EmbeddingModelConfig`] replaces loose JSON bags with an explicit struct
//! that is checked once, when it is built, rather than at first use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default chunk target in estimated tokens.
pub const DEFAULT_TARGET_TOKENS: usize = 300;

/// Default overlap in estimated tokens.
pub const DEFAULT_OVERLAP_TOKENS: usize = 60;

/// Which chunker produces a document's chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Greedy sentence accumulation with sentence overlap.
    #[default]
    Sentence,
    /// Greedy paragraph accumulation with paragraph overlap.
    Paragraph,
    /// Embedding-similarity topic boundaries.
    Semantic,
    /// Hierarchical separator splitting with character overlap.
    Recursive,
}

impl ChunkStrategy {
    /// All strategies, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Sentence,
        Self::Paragraph,
        Self::Semantic,
        Self::Recursive,
    ];

    /// The lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sentence => "sentence",
            Self::Paragraph => "paragraph",
            Self::Semantic => "semantic",
            Self::Recursive => "recursive",
        }
    }

    /// Whether this strategy needs an embedder to run.
    #[must_use]
    pub const fn needs_embedder(self) -> bool {
        matches!(self, Self::Semantic)
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sentence" => Ok(Self::Sentence),
            "paragraph" => Ok(Self::Paragraph),
            "semantic" => Ok(Self::Semantic),
            "recursive" => Ok(Self::Recursive),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}

/// A validated chunking configuration.
///
/// # Examples
///
/// ```rust
/// use cleave::{ChunkConfig, ChunkStrategy};
///
/// let config = ChunkConfig::new(200, 30, ChunkStrategy::Sentence).unwrap();
/// assert_eq!(config.target_tokens(), 200);
/// assert_eq!(config.target_chars(), 800);
///
/// // Overlap must be smaller than the target
/// assert!(ChunkConfig::new(100, 100, ChunkStrategy::Sentence).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawChunkConfig")]
pub struct ChunkConfig {
    target_tokens: usize,
    overlap_tokens: usize,
    strategy: ChunkStrategy,
}

impl ChunkConfig {
    /// Create a config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChunkSize`] if `target_tokens == 0` and
    /// [`Error::OverlapExceedsSize`] if `overlap_tokens >= target_tokens`.
    pub fn new(target_tokens: usize, overlap_tokens: usize, strategy: ChunkStrategy) -> Result<Self> {
        if target_tokens == 0 {
            return Err(Error::InvalidChunkSize(target_tokens));
        }
        if overlap_tokens >= target_tokens {
            return Err(Error::OverlapExceedsSize {
                size: target_tokens,
                overlap: overlap_tokens,
            });
        }
        Ok(Self {
            target_tokens,
            overlap_tokens,
            strategy,
        })
    }

    /// Target chunk size in estimated tokens.
    #[must_use]
    pub const fn target_tokens(&self) -> usize {
        self.target_tokens
    }

    /// Overlap in estimated tokens.
    #[must_use]
    pub const fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// The chunking strategy.
    #[must_use]
    pub const fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    /// Target size in characters.
    #[must_use]
    pub const fn target_chars(&self) -> usize {
        self.target_tokens * crate::CHARS_PER_TOKEN
    }

    /// Overlap in characters.
    #[must_use]
    pub const fn overlap_chars(&self) -> usize {
        self.overlap_tokens * crate::CHARS_PER_TOKEN
    }

    /// Short human label, e.g. `300t / 60o / sentence`.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{}t / {}o / {}",
            self.target_tokens, self.overlap_tokens, self.strategy
        )
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_tokens: DEFAULT_TARGET_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
            strategy: ChunkStrategy::Sentence,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChunkConfig {
    target_tokens: usize,
    overlap_tokens: usize,
    #[serde(default)]
    strategy: ChunkStrategy,
}

impl TryFrom<RawChunkConfig> for ChunkConfig {
    type Error = Error;

    fn try_from(raw: RawChunkConfig) -> Result<Self> {
        Self::new(raw.target_tokens, raw.overlap_tokens, raw.strategy)
    }
}

/// Wire protocol of an embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Ollama's `/api/embed` endpoint.
    Ollama,
    /// OpenAI-compatible `/embeddings` endpoint (OpenAI, LM Studio, vLLM, ...).
    #[serde(rename = "openai", alias = "lmstudio")]
    OpenAiCompatible,
    /// In-process model (requires the `fastembed` feature).
    Local,
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "lmstudio" | "openai-compatible" => Ok(Self::OpenAiCompatible),
            "local" | "fastembed" => Ok(Self::Local),
            other => Err(Error::InvalidModelConfig(format!("unknown provider {other:?}"))),
        }
    }
}

/// A validated embedding model description.
///
/// ```rust
/// use cleave::{EmbeddingModelConfig, Provider};
///
/// let model = EmbeddingModelConfig::builder("nomic-embed-text", Provider::Ollama, 768)
///     .endpoint("http://localhost:11434")
///     .query_prefix("search_query: ")
///     .document_prefix("search_document: ")
///     .matryoshka_dims([256, 512])
///     .build()
///     .unwrap();
///
/// assert_eq!(model.dimensions(), 768);
/// assert!(model.supports_truncation(256));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawEmbeddingModelConfig")]
pub struct EmbeddingModelConfig {
    name: String,
    provider: Provider,
    endpoint: String,
    dimensions: usize,
    query_prefix: Option<String>,
    document_prefix: Option<String>,
    matryoshka_dims: Vec<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEmbeddingModelConfig {
    name: String,
    provider: Provider,
    #[serde(default)]
    endpoint: String,
    dimensions: usize,
    #[serde(default)]
    query_prefix: Option<String>,
    #[serde(default)]
    document_prefix: Option<String>,
    #[serde(default)]
    matryoshka_dims: Vec<usize>,
}

impl TryFrom<RawEmbeddingModelConfig> for EmbeddingModelConfig {
    type Error = Error;

    fn try_from(raw: RawEmbeddingModelConfig) -> Result<Self> {
        let mut builder = Self::builder(raw.name, raw.provider, raw.dimensions)
            .endpoint(raw.endpoint)
            .matryoshka_dims(raw.matryoshka_dims);
        if let Some(prefix) = raw.query_prefix {
            builder = builder.query_prefix(prefix);
        }
        if let Some(prefix) = raw.document_prefix {
            builder = builder.document_prefix(prefix);
        }
        builder.build()
    }
}

impl EmbeddingModelConfig {
    /// Start building a config.
    pub fn builder(
        name: impl Into<String>,
        provider: Provider,
        dimensions: usize,
    ) -> EmbeddingModelConfigBuilder {
        EmbeddingModelConfigBuilder {
            inner: Self {
                name: name.into(),
                provider,
                endpoint: String::new(),
                dimensions,
                query_prefix: None,
                document_prefix: None,
                matryoshka_dims: Vec::new(),
            },
        }
    }

    /// Model name as the provider knows it. Also used as the store's model id.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider protocol.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    /// Base URL of the provider (empty for local models).
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Output vector length.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Prefix prepended to query texts.
    #[must_use]
    pub fn query_prefix(&self) -> Option<&str> {
        self.query_prefix.as_deref()
    }

    /// Prefix prepended to document texts.
    #[must_use]
    pub fn document_prefix(&self) -> Option<&str> {
        self.document_prefix.as_deref()
    }

    /// Leading-dimension sizes the model was trained to support.
    #[must_use]
    pub fn matryoshka_dims(&self) -> &[usize] {
        &self.matryoshka_dims
    }

    /// Whether vectors of this model may be truncated to `dims` components.
    #[must_use]
    pub fn supports_truncation(&self, dims: usize) -> bool {
        dims == self.dimensions || self.matryoshka_dims.contains(&dims)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidModelConfig("model name is empty".into()));
        }
        if self.dimensions == 0 {
            return Err(Error::InvalidModelConfig("dimensions must be > 0".into()));
        }
        if self.provider != Provider::Local {
            reqwest::Url::parse(&self.endpoint).map_err(|e| {
                Error::InvalidModelConfig(format!("invalid endpoint {:?}: {e}", self.endpoint))
            })?;
        }
        if let Some(&bad) = self
            .matryoshka_dims
            .iter()
            .find(|&&d| d == 0 || d > self.dimensions)
        {
            return Err(Error::InvalidModelConfig(format!(
                "matryoshka dimension {bad} outside 1..={}",
                self.dimensions
            )));
        }
        Ok(())
    }
}

/// Builder for [`EmbeddingModelConfig`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct EmbeddingModelConfigBuilder {
    inner: EmbeddingModelConfig,
}

impl EmbeddingModelConfigBuilder {
    /// Provider base URL.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.inner.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Prefix for query texts.
    #[must_use]
    pub fn query_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.inner.query_prefix = Some(prefix.into()).filter(|p| !p.is_empty());
        self
    }

    /// Prefix for document texts.
    #[must_use]
    pub fn document_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.inner.document_prefix = Some(prefix.into()).filter(|p| !p.is_empty());
        self
    }

    /// Supported truncation sizes.
    #[must_use]
    pub fn matryoshka_dims(mut self, dims: impl IntoIterator<Item = usize>) -> Self {
        self.inner.matryoshka_dims = dims.into_iter().collect();
        self.inner.matryoshka_dims.sort_unstable();
        self.inner.matryoshka_dims.dedup();
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModelConfig`] for an empty name, zero
    /// dimensions, an unparseable endpoint on an HTTP provider, or a
    /// Matryoshka size outside `1..=dimensions`.
    pub fn build(self) -> Result<EmbeddingModelConfig> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_overlap_equal_to_size() {
        let err = ChunkConfig::new(100, 100, ChunkStrategy::Sentence).unwrap_err();
        assert!(matches!(err, Error::OverlapExceedsSize { size: 100, overlap: 100 }));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_rejects_zero_size() {
        assert!(matches!(
            ChunkConfig::new(0, 0, ChunkStrategy::Sentence),
            Err(Error::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn test_strategy_round_trips_names() {
        for strategy in ChunkStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<ChunkStrategy>().unwrap(), strategy);
        }
        assert!(matches!(
            "fancy".parse::<ChunkStrategy>(),
            Err(Error::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ChunkConfig =
            serde_json::from_str(r#"{"targetTokens":200,"overlapTokens":30,"strategy":"paragraph"}"#)
                .unwrap();
        assert_eq!(ok.strategy(), ChunkStrategy::Paragraph);

        let bad = serde_json::from_str::<ChunkConfig>(r#"{"targetTokens":30,"overlapTokens":30}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_label() {
        let config = ChunkConfig::new(300, 60, ChunkStrategy::Recursive).unwrap();
        assert_eq!(config.label(), "300t / 60o / recursive");
    }

    #[test]
    fn test_model_config_deserialize_validates() {
        let ok: EmbeddingModelConfig = serde_json::from_str(
            r#"{"name":"nomic-embed-text","provider":"ollama","endpoint":"http://localhost:11434/","dimensions":768,"matryoshkaDims":[512,256]}"#,
        )
        .unwrap();
        assert_eq!(ok.endpoint(), "http://localhost:11434");
        assert_eq!(ok.matryoshka_dims(), [256, 512]);

        let empty_name = r#"{"name":"","provider":"local","dimensions":8}"#;
        let zero_dims = r#"{"name":"m","provider":"local","dimensions":0}"#;
        let bad_endpoint = r#"{"name":"m","provider":"ollama","endpoint":"not a url","dimensions":8}"#;
        for json in [empty_name, zero_dims, bad_endpoint] {
            assert!(serde_json::from_str::<EmbeddingModelConfig>(json).is_err(), "{json}");
        }
    }

    #[test]
    fn test_model_config_validation() {
        assert!(EmbeddingModelConfig::builder("", Provider::Ollama, 768)
            .endpoint("http://localhost:11434")
            .build()
            .is_err());
        assert!(EmbeddingModelConfig::builder("m", Provider::Ollama, 0)
            .endpoint("http://localhost:11434")
            .build()
            .is_err());
        assert!(EmbeddingModelConfig::builder("m", Provider::OpenAiCompatible, 8)
            .endpoint("not a url")
            .build()
            .is_err());
        assert!(EmbeddingModelConfig::builder("m", Provider::Ollama, 8)
            .endpoint("http://localhost:11434")
            .matryoshka_dims([16])
            .build()
            .is_err());
        // Local models need no endpoint
        assert!(EmbeddingModelConfig::builder("m", Provider::Local, 8).build().is_ok());
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let model = EmbeddingModelConfig::builder("m", Provider::Ollama, 8)
            .endpoint("http://localhost:11434/")
            .build()
            .unwrap();
        assert_eq!(model.endpoint(), "http://localhost:11434");
    }

    #[test]
    fn test_provider_aliases() {
        assert_eq!("lmstudio".parse::<Provider>().unwrap(), Provider::OpenAiCompatible);
        assert_eq!("Ollama".parse::<Provider>().unwrap(), Provider::Ollama);
        assert!("bogus".parse::<Provider>().is_err());
    }
}
