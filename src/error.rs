//! Error types for cleave.

/// Errors that can occur while chunking, embedding, retrieving, or evaluating.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid chunk size (must be > 0).
    #[error("invalid chunk size: {0} (must be > 0)")]
    InvalidChunkSize(usize),

    /// Overlap is not strictly smaller than the chunk size.
    #[error("overlap {overlap} must be smaller than chunk size {size}")]
    OverlapExceedsSize {
        /// The chunk size in tokens.
        size: usize,
        /// The overlap that was too large.
        overlap: usize,
    },

    /// Strategy name that does not match any chunker.
    #[error("unknown chunking strategy: {0:?}")]
    UnknownStrategy(String),

    /// Embedding model configuration failed validation.
    #[error("invalid embedding model config: {0}")]
    InvalidModelConfig(String),

    /// Two vectors of different length were compared.
    #[error("vector dimensions must match: {left} vs {right}")]
    DimensionMismatch {
        /// Length of the first vector.
        left: usize,
        /// Length of the second vector.
        right: usize,
    },

    /// Embedding provider returned an error or a malformed response.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Transport failure talking to an embedding provider.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A referenced document, chunk, phrase, or run does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An evaluation run was finished a second time.
    #[error("evaluation run {0} is already finished")]
    RunAlreadyFinished(String),

    /// No test phrase has a resolvable expected chunk.
    #[error("no test phrases with an expected chunk")]
    NoGroundTruth,

    /// Every grid configuration was rejected (e.g. overlap >= size).
    #[error("no valid configurations: overlap must be smaller than chunk size")]
    NoValidConfigurations,

    /// The semantic strategy was requested without an embedder.
    #[error("semantic chunking requires an embedder")]
    EmbedderRequired,

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a configuration error raised before any mutation.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidChunkSize(_)
                | Self::OverlapExceedsSize { .. }
                | Self::UnknownStrategy(_)
                | Self::InvalidModelConfig(_)
                | Self::NoValidConfigurations
                | Self::EmbedderRequired
        )
    }
}

/// Result type for cleave operations.
pub type Result<T> = std::result::Result<T, Error>;
