//! # cleave
//!
//! Chunking strategies and a retrieval benchmark for tuning them.
//!
//! ## The Problem
//!
//! A retrieval pipeline embeds chunks of documents and answers a query with
//! the nearest chunks. How the documents are cut decides what can be found:
//!
//! - Chunks too large dilute the embedding; the answer is in there somewhere,
//!   but so is everything else
//! - Chunks too small lose the context that makes a passage match the query
//! - No overlap cuts answers in half at chunk boundaries
//!
//! There is no universally right size. The only reliable way to choose is to
//! measure: cut the corpus several ways, ask known questions, and see which
//! cut retrieves the right passage most often.
//!
//! ## Chunking Strategies
//!
//! | Strategy | Unit | Overlap | Needs embedder |
//! |----------|------|---------|----------------|
//! | `sentence` | sentences | whole trailing sentences | no |
//! | `paragraph` | blank-line paragraphs | whole trailing paragraphs | no |
//! | `recursive` | separator hierarchy | trailing characters | no |
//! | `semantic` | topic segments | trailing characters, sentence-aligned | yes |
//!
//! Sizes are in estimated tokens, `ceil(chars / 4)`.
//!
//! ### Sentence windows
//!
//! ```text
//! Source:  "One. Two. Three. Four. Five."
//! target reached every ~3 sentences, overlap ~1 sentence
//!
//! Chunk 0: "One. Two. Three."
//! Chunk 1: "Three. Four. Five."
//! ```
//!
//! ### Semantic
//!
//! Embed sliding windows of sentences; where similarity between consecutive
//! windows drops below a threshold, start a new chunk. See [`SemanticChunker`].
//!
//! ## Evaluating a Cut
//!
//! ```text
//!            GridSpec: sizes x overlaps x strategies
//!                              |
//!        +---------------------+---------------------+
//!        v                                           |
//!   rechunk_all ─> remap_phrases ─> embed_all ─> evaluate ─> GridResult
//!        ^                                                        |
//!        +──────────────────── next configuration <───────────────+
//!                                                                 v
//!                                                          recommendation
//! ```
//!
//! Test phrases know which text holds their answer. After each re-chunk they
//! are re-pointed at whichever new chunk contains that text, then every
//! phrase is used as a query and scored on Hit@1/3/5, MRR, and nDCG.
//!
//! ## Quick Start
//!
//! ```rust
//! use cleave::{chunk_text, ChunkConfig, ChunkStrategy};
//!
//! let text = "The quick brown fox jumps over the lazy dog. \
//!             Pack my box with five dozen liquor jugs.";
//!
//! let config = ChunkConfig::new(10, 0, ChunkStrategy::Sentence).unwrap();
//! let chunks = chunk_text(text, &[], &config).unwrap();
//!
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].content, "Pack my box with five dozen liquor jugs.");
//! ```
//!
//! ## Grid Search
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cleave::{CancelToken, GridSearch, GridSpec, HttpEmbedder, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::load("corpus.json")?);
//! let embedder = Arc::new(HttpEmbedder::new(model, None)?);
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//!
//! let search = GridSearch::new(store, embedder);
//! let outcome = search.run(&GridSpec::default(), tx, CancelToken::new()).await?;
//! println!("{:?}", outcome.recommendation);
//! ```
//!
//! ## Performance Considerations
//!
//! | Step | Cost |
//! |------|------|
//! | Sentence / paragraph / recursive | O(n) in text length |
//! | Semantic | one embedding per sentence window |
//! | Embedding | one request per 50 chunks or phrases |
//! | Truncated retrieval | O(chunks x dims) per query |

mod chunk;
mod config;
mod embedding;
mod error;
mod eval;
mod fixed;
mod paragraph;
mod recursive;
mod registry;
mod remap;
mod semantic;
mod sentence;
mod settings;
mod similarity;
mod store;

pub use chunk::{estimate_tokens, page_number, Chunk, CHARS_PER_TOKEN};
pub use config::{
    ChunkConfig, ChunkStrategy, EmbeddingModelConfig, EmbeddingModelConfigBuilder, Provider,
    DEFAULT_OVERLAP_TOKENS, DEFAULT_TARGET_TOKENS,
};
pub use embedding::{apply_prefix, embed_in_batches, Embedder, EmbeddingRole, HttpEmbedder, EMBED_BATCH_SIZE};
#[cfg(feature = "fastembed")]
pub use embedding::LocalEmbedder;
pub use error::{Error, Result};
pub use eval::{
    embed_all, evaluate, rechunk_all, recommend, CancelToken, EmbedSummary, Evaluation, EventSink, GridEvent,
    GridOutcome, GridResult, GridSearch, GridSpec, MetricsAccumulator, PhraseDetail, Recommendation,
    RetrievalMetrics, RetrievedChunk, DEFAULT_TOP_K,
};
pub use fixed::FixedWindow;
pub use paragraph::{split_paragraphs, ParagraphChunker};
pub use recursive::{RecursiveChunker, DEFAULT_SEPARATORS};
pub use registry::SessionRegistry;
pub use remap::{find_best_chunk_match, normalize, remap_phrases, RemapSummary, REMAP_THRESHOLD};
pub use semantic::{SemanticChunker, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_WINDOW_SIZE};
pub use sentence::{split_sentences, SentenceChunker};
pub use settings::Settings;
pub use similarity::{cosine_similarity, find_similar_truncated, rank_by_similarity, RetrievalMode, SimilarChunk};
pub use store::{
    ChunkId, Corpus, CorpusDocument, CorpusPhrase, DocumentId, EvaluationRun, MemoryStore, PhraseId,
    PhraseResult, RunId, SourceDocument, Store, StoredChunk, TestPhrase,
};

/// A synchronous text chunking strategy.
///
/// All non-semantic chunkers implement this trait, enabling polymorphic usage:
///
/// ```rust
/// use cleave::{Chunk, Chunker, ParagraphChunker, SentenceChunker};
///
/// fn chunk_document(chunker: &dyn Chunker, text: &str) -> Vec<Chunk> {
///     chunker.chunk(text, &[])
/// }
///
/// let sentence = SentenceChunker::new(100, 20).unwrap();
/// let paragraph = ParagraphChunker::new(100, 20).unwrap();
///
/// let text = "Hello world. This is a test.";
/// assert_eq!(chunk_document(&sentence, text).len(), 1);
/// assert_eq!(chunk_document(&paragraph, text).len(), 1);
/// ```
///
/// [`SemanticChunker`] is async and fallible (it calls an embedding
/// provider), so it has its own inherent `chunk` method instead.
pub trait Chunker: Send + Sync {
    /// Split text into chunks.
    ///
    /// `page_breaks` holds sorted character offsets where pages end; pass an
    /// empty slice when the text has no pages.
    fn chunk(&self, text: &str, page_breaks: &[usize]) -> Vec<Chunk>;

    /// Estimate the number of chunks for a given text length.
    ///
    /// Useful for pre-allocation. May be approximate.
    fn estimate_chunks(&self, text_len: usize) -> usize {
        // Conservative default
        (text_len / 500).max(1)
    }
}

/// Chunk `text` with the strategy named by `config`.
///
/// Empty or whitespace-only text yields no chunks.
///
/// # Errors
///
/// Returns [`Error::EmbedderRequired`] for the semantic strategy; use
/// [`SemanticChunker`] for that.
pub fn chunk_text(text: &str, page_breaks: &[usize], config: &ChunkConfig) -> Result<Vec<Chunk>> {
    let chunks = match config.strategy() {
        ChunkStrategy::Sentence => SentenceChunker::from_config(config).chunk(text, page_breaks),
        ChunkStrategy::Paragraph => ParagraphChunker::from_config(config).chunk(text, page_breaks),
        ChunkStrategy::Recursive => RecursiveChunker::from_config(config).chunk(text, page_breaks),
        ChunkStrategy::Semantic => return Err(Error::EmbedderRequired),
    };
    Ok(chunks)
}
