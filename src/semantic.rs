//! Semantic chunking using embedding similarity.
//!
//! Splits text where the topic changes, detected by drops in similarity
//! between sliding windows of sentences.
//!
//! ## The Idea
//!
//! Windows of adjacent sentences about the same topic have similar
//! embeddings. When the topic changes, similarity drops. We split there.
//!
//! ```text
//! sentences:  S0  S1  S2  S3  S4  S5  S6
//! windows:   [S0 S1 S2]
//!                [S1 S2 S3]
//!                    [S2 S3 S4]         window_size = 3, stride 1
//!                        [S3 S4 S5]
//!                            [S4 S5 S6]
//! similarity:    0.91  0.88  0.31  0.86
//!                             ^
//!                 below 0.5: breakpoint after S(2 + 3/2) = S3
//!
//! Chunk 0: S0 S1 S2 S3
//! Chunk 1: S4 S5 S6
//! ```
//!
//! Breakpoints closer than two sentences to the previous one are dropped.
//!
//! ## Threshold Selection
//!
//! | Threshold | Effect |
//! |-----------|--------|
//! | 0.3 | Only major topic shifts |
//! | 0.5 | Balanced (default) |
//! | 0.7 | Very sensitive, many small chunks |
//!
//! ## Size Control
//!
//! Topic segments are unbounded, so any segment estimated above
//! `2 * target_tokens` is re-split by greedy sentence accumulation. Each chunk
//! after the first is then prefixed with the tail of the previous segment,
//! cut at a sentence boundary when one falls inside the overlap window.
//!
//! ## Cost
//!
//! One embedding per window: `sentences - window_size + 1` texts, sent in
//! batches of [`EMBED_BATCH_SIZE`]. Embedding errors propagate; there is no
//! fallback chunking.

use std::sync::Arc;

use crate::chunk::{find_char_offset, head_chars, page_number, tail_chars, tokens_for_chars};
use crate::embedding::{embed_in_batches, Embedder, EmbeddingRole, EMBED_BATCH_SIZE};
use crate::{cosine_similarity, estimate_tokens, split_sentences, Chunk, ChunkConfig, ChunkStrategy, Result};

/// Default similarity threshold below which a breakpoint is placed.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;

/// Default sentences per embedding window.
pub const DEFAULT_WINDOW_SIZE: usize = 3;

/// Characters of a segment used to locate it in the source for page lookup.
const PAGE_PROBE_CHARS: usize = 50;

/// Semantic chunker (the `semantic` strategy).
///
/// ## Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use cleave::{HttpEmbedder, SemanticChunker};
///
/// let chunker = SemanticChunker::new(Arc::new(HttpEmbedder::new(model, None)?))
///     .with_threshold(0.5)
///     .with_window_size(3);
///
/// let chunks = chunker.chunk(text, &page_breaks, 300, 60).await?;
/// ```
#[derive(Clone)]
pub struct SemanticChunker {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
    window_size: usize,
    batch_size: usize,
}

impl SemanticChunker {
    /// Create a semantic chunker with the default threshold and window size.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            window_size: DEFAULT_WINDOW_SIZE,
            batch_size: EMBED_BATCH_SIZE,
        }
    }

    /// Set the similarity threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the number of sentences per window (at least 1).
    #[must_use]
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    /// Set the number of windows per embedding request.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Chunk with the sizes of a [`ChunkConfig`], ignoring its strategy.
    ///
    /// # Errors
    ///
    /// Propagates embedding errors.
    pub async fn chunk_with_config(
        &self,
        text: &str,
        page_breaks: &[usize],
        config: &ChunkConfig,
    ) -> Result<Vec<Chunk>> {
        self.chunk(text, page_breaks, config.target_tokens(), config.overlap_tokens())
            .await
    }

    /// Split `text` at topic boundaries.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid budgets, and propagates
    /// embedding errors (including a provider returning the wrong number of
    /// vectors) and dimension mismatches between window embeddings.
    pub async fn chunk(
        &self,
        text: &str,
        page_breaks: &[usize],
        target_tokens: usize,
        overlap_tokens: usize,
    ) -> Result<Vec<Chunk>> {
        let config = ChunkConfig::new(target_tokens, overlap_tokens, ChunkStrategy::Semantic)?;

        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Ok(vec![]);
        }
        if sentences.len() <= self.window_size {
            let content = sentences.join(" ");
            return Ok(vec![Chunk::new(content, 0, page_number(0, page_breaks))]);
        }

        let windows: Vec<String> = sentences
            .windows(self.window_size)
            .map(|w| w.join(" "))
            .collect();
        let embeddings =
            embed_in_batches(self.embedder.as_ref(), &windows, EmbeddingRole::Document, self.batch_size)
                .await?;

        let similarities = embeddings
            .windows(2)
            .map(|pair| cosine_similarity(&pair[0], &pair[1]))
            .collect::<Result<Vec<f32>>>()?;

        let breakpoints = self.breakpoints(&similarities);
        let segments = split_oversized(partition(&sentences, &breakpoints), config.target_tokens());

        Ok(with_overlap(&segments, text, page_breaks, config.overlap_chars()))
    }

    /// Sentence indices that close a segment.
    fn breakpoints(&self, similarities: &[f32]) -> Vec<usize> {
        let half = self.window_size / 2;
        let mut breakpoints: Vec<usize> = Vec::new();
        for (i, &similarity) in similarities.iter().enumerate() {
            if similarity >= self.threshold {
                continue;
            }
            let at = i + half;
            match breakpoints.last() {
                Some(&last) if at < last + 2 => {}
                _ => breakpoints.push(at),
            }
        }
        breakpoints
    }
}

impl std::fmt::Debug for SemanticChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticChunker")
            .field("model", &self.embedder.model().name())
            .field("threshold", &self.threshold)
            .field("window_size", &self.window_size)
            .finish_non_exhaustive()
    }
}

/// Group sentences into segments; each breakpoint sentence ends its segment.
fn partition(sentences: &[String], breakpoints: &[usize]) -> Vec<String> {
    let mut segments = Vec::with_capacity(breakpoints.len() + 1);
    let mut start = 0;
    for &at in breakpoints {
        let end = (at + 1).min(sentences.len());
        if end > start {
            segments.push(sentences[start..end].join(" "));
            start = end;
        }
    }
    if start < sentences.len() {
        segments.push(sentences[start..].join(" "));
    }
    segments
}

/// Re-split segments estimated above twice the target.
fn split_oversized(segments: Vec<String>, target_tokens: usize) -> Vec<String> {
    let max_tokens = target_tokens * 2;
    let mut out = Vec::with_capacity(segments.len());

    for segment in segments {
        if estimate_tokens(&segment) <= max_tokens {
            out.push(segment);
            continue;
        }

        let mut current = String::new();
        for sentence in split_sentences(&segment) {
            // Length of `current + " " + sentence`
            let joined_chars = current.chars().count() + 1 + sentence.chars().count();
            if !current.is_empty() && tokens_for_chars(joined_chars) > target_tokens {
                out.push(std::mem::take(&mut current));
                current = sentence;
            } else {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&sentence);
            }
        }
        if !current.trim().is_empty() {
            out.push(current);
        }
    }
    out
}

/// Build final chunks, prefixing each with the tail of the previous segment.
fn with_overlap(segments: &[String], text: &str, page_breaks: &[usize], overlap_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(segments.len());
    let mut previous: Option<&str> = None;

    for segment in segments {
        if segment.is_empty() {
            continue;
        }

        let mut content = segment.clone();
        if let Some(prev) = previous.filter(|_| overlap_chars > 0) {
            let window = tail_chars(prev, overlap_chars);
            let clean = match window.rfind(". ") {
                Some(idx) if idx > 0 => &window[idx + 2..],
                _ => window,
            };
            let clean = clean.trim();
            if !clean.is_empty() {
                content = format!("{clean} {segment}");
            }
        }

        let offset = find_char_offset(text, head_chars(segment, PAGE_PROBE_CHARS)).unwrap_or(0);
        chunks.push(Chunk::new(
            content.trim(),
            chunks.len(),
            page_number(offset, page_breaks),
        ));
        previous = Some(segment.as_str());
    }
    chunks
}
