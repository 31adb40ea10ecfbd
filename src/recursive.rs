//! Recursive separator splitting with character overlap.
//!
//! Tries progressively finer separators until every segment fits the target,
//! then merges segments back into chunks.
//!
//! ## The Algorithm
//!
//! Given the default separators and a target of `T` characters:
//!
//! ```text
//! 1. Split on "\n\n" (paragraphs)
//! 2. For each segment > T: split on "\n" (lines)
//! 3. Still > T: split on ". ", "! ", "? " (sentences)
//! 4. Still > T: split on "; ", ", " (clauses)
//! 5. Still > T: split on " " (words)
//! 6. A single word longer than T is kept whole
//! ```
//!
//! Separators stay attached to the end of the part they terminate, so
//! concatenating all segments reproduces the input.
//!
//! ## Merge With Overlap
//!
//! Segments are appended to the current chunk until the next one would push
//! it past `T`. The closed chunk's last `overlap_tokens * 4` characters seed
//! the next chunk:
//!
//! ```text
//! segments: [p1][p2][p3][p4]
//!
//! Chunk 0: p1 p2
//! Chunk 1: ..2 p3 p4      <- "..2" is the character tail of chunk 0
//! ```
//!
//! Unlike the sentence strategy, this overlap is cut on characters, not
//! sentence boundaries, so it may start mid-word.

use crate::chunk::{find_char_offset, page_number, tail_chars};
use crate::{Chunk, ChunkConfig, Chunker, Error, Result, CHARS_PER_TOKEN};

/// Default separator hierarchy, coarsest first.
pub const DEFAULT_SEPARATORS: [&str; 8] = ["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

/// Recursive separator chunker (the `recursive` strategy).
///
/// ## Example
///
/// ```rust
/// use cleave::{Chunker, RecursiveChunker};
///
/// let chunker = RecursiveChunker::new(10, 0).unwrap();
/// let text = "Paragraph one is here.\n\nParagraph two is longer and might need splitting.";
/// let chunks = chunker.chunk(text, &[]);
///
/// assert!(chunks.len() >= 2);
/// assert!(chunks[0].content.starts_with("Paragraph one"));
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    target_chars: usize,
    overlap_chars: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a recursive chunker with [`DEFAULT_SEPARATORS`].
    ///
    /// # Errors
    ///
    /// Returns an error if `target_tokens == 0` or `overlap_tokens >= target_tokens`.
    pub fn new(target_tokens: usize, overlap_tokens: usize) -> Result<Self> {
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
            target_chars: target_tokens * CHARS_PER_TOKEN,
            overlap_chars: overlap_tokens * CHARS_PER_TOKEN,
            separators: DEFAULT_SEPARATORS.iter().map(|&s| s.to_string()).collect(),
        })
    }

    /// Create a chunker from a validated config, ignoring its strategy.
    #[must_use]
    pub fn from_config(config: &ChunkConfig) -> Self {
        Self {
            target_chars: config.target_chars(),
            overlap_chars: config.overlap_chars(),
            separators: DEFAULT_SEPARATORS.iter().map(|&s| s.to_string()).collect(),
        }
    }

    /// Replace the separator hierarchy (coarsest first).
    ///
    /// # Panics
    ///
    /// Panics if `separators` is empty or contains an empty string.
    #[must_use]
    pub fn with_separators(mut self, separators: &[&str]) -> Self {
        assert!(!separators.is_empty(), "separators must not be empty");
        assert!(
            separators.iter().all(|s| !s.is_empty()),
            "separators must not contain empty strings"
        );
        self.separators = separators.iter().map(|&s| s.to_string()).collect();
        self
    }

    /// Recursively split a segment using the separators from `sep_index` on.
    fn split_recursive(&self, text: &str, sep_index: usize, out: &mut Vec<String>) {
        if text.chars().count() <= self.target_chars || sep_index >= self.separators.len() {
            out.push(text.to_string());
            return;
        }

        let sep = &self.separators[sep_index];
        let parts: Vec<&str> = text.split(sep.as_str()).collect();
        let last = parts.len() - 1;
        let has_finer = sep_index + 1 < self.separators.len();

        for (i, part) in parts.into_iter().enumerate() {
            let with_sep = if i < last {
                format!("{part}{sep}")
            } else {
                part.to_string()
            };

            if has_finer && with_sep.chars().count() > self.target_chars {
                self.split_recursive(&with_sep, sep_index + 1, out);
            } else if !with_sep.is_empty() {
                out.push(with_sep);
            }
        }
    }

    fn push_chunk(&self, chunks: &mut Vec<Chunk>, current: &str, text: &str, page_breaks: &[usize]) {
        let trimmed = current.trim();
        if trimmed.is_empty() {
            return;
        }
        let offset = find_char_offset(text, trimmed).unwrap_or(0);
        chunks.push(Chunk::new(
            trimmed,
            chunks.len(),
            page_number(offset, page_breaks),
        ));
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str, page_breaks: &[usize]) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return vec![];
        }

        let mut segments = Vec::new();
        self.split_recursive(text, 0, &mut segments);

        let mut chunks = Vec::with_capacity(self.estimate_chunks(text.len()));
        let mut current = String::new();
        let mut current_len = 0;

        for segment in segments {
            let segment_len = segment.chars().count();
            if current_len > 0 && current_len + segment_len > self.target_chars {
                self.push_chunk(&mut chunks, &current, text, page_breaks);

                let overlap = if self.overlap_chars == 0 {
                    String::new()
                } else {
                    tail_chars(&current, self.overlap_chars).to_string()
                };
                current_len = overlap.chars().count();
                current = overlap;
            }
            current.push_str(&segment);
            current_len += segment_len;
        }

        self.push_chunk(&mut chunks, &current, text, page_breaks);
        chunks
    }

    fn estimate_chunks(&self, text_len: usize) -> usize {
        (text_len / self.target_chars).max(1)
    }
}
