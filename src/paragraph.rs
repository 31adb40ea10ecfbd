//! Paragraph-window chunking.
//!
//! Paragraphs are separated by blank lines (a newline, optional whitespace,
//! another newline). Each paragraph is one unit for the fixed-window
//! accumulator, so chunks never split inside a paragraph:
//!
//! ```text
//! "Intro line.\n\nBody one.\nStill body one.\n  \nBody two."
//!
//! -> ["Intro line.", "Body one.\nStill body one.", "Body two."]
//! ```
//!
//! A single paragraph larger than the target becomes its own oversized chunk.
//! Use [`RecursiveChunker`](crate::RecursiveChunker) when hard limits matter.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Chunk, ChunkConfig, Chunker, FixedWindow, Result};

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("blank line pattern is valid"));

/// Split text into trimmed, non-empty paragraphs.
#[must_use]
pub fn split_paragraphs(text: &str) -> Vec<String> {
    BLANK_LINE
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Paragraph-window chunker (the `paragraph` strategy).
///
/// ```rust
/// use cleave::{Chunker, ParagraphChunker};
///
/// let chunker = ParagraphChunker::new(5, 0).unwrap();
/// let chunks = chunker.chunk("First paragraph here.\n\nSecond paragraph here.", &[]);
///
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[1].content, "Second paragraph here.");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ParagraphChunker {
    window: FixedWindow,
}

impl ParagraphChunker {
    /// Create a paragraph chunker.
    ///
    /// # Errors
    ///
    /// Returns an error if `target_tokens == 0` or `overlap_tokens >= target_tokens`.
    pub fn new(target_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        Ok(Self {
            window: FixedWindow::new(target_tokens, overlap_tokens)?,
        })
    }

    /// Create a chunker from a validated config, ignoring its strategy.
    #[must_use]
    pub fn from_config(config: &ChunkConfig) -> Self {
        Self {
            window: FixedWindow::from(config),
        }
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str, page_breaks: &[usize]) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return vec![];
        }
        let paragraphs = split_paragraphs(text);
        self.window.chunk_units(&paragraphs, "\n\n", page_breaks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_blank_lines() {
        let paragraphs = split_paragraphs("Intro line.\n\nBody one.\nStill body one.\n  \nBody two.");
        assert_eq!(
            paragraphs,
            ["Intro line.", "Body one.\nStill body one.", "Body two."]
        );
    }

    #[test]
    fn test_small_paragraphs_merge() {
        let chunker = ParagraphChunker::new(100, 0).unwrap();
        let chunks = chunker.chunk("One.\n\nTwo.\n\nThree.", &[]);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "One.\n\nTwo.\n\nThree.");
    }

    #[test]
    fn test_paragraph_overlap() {
        // Each paragraph is 12 chars = 3 tokens; target 6, overlap 3
        let text = "aaaaaaaaaaaa\n\nbbbbbbbbbbbb\n\ncccccccccccc";
        let chunker = ParagraphChunker::new(6, 3).unwrap();
        let chunks = chunker.chunk(text, &[]);

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(
            contents,
            ["aaaaaaaaaaaa\n\nbbbbbbbbbbbb", "bbbbbbbbbbbb\n\ncccccccccccc"]
        );
    }

    #[test]
    fn test_page_offsets_count_separator() {
        // Second paragraph starts at 12 + 2 = 14
        let text = "aaaaaaaaaaaa\n\nbbbbbbbbbbbb";
        let chunker = ParagraphChunker::new(3, 0).unwrap();
        let chunks = chunker.chunk(text, &[14, 40]);

        assert_eq!(chunks[0].page_number, Some(1));
        assert_eq!(chunks[1].page_number, Some(2));
    }

    #[test]
    fn test_empty_text() {
        let chunker = ParagraphChunker::new(10, 0).unwrap();
        assert!(chunker.chunk("\n\n  \n", &[]).is_empty());
    }
}
