//! Fixed-window accumulation with unit overlap.
//!
//! The shared engine behind [`SentenceChunker`](crate::SentenceChunker) and
//! [`ParagraphChunker`](crate::ParagraphChunker): walk a list of text units
//! (sentences or paragraphs) in order, close a chunk once the token budget is
//! reached, then step back a few units so the next chunk repeats the tail of
//! the previous one.
//!
//! ## How It Works
//!
//! ```text
//! units = [s0 s1 s2 s3 s4 s5], target reached after 3 units, overlap ~1 unit
//!
//! Chunk 0: s0 s1 s2
//! Chunk 1:       s2 s3 s4     <- starts one unit back
//! Chunk 2:             s4 s5  <- input exhausted, closes early
//! ```
//!
//! ## Overlap Walk
//!
//! After closing units `start..=end`, the overlap walks backward from `end`,
//! summing unit lengths until `overlap_tokens * 4` characters are covered:
//!
//! ```text
//! start                end
//!   v                   v
//!  [s0] [s1] [s2] [s3] [s4]
//!                  <----+   accumulate s4, then s3 ... stop when budget met
//! ```
//!
//! The walk never includes `start` itself, so every chunk advances by at least
//! one unit. If the chunk start is reached before the budget is met there is
//! no overlap, and the next chunk starts after `end`, as it does with zero
//! overlap.

use crate::chunk::{page_number, tokens_for_chars};
use crate::{Chunk, CHARS_PER_TOKEN};

/// Token-budgeted unit accumulator.
///
/// ## Example
///
/// ```rust
/// use cleave::FixedWindow;
///
/// let units: Vec<String> = ["One.", "Two.", "Three."].iter().map(|s| s.to_string()).collect();
/// let window = FixedWindow::new(2, 0).unwrap();
/// let chunks = window.chunk_units(&units, " ", &[]);
///
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].content, "One. Two.");
/// assert_eq!(chunks[1].content, "Three.");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FixedWindow {
    target_tokens: usize,
    overlap_tokens: usize,
}

impl FixedWindow {
    /// Create an accumulator.
    ///
    /// # Errors
    ///
    /// Returns an error if `target_tokens == 0` or `overlap_tokens >= target_tokens`.
    pub fn new(target_tokens: usize, overlap_tokens: usize) -> crate::Result<Self> {
        if target_tokens == 0 {
            return Err(crate::Error::InvalidChunkSize(target_tokens));
        }
        if overlap_tokens >= target_tokens {
            return Err(crate::Error::OverlapExceedsSize {
                size: target_tokens,
                overlap: overlap_tokens,
            });
        }
        Ok(Self {
            target_tokens,
            overlap_tokens,
        })
    }

    /// Target size in estimated tokens.
    #[must_use]
    pub const fn target_tokens(&self) -> usize {
        self.target_tokens
    }

    /// Overlap in estimated tokens.
    #[must_use]
    pub const fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Accumulate `units` into chunks joined by `separator`.
    ///
    /// Page numbers come from each chunk's starting character offset, which
    /// is approximated as the sum of preceding unit lengths plus one
    /// separator each.
    pub fn chunk_units(&self, units: &[String], separator: &str, page_breaks: &[usize]) -> Vec<Chunk> {
        if units.is_empty() {
            return vec![];
        }

        let lens: Vec<usize> = units.iter().map(|u| u.chars().count()).collect();
        let sep_len = separator.chars().count();
        let overlap_chars = self.overlap_tokens * CHARS_PER_TOKEN;

        let mut chunks = Vec::new();
        let mut current_chars = 0;
        let mut start = 0;

        for i in 0..units.len() {
            current_chars += lens[i];

            let is_last = i == units.len() - 1;
            if tokens_for_chars(current_chars) < self.target_tokens && !is_last {
                continue;
            }

            let content = units[start..=i].join(separator);
            let content = content.trim();
            if !content.is_empty() {
                let offset: usize = lens[..start].iter().map(|l| l + sep_len).sum();
                chunks.push(Chunk::new(
                    content,
                    chunks.len(),
                    page_number(offset, page_breaks),
                ));
            }

            start = Self::overlap_start(&lens, start, i, overlap_chars);
            current_chars = lens[start..=i].iter().sum();
        }

        chunks
    }

    /// Index where the chunk after `start..=end` begins.
    fn overlap_start(lens: &[usize], start: usize, end: usize, overlap_chars: usize) -> usize {
        let mut next = end + 1;
        if overlap_chars == 0 {
            return next;
        }

        let mut covered = 0;
        let mut j = end;
        while j > start {
            covered += lens[j];
            if covered >= overlap_chars {
                next = j;
                break;
            }
            j -= 1;
        }
        next
    }
}

impl From<&crate::ChunkConfig> for FixedWindow {
    fn from(config: &crate::ChunkConfig) -> Self {
        // ChunkConfig already enforces 0 <= overlap < target
        Self {
            target_tokens: config.target_tokens(),
            overlap_tokens: config.overlap_tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_no_overlap_partitions_units() {
        let window = FixedWindow::new(2, 0).unwrap();
        let chunks = window.chunk_units(&units(&["aaaa", "bbbb", "cccc", "dddd"]), " ", &[]);

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, ["aaaa bbbb", "cccc dddd"]);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_overlap_repeats_trailing_unit() {
        // target 2 tokens (8 chars), overlap 1 token (4 chars)
        let window = FixedWindow::new(2, 1).unwrap();
        let chunks = window.chunk_units(&units(&["aaaa", "bbbb", "cccc", "dddd"]), " ", &[]);

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, ["aaaa bbbb", "bbbb cccc", "cccc dddd"]);
    }

    #[test]
    fn test_unmet_overlap_budget_repeats_nothing() {
        // Overlap budget (8 chars) never met by "bb" before the chunk start
        let window = FixedWindow::new(3, 2).unwrap();
        let chunks = window.chunk_units(&units(&["aaaaaaaa", "bb", "cccccccc"]), " ", &[]);

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, ["aaaaaaaa bb", "cccccccc"]);
    }

    #[test]
    fn test_long_first_unit_gives_no_overlap() {
        // target 40 chars, overlap 20: "yy" alone cannot cover the budget
        let window = FixedWindow::new(10, 5).unwrap();
        let long = "x".repeat(36);
        let chunks = window.chunk_units(&units(&[long.as_str(), "yy", "zzzz"]), " ", &[]);

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, [format!("{long} yy").as_str(), "zzzz"]);
    }

    #[test]
    fn test_page_numbers_from_offsets() {
        let window = FixedWindow::new(1, 0).unwrap();
        // offsets: 0, 5, 10
        let chunks = window.chunk_units(&units(&["aaaa", "bbbb", "cccc"]), " ", &[6, 100]);

        let pages: Vec<Option<usize>> = chunks.iter().map(|c| c.page_number).collect();
        assert_eq!(pages, [Some(1), Some(1), Some(2)]);
    }

    #[test]
    fn test_empty_units() {
        let window = FixedWindow::new(10, 2).unwrap();
        assert!(window.chunk_units(&[], " ", &[]).is_empty());
    }

    #[test]
    fn test_invalid_budgets() {
        assert!(FixedWindow::new(0, 0).is_err());
        assert!(FixedWindow::new(10, 10).is_err());
    }
}
