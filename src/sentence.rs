//! Sentence splitting and sentence-window chunking.
//!
//! ## Finding Sentences
//!
//! A sentence ends at `.`, `!`, or `?` followed by whitespace. The terminator
//! stays attached to its sentence; the whitespace is dropped:
//!
//! ```text
//! "Hello world. How are you?  Fine!"
//!              ^            ^^
//!              split here   and here
//!
//! -> ["Hello world.", "How are you?", "Fine!"]
//! ```
//!
//! This is deliberately simple. "Dr. Smith" splits after "Dr." and a decimal
//! like "3. 14" splits too. Chunkers only need approximately right boundaries,
//! and the simple rule keeps the output predictable across languages.
//!
//! ## Sentence Windows
//!
//! [`SentenceChunker`] accumulates sentences until the token budget is met,
//! then repeats trailing sentences as the head of the next chunk (see
//! [`FixedWindow`]). This is the `sentence` strategy.
//!
//! | Target | Overlap | Typical use |
//! |--------|---------|-------------|
//! | 100-200 | 0-30 | Short factual lookups |
//! | 300 | 60 | Default, general prose |
//! | 500+ | 60-100 | Long-form reasoning context |

use std::sync::LazyLock;

use regex::Regex;

use crate::{Chunk, ChunkConfig, Chunker, FixedWindow, Result};

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    // Terminator followed by a whitespace run; terminators are ASCII (1 byte)
    Regex::new(r"[.!?]\s+").expect("sentence boundary pattern is valid")
});

/// Split text into trimmed, non-empty sentences.
///
/// ```rust
/// use cleave::split_sentences;
///
/// assert_eq!(
///     split_sentences("One. Two! Three? Four"),
///     ["One.", "Two!", "Three?", "Four"],
/// );
/// assert_eq!(split_sentences("no terminal punctuation"), ["no terminal punctuation"]);
/// assert!(split_sentences("   ").is_empty());
/// ```
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last = 0;

    for boundary in SENTENCE_END.find_iter(text) {
        push_trimmed(&mut sentences, &text[last..=boundary.start()]);
        last = boundary.end();
    }
    push_trimmed(&mut sentences, &text[last..]);

    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Sentence-window chunker (the `sentence` strategy).
///
/// ## Example
///
/// ```rust
/// use cleave::{Chunker, SentenceChunker};
///
/// let chunker = SentenceChunker::new(1, 0).unwrap();
/// let chunks = chunker.chunk("A. B. C. D. E.", &[]);
///
/// let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
/// assert_eq!(contents, ["A.", "B.", "C.", "D.", "E."]);
/// assert!(chunks.iter().all(|c| c.page_number.is_none()));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SentenceChunker {
    window: FixedWindow,
}

impl SentenceChunker {
    /// Create a sentence chunker.
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

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str, page_breaks: &[usize]) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return vec![];
        }
        let sentences = split_sentences(text);
        self.window.chunk_units(&sentences, " ", page_breaks)
    }

    fn estimate_chunks(&self, text_len: usize) -> usize {
        let step = self.window.target_tokens() - self.window.overlap_tokens();
        (text_len / (step * crate::CHARS_PER_TOKEN)).max(1)
    }
}
