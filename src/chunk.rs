//! The Chunk type: a passage of text with position metadata.

use serde::{Deserialize, Serialize};

/// Characters per estimated token.
///
/// Token counts in this crate are a heuristic (`ceil(chars / 4)`), not a real
/// tokenizer. Treat [`Chunk::token_count`] as an approximation.
pub const CHARS_PER_TOKEN: usize = 4;

/// A passage of a source document, sized to an approximate token budget.
///
/// Chunks are produced by a chunker from one source text plus a
/// [`ChunkConfig`](crate::ChunkConfig). Adjacent chunks may share text
/// (overlap), so concatenating them does not reproduce the source:
///
/// ```text
/// Source:  "One. Two. Three. Four."
/// Chunk 0: "One. Two. Three."
/// Chunk 1: "Three. Four."       <- "Three." repeated as overlap
/// ```
///
/// `chunk_index` is dense and sequential within a document: every re-chunk
/// reassigns indices from 0 with no gaps.
///
/// ```rust
/// use cleave::Chunk;
///
/// let chunk = Chunk::new("Hello, world!", 0, None);
/// assert_eq!(chunk.token_count, 4); // ceil(13 / 4)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// The chunk text.
    pub content: String,
    /// Zero-based index of this chunk within its document.
    pub chunk_index: usize,
    /// 1-based page the chunk starts on, when page breaks are known.
    pub page_number: Option<usize>,
    /// Estimated token count of `content`.
    pub token_count: usize,
}

impl Chunk {
    /// Create a chunk, estimating its token count from the content.
    #[must_use]
    pub fn new(content: impl Into<String>, chunk_index: usize, page_number: Option<usize>) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            content,
            chunk_index,
            page_number,
            token_count,
        }
    }

    /// Length of the content in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    /// Whether this chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl std::fmt::Display for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Chunk {{ index: {}, page: {:?}, tokens: {} }}",
            self.chunk_index, self.page_number, self.token_count
        )
    }
}

/// Estimate the token count of a text: `ceil(chars / 4)`.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_chars(text.chars().count())
}

/// Estimated tokens for a character count.
#[must_use]
pub const fn tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Map a character offset onto a 1-based page number.
///
/// `page_breaks` holds the sorted character offsets where each page ends.
/// The first boundary strictly greater than `offset` determines the page;
/// an offset beyond every boundary maps to the last page. Without page
/// breaks there is no page number.
///
/// ```rust
/// use cleave::page_number;
///
/// let breaks = [100, 200, 300];
/// assert_eq!(page_number(0, &breaks), Some(1));
/// assert_eq!(page_number(100, &breaks), Some(2));
/// assert_eq!(page_number(999, &breaks), Some(3));
/// assert_eq!(page_number(42, &[]), None);
/// ```
#[must_use]
pub fn page_number(offset: usize, page_breaks: &[usize]) -> Option<usize> {
    if page_breaks.is_empty() {
        return None;
    }
    let page = page_breaks
        .iter()
        .position(|&boundary| offset < boundary)
        .map_or(page_breaks.len(), |i| i + 1);
    Some(page)
}

/// Last `n` characters of `text` (the whole text if it is shorter).
pub(crate) fn tail_chars(text: &str, n: usize) -> &str {
    let len = text.chars().count();
    if len <= n {
        return text;
    }
    let skip = len - n;
    let start = text.char_indices().nth(skip).map_or(text.len(), |(i, _)| i);
    &text[start..]
}

/// First `n` characters of `text`.
pub(crate) fn head_chars(text: &str, n: usize) -> &str {
    let end = text.char_indices().nth(n).map_or(text.len(), |(i, _)| i);
    &text[..end]
}

/// Character offset of the first occurrence of `needle` in `haystack`.
pub(crate) fn find_char_offset(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .find(needle)
        .map(|byte| haystack[..byte].chars().count())
}
