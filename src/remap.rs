//! Re-pointing test phrases at chunks after a re-chunk.
//!
//! A re-chunk replaces every chunk id, so each phrase's ground truth must be
//! found again. Phrases carry the text their answer contains
//! (`expected_content`); we score every chunk of the phrase's document
//! against it and keep the best match.
//!
//! ## Scoring
//!
//! Both sides are normalized first (lowercase, whitespace runs collapsed,
//! trimmed). Then, per chunk:
//!
//! | Case | Score |
//! |------|-------|
//! | chunk contains expected | 1.0 (first such chunk wins outright) |
//! | expected contains chunk | `len(chunk) / len(expected)` |
//! | otherwise | shared words / `max(expected word set, chunk words)` |
//!
//! A match below [`REMAP_THRESHOLD`] leaves the phrase unresolved, so it is
//! excluded from evaluation rather than pointing at a stale chunk.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{DocumentId, Store, StoredChunk};
use crate::Result;

/// Minimum score for a remap to be accepted.
pub const REMAP_THRESHOLD: f64 = 0.3;

/// Lowercase, collapse whitespace runs to one space, trim.
///
/// ```rust
/// assert_eq!(cleave::normalize("  Hello\n\t WORLD "), "hello world");
/// ```
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Score of a chunk as the home of `expected`. Both inputs must be normalized.
fn match_score(expected: &str, chunk: &str) -> f64 {
    if chunk.contains(expected) {
        return 1.0;
    }
    if expected.contains(chunk) {
        return ratio(chunk.chars().count(), expected.chars().count());
    }

    let expected_words: HashSet<&str> = expected.split(' ').collect();
    let chunk_words: Vec<&str> = chunk.split(' ').collect();
    let shared = chunk_words.iter().filter(|w| expected_words.contains(*w)).count();
    ratio(shared, expected_words.len().max(chunk_words.len()))
}

#[allow(clippy::cast_precision_loss)]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Best-scoring chunk for `expected_content`, with its score.
///
/// Chunks are scored in the given order; ties keep the earlier chunk.
/// Returns `None` for empty expected content, no chunks, or no chunk scoring
/// above zero.
///
/// ```rust
/// use cleave::find_best_chunk_match;
///
/// let chunks = ["Intro text.", "Employees  receive 25 VACATION days."];
/// let (index, score) = find_best_chunk_match("receive 25 vacation days", chunks).unwrap();
/// assert_eq!(index, 1);
/// assert_eq!(score, 1.0);
/// ```
pub fn find_best_chunk_match<'a>(
    expected_content: &str,
    chunks: impl IntoIterator<Item = &'a str>,
) -> Option<(usize, f64)> {
    let expected = normalize(expected_content);
    if expected.is_empty() {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for (index, content) in chunks.into_iter().enumerate() {
        let score = match_score(&expected, &normalize(content));
        if score >= 1.0 {
            return Some((index, 1.0));
        }
        if score > best.map_or(0.0, |(_, s)| s) {
            best = Some((index, score));
        }
    }
    best
}

/// Counts from one remap pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapSummary {
    /// Phrases pointed at a chunk.
    pub remapped: usize,
    /// Phrases left unresolved.
    pub failed: usize,
}

/// Remap every phrase that has a document and expected content.
///
/// Phrases without a match scoring at least [`REMAP_THRESHOLD`] have their
/// expected chunk cleared. Running twice without re-chunking in between
/// yields the same mapping.
///
/// # Errors
///
/// Propagates store errors.
pub async fn remap_phrases(store: &dyn Store) -> Result<RemapSummary> {
    let mut by_document: BTreeMap<DocumentId, Vec<_>> = BTreeMap::new();
    for phrase in store.phrases().await? {
        if !phrase.is_remappable() {
            continue;
        }
        if let Some(document) = phrase.document_id {
            by_document.entry(document).or_default().push(phrase);
        }
    }

    let mut summary = RemapSummary::default();
    for (document, phrases) in by_document {
        let chunks: Vec<StoredChunk> = store.chunks_for_document(document).await?;
        for phrase in phrases {
            let expected = phrase.expected_content.as_deref().unwrap_or_default();
            let found = find_best_chunk_match(expected, chunks.iter().map(|c| c.chunk.content.as_str()))
                .filter(|&(_, score)| score >= REMAP_THRESHOLD);

            match found {
                Some((index, score)) => {
                    let chunk = &chunks[index];
                    debug!(phrase = %phrase.id, chunk = chunk.chunk.chunk_index, score, "remapped");
                    store.set_expected_chunk(phrase.id, Some(chunk.id)).await?;
                    summary.remapped += 1;
                }
                None => {
                    warn!(phrase = %phrase.id, text = %phrase.phrase, "no chunk matches expected content");
                    store.set_expected_chunk(phrase.id, None).await?;
                    summary.failed += 1;
                }
            }
        }
    }
    Ok(summary)
}
