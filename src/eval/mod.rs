//! Retrieval evaluation and chunking grid search.
//!
//! ## Pipeline
//!
//! Each configuration of a grid runs the same four steps against the store:
//!
//! ```text
//! rechunk_all ──> remap_phrases ──> embed_all ──> evaluate
//!  new chunk      re-point phrase   chunk + phrase  top-k retrieval,
//!  sets (gen+1)   ground truth      vectors         one persisted run
//! ```
//!
//! The steps are public so a caller can rechunk or evaluate on its own.
//!
//! ## Metrics
//!
//! For each ground-truthed phrase the expected chunk's 1-based rank `r` in the
//! top-k results is recorded (or "missed"):
//!
//! | Metric | Per phrase | Aggregate |
//! |--------|-----------|-----------|
//! | Hit@k | `r <= k` | fraction of phrases |
//! | MRR | `1 / r` (0 on miss) | mean |
//! | nDCG | `1 / log2(r + 1)` (0 on miss) | mean |
//! | Avg similarity | top-1 similarity, hit or not | mean |
//!
//! Aggregates divide by every ground-truthed phrase. A phrase whose embedding
//! is missing (its batch failed) counts as a miss with similarity 0.

mod event;
mod grid;
mod pipeline;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::similarity::RetrievalMode;
use crate::store::{EvaluationRun, PhraseResult, Store};
use crate::{ChunkConfig, Error, Result};

pub use event::{CancelToken, EventSink, GridEvent};
pub use grid::{recommend, GridOutcome, GridResult, GridSearch, GridSpec, Recommendation};
pub use pipeline::{embed_all, rechunk_all, EmbedSummary};

/// Results retrieved per phrase.
pub const DEFAULT_TOP_K: usize = 5;

/// Aggregate retrieval quality of one configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalMetrics {
    /// Mean top-1 similarity.
    pub avg_similarity: f64,
    /// Fraction of phrases whose expected chunk ranked first.
    pub hit_at_1: f64,
    /// Fraction ranked in the top 3.
    pub hit_at_3: f64,
    /// Fraction ranked in the top 5.
    pub hit_at_5: f64,
    /// Mean reciprocal rank.
    pub mrr: f64,
    /// Mean normalized discounted cumulative gain (single relevant chunk).
    pub ndcg: f64,
}

/// Running sums for [`RetrievalMetrics`].
///
/// ```rust
/// use cleave::MetricsAccumulator;
///
/// let mut acc = MetricsAccumulator::default();
/// acc.record(Some(1), Some(0.9));
/// acc.record(Some(2), Some(0.7));
/// acc.record(None, Some(0.5));
///
/// let m = acc.finish(3);
/// assert!((m.hit_at_1 - 1.0 / 3.0).abs() < 1e-9);
/// assert!((m.mrr - 0.5).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    hits_1: usize,
    hits_3: usize,
    hits_5: usize,
    reciprocal_rank: f64,
    ndcg: f64,
    similarity: f64,
}

impl MetricsAccumulator {
    /// Record one phrase: the expected chunk's 1-based rank (if retrieved) and
    /// the top-1 similarity (if anything was retrieved).
    pub fn record(&mut self, rank: Option<usize>, top_similarity: Option<f32>) {
        if let Some(rank) = rank.filter(|&r| r > 0) {
            if rank <= 1 {
                self.hits_1 += 1;
            }
            if rank <= 3 {
                self.hits_3 += 1;
            }
            if rank <= 5 {
                self.hits_5 += 1;
            }
            #[allow(clippy::cast_precision_loss)]
            let r = rank as f64;
            self.reciprocal_rank += 1.0 / r;
            self.ndcg += 1.0 / (r + 1.0).log2();
        }
        if let Some(similarity) = top_similarity {
            self.similarity += f64::from(similarity);
        }
    }

    /// Averages over `n` phrases (all zero when `n == 0`).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(&self, n: usize) -> RetrievalMetrics {
        if n == 0 {
            return RetrievalMetrics::default();
        }
        let n = n as f64;
        RetrievalMetrics {
            avg_similarity: self.similarity / n,
            hit_at_1: self.hits_1 as f64 / n,
            hit_at_3: self.hits_3 as f64 / n,
            hit_at_5: self.hits_5 as f64 / n,
            mrr: self.reciprocal_rank / n,
            ndcg: self.ndcg / n,
        }
    }
}

/// A retrieved chunk as shown in a phrase report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    /// Index within its document.
    pub chunk_index: usize,
    /// Chunk text.
    pub content: String,
    /// Title of the owning document.
    pub source_title: String,
    /// Similarity to the phrase.
    pub similarity: f32,
    /// Whether this is the phrase's expected chunk.
    pub is_expected: bool,
}

/// Human-readable per-phrase outcome streamed with each result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseDetail {
    /// Query text.
    pub phrase: String,
    /// Phrase category.
    pub category: Option<String>,
    /// The chunk that should have been retrieved.
    pub expected: Option<RetrievedChunk>,
    /// What was retrieved, best first.
    pub retrieved: Vec<RetrievedChunk>,
    /// 1-based rank of the expected chunk.
    pub expected_rank: Option<usize>,
    /// Whether the expected chunk was retrieved.
    pub hit: bool,
}

/// A finished evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// The persisted run, with metrics.
    pub run: EvaluationRun,
    /// Aggregate metrics.
    pub metrics: RetrievalMetrics,
    /// Per-phrase reports, in phrase order.
    pub details: Vec<PhraseDetail>,
}

/// Score retrieval for every phrase with an expected chunk, then persist one
/// run with its per-phrase results.
///
/// Nothing is persisted until every phrase is scored, so a cancelled
/// evaluation (`Ok(None)`) leaves no partial run behind.
///
/// # Errors
///
/// Returns [`Error::NoGroundTruth`] if no phrase has an expected chunk, and
/// propagates store and dimension errors.
pub async fn evaluate(
    store: &dyn Store,
    model_id: &str,
    config: ChunkConfig,
    retrieval: RetrievalMode,
    top_k: usize,
    sink: &EventSink,
) -> Result<Option<Evaluation>> {
    let phrases: Vec<_> = store
        .phrases()
        .await?
        .into_iter()
        .filter(|p| p.expected_chunk.is_some())
        .collect();
    if phrases.is_empty() {
        return Err(Error::NoGroundTruth);
    }

    let titles: HashMap<_, _> = store
        .documents()
        .await?
        .into_iter()
        .map(|d| (d.id, d.title))
        .collect();
    let chunks: HashMap<_, _> = store
        .all_chunks()
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();
    let describe = |chunk: &crate::store::StoredChunk, similarity: f32, is_expected: bool| RetrievedChunk {
        chunk_index: chunk.chunk.chunk_index,
        content: chunk.chunk.content.clone(),
        source_title: titles.get(&chunk.document_id).cloned().unwrap_or_default(),
        similarity,
        is_expected,
    };

    let total = phrases.len();
    let mut acc = MetricsAccumulator::default();
    let mut results = Vec::with_capacity(total);
    let mut details = Vec::with_capacity(total);

    for (i, phrase) in phrases.iter().enumerate() {
        if sink.is_cancelled() {
            debug!(scored = i, total, "evaluation cancelled");
            return Ok(None);
        }
        let Some(expected) = phrase.expected_chunk else {
            continue;
        };

        let Some(query) = store.phrase_embedding(phrase.id, model_id).await? else {
            debug!(phrase = %phrase.id, "no embedding, counted as miss");
            acc.record(None, None);
            continue;
        };

        let similar = retrieval.retrieve(store, &query, model_id, top_k).await?;
        let rank = similar
            .iter()
            .position(|s| s.chunk.id == expected)
            .map(|p| p + 1);
        acc.record(rank, similar.first().map(|s| s.similarity));

        results.push(PhraseResult {
            phrase_id: phrase.id,
            expected_chunk: expected,
            retrieved: similar.iter().map(|s| s.chunk.id).collect(),
            similarities: similar.iter().map(|s| s.similarity).collect(),
            expected_rank: rank,
            hit: rank.is_some(),
        });
        details.push(PhraseDetail {
            phrase: phrase.phrase.clone(),
            category: phrase.category.clone(),
            expected: chunks.get(&expected).map(|c| describe(c, 0.0, true)),
            retrieved: similar
                .iter()
                .map(|s| describe(&s.chunk, s.similarity, s.chunk.id == expected))
                .collect(),
            expected_rank: rank,
            hit: rank.is_some(),
        });

        if (i + 1) % 5 == 0 || i + 1 == total {
            sink.progress(format!("evaluated {}/{total} phrases", i + 1)).await;
        }
    }

    let metrics = acc.finish(total);
    let run = store.create_run(model_id, config, chunks.len(), total).await?;
    store.record_results(run.id, results).await?;
    let run = store.finish_run(run.id, metrics).await?;

    info!(
        config = %config.label(),
        hit_at_1 = metrics.hit_at_1,
        mrr = metrics.mrr,
        phrases = total,
        "evaluation finished"
    );
    Ok(Some(Evaluation { run, metrics, details }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_at_k_thresholds() {
        let mut acc = MetricsAccumulator::default();
        acc.record(Some(3), Some(0.5));
        let m = acc.finish(1);
        assert_eq!(m.hit_at_1, 0.0);
        assert_eq!(m.hit_at_3, 1.0);
        assert_eq!(m.hit_at_5, 1.0);
        assert!((m.mrr - 1.0 / 3.0).abs() < 1e-9);
        assert!((m.ndcg - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_miss_keeps_similarity() {
        let mut acc = MetricsAccumulator::default();
        acc.record(None, Some(0.8));
        let m = acc.finish(2);
        assert_eq!(m.hit_at_5, 0.0);
        assert!((m.avg_similarity - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_finish_zero() {
        assert_eq!(MetricsAccumulator::default().finish(0), RetrievalMetrics::default());
    }

    #[test]
    fn test_rank_one_is_perfect() {
        let mut acc = MetricsAccumulator::default();
        acc.record(Some(1), Some(1.0));
        let m = acc.finish(1);
        assert_eq!((m.hit_at_1, m.mrr, m.ndcg), (1.0, 1.0, 1.0));
    }
}
