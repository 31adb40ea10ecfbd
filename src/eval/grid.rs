//! Grid search over chunking configurations.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{
    embed_all, evaluate, rechunk_all, CancelToken, EventSink, GridEvent, PhraseDetail, RetrievalMetrics,
    DEFAULT_TOP_K,
};
use crate::embedding::{Embedder, EMBED_BATCH_SIZE};
use crate::remap::remap_phrases;
use crate::similarity::RetrievalMode;
use crate::store::{RunId, Store};
use crate::{ChunkConfig, ChunkStrategy, Error, Result, SemanticChunker};

/// The axes of a grid search.
///
/// ```rust
/// use cleave::{ChunkStrategy, GridSpec};
///
/// let spec = GridSpec {
///     chunk_sizes: vec![100, 200],
///     overlaps: vec![0, 30, 150],
///     strategies: vec![ChunkStrategy::Sentence],
/// };
/// let configs = spec.configurations().unwrap();
///
/// // 150 >= 100 is skipped for size 100
/// assert_eq!(configs.len(), 5);
/// assert_eq!(configs[0].label(), "100t / 0o / sentence");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSpec {
    /// Target sizes in tokens.
    pub chunk_sizes: Vec<usize>,
    /// Overlaps in tokens.
    pub overlaps: Vec<usize>,
    /// Strategies to compare.
    pub strategies: Vec<ChunkStrategy>,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            chunk_sizes: vec![100, 200, 300, 500],
            overlaps: vec![0, 30, 60],
            strategies: vec![ChunkStrategy::Sentence],
        }
    }
}

impl GridSpec {
    /// Valid configurations in size x overlap x strategy order.
    ///
    /// Zero sizes and overlaps not smaller than the size are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoValidConfigurations`] if nothing remains.
    pub fn configurations(&self) -> Result<Vec<ChunkConfig>> {
        let mut configs = Vec::new();
        for &size in &self.chunk_sizes {
            for &overlap in &self.overlaps {
                for &strategy in &self.strategies {
                    if let Ok(config) = ChunkConfig::new(size, overlap, strategy) {
                        configs.push(config);
                    }
                }
            }
        }
        if configs.is_empty() {
            return Err(Error::NoValidConfigurations);
        }
        Ok(configs)
    }
}

/// The evaluation of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridResult {
    /// The configuration.
    pub config: ChunkConfig,
    /// Its metrics.
    pub metrics: RetrievalMetrics,
    /// The persisted run.
    pub run_id: RunId,
    /// Chunks at evaluation time.
    pub total_chunks: usize,
    /// Ground-truthed phrases scored.
    pub total_phrases: usize,
    /// Per-phrase reports.
    pub details: Vec<PhraseDetail>,
}

/// The configuration a grid search recommends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// The configuration.
    pub config: ChunkConfig,
    /// Its metrics.
    pub metrics: RetrievalMetrics,
    /// Its run.
    pub run_id: RunId,
}

/// Everything a grid search produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridOutcome {
    /// Completed configurations, in grid order.
    pub results: Vec<GridResult>,
    /// Best of `results`.
    pub recommendation: Option<Recommendation>,
    /// Whether the search stopped early.
    pub cancelled: bool,
}

/// Orders results best first: Hit@1 desc, then MRR desc, then smaller chunks.
fn by_quality(a: &GridResult, b: &GridResult) -> Ordering {
    b.metrics
        .hit_at_1
        .total_cmp(&a.metrics.hit_at_1)
        .then_with(|| b.metrics.mrr.total_cmp(&a.metrics.mrr))
        .then_with(|| a.config.target_tokens().cmp(&b.config.target_tokens()))
}

/// Pick the best result: highest Hit@1, then highest MRR, then smallest
/// chunk size. Full ties keep grid order.
#[must_use]
pub fn recommend(results: &[GridResult]) -> Option<Recommendation> {
    results.iter().min_by(|a, b| by_quality(a, b)).map(|best| Recommendation {
        config: best.config,
        metrics: best.metrics,
        run_id: best.run_id,
    })
}

/// Runs configurations one after another against a shared store.
///
/// Each configuration replaces every document's chunks, so two searches must
/// not run over the same store at once.
///
/// ```rust,ignore
/// let search = GridSearch::new(store, embedder).with_top_k(5);
/// let (tx, mut rx) = tokio::sync::mpsc::channel(64);
/// let outcome = search.run(&GridSpec::default(), tx, CancelToken::new()).await?;
/// ```
pub struct GridSearch {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    semantic: SemanticChunker,
    batch_size: usize,
    top_k: usize,
    retrieval: RetrievalMode,
}

impl GridSearch {
    /// A search with batch size 50, top-k 5, and full-vector retrieval.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>) -> Self {
        let semantic = SemanticChunker::new(Arc::clone(&embedder));
        Self {
            store,
            embedder,
            semantic,
            batch_size: EMBED_BATCH_SIZE,
            top_k: DEFAULT_TOP_K,
            retrieval: RetrievalMode::Nearest,
        }
    }

    /// Texts per embedding request.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Results retrieved per phrase.
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Retrieval path used during evaluation.
    #[must_use]
    pub fn with_retrieval(mut self, retrieval: RetrievalMode) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Chunker used for the semantic strategy.
    #[must_use]
    pub fn with_semantic(mut self, semantic: SemanticChunker) -> Self {
        self.semantic = semantic;
        self
    }

    /// Run every configuration of `spec`, streaming progress to `events`.
    ///
    /// Stops between units of work once `cancel` is set or the receiver is
    /// dropped; runs completed before that stay persisted and are returned
    /// with `cancelled = true`. No `Complete` event is sent after a
    /// cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoValidConfigurations`] before any work, and
    /// [`Error::NoGroundTruth`] (or a store or provider error) from the
    /// configuration where it occurred. Errors are also sent as
    /// [`GridEvent::Error`].
    pub async fn run(
        &self,
        spec: &GridSpec,
        events: mpsc::Sender<GridEvent>,
        cancel: CancelToken,
    ) -> Result<GridOutcome> {
        let sink = EventSink::new(events, cancel);
        match self.run_inner(spec, &sink).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "grid search failed");
                sink.send(GridEvent::Error { message: e.to_string() }).await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, spec: &GridSpec, sink: &EventSink) -> Result<GridOutcome> {
        let configs = spec.configurations()?;
        let total = configs.len();
        let model_id = self.embedder.model().name().to_string();
        let mut results = Vec::with_capacity(total);

        for (i, config) in configs.into_iter().enumerate() {
            if sink.is_cancelled() {
                break;
            }
            let label = config.label();
            let step = sink.labelled(&label);
            sink.send(GridEvent::ConfigStarted {
                current: i + 1,
                total,
                config,
            })
            .await;

            step.progress("rechunking documents").await;
            let chunks = rechunk_all(self.store.as_ref(), config, Some(&self.semantic), &step).await?;
            step.progress(format!("{chunks} chunks created")).await;
            if sink.is_cancelled() {
                break;
            }

            let remap = remap_phrases(self.store.as_ref()).await?;
            let failed = if remap.failed > 0 {
                format!(", {} failed", remap.failed)
            } else {
                String::new()
            };
            step.progress(format!("{} phrases remapped{failed}", remap.remapped)).await;

            step.progress("embedding").await;
            embed_all(self.store.as_ref(), self.embedder.as_ref(), self.batch_size, &step).await?;
            if sink.is_cancelled() {
                break;
            }

            step.progress("evaluating").await;
            let Some(evaluation) = evaluate(
                self.store.as_ref(),
                &model_id,
                config,
                self.retrieval,
                self.top_k,
                &step,
            )
            .await?
            else {
                break;
            };

            let result = GridResult {
                config,
                metrics: evaluation.metrics,
                run_id: evaluation.run.id,
                total_chunks: evaluation.run.total_chunks,
                total_phrases: evaluation.run.total_phrases,
                details: evaluation.details,
            };
            info!(
                config = %label,
                hit_at_1 = result.metrics.hit_at_1,
                mrr = result.metrics.mrr,
                "configuration finished"
            );
            sink.send(GridEvent::Result(result.clone())).await;
            results.push(result);
        }

        let recommendation = recommend(&results);
        let cancelled = sink.is_cancelled();
        if !cancelled {
            sink.send(GridEvent::Complete {
                results: results.clone(),
                recommendation: recommendation.clone(),
            })
            .await;
        }
        Ok(GridOutcome {
            results,
            recommendation,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(size: usize, hit_at_1: f64, mrr: f64) -> GridResult {
        GridResult {
            config: ChunkConfig::new(size, 0, ChunkStrategy::Sentence).unwrap(),
            metrics: RetrievalMetrics {
                hit_at_1,
                mrr,
                ..RetrievalMetrics::default()
            },
            run_id: RunId::new(),
            total_chunks: 0,
            total_phrases: 0,
            details: vec![],
        }
    }

    #[test]
    fn test_recommend_prefers_hit_at_1_then_mrr_then_size() {
        let results = [result(300, 0.5, 0.9), result(200, 0.6, 0.6), result(100, 0.6, 0.7)];
        assert_eq!(recommend(&results).unwrap().config.target_tokens(), 100);

        let results = [result(300, 0.6, 0.7), result(200, 0.6, 0.7)];
        assert_eq!(recommend(&results).unwrap().config.target_tokens(), 200);

        assert!(recommend(&[]).is_none());
    }

    #[test]
    fn test_grid_order_and_skips() {
        let spec = GridSpec {
            chunk_sizes: vec![0, 100, 200],
            overlaps: vec![0, 100],
            strategies: vec![ChunkStrategy::Sentence, ChunkStrategy::Recursive],
        };
        let labels: Vec<String> = spec.configurations().unwrap().iter().map(ChunkConfig::label).collect();
        assert_eq!(
            labels,
            [
                "100t / 0o / sentence",
                "100t / 0o / recursive",
                "200t / 0o / sentence",
                "200t / 0o / recursive",
                "200t / 100o / sentence",
                "200t / 100o / recursive",
            ]
        );
    }

    #[test]
    fn test_no_valid_configurations() {
        let spec = GridSpec {
            chunk_sizes: vec![50],
            overlaps: vec![50, 60],
            strategies: vec![ChunkStrategy::Sentence],
        };
        assert!(matches!(spec.configurations(), Err(Error::NoValidConfigurations)));
    }
}
