//! Re-chunking and embedding steps of an evaluation run.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::EventSink;
use crate::embedding::{check_count, Embedder, EmbeddingRole};
use crate::store::Store;
use crate::{chunk_text, ChunkConfig, Error, Result, SemanticChunker};

/// Re-chunk every document with `config`, replacing its chunk set.
///
/// `semantic` is required when the strategy is semantic; the check happens
/// before any document is touched. Returns the number of chunks created.
/// On cancellation the documents processed so far keep their new chunks.
///
/// # Errors
///
/// Returns [`Error::EmbedderRequired`] for a semantic config without a
/// semantic chunker, and propagates store and embedding errors.
pub async fn rechunk_all(
    store: &dyn Store,
    config: ChunkConfig,
    semantic: Option<&SemanticChunker>,
    sink: &EventSink,
) -> Result<usize> {
    if config.strategy().needs_embedder() && semantic.is_none() {
        return Err(Error::EmbedderRequired);
    }

    let mut total = 0;
    for document in store.documents().await? {
        if sink.is_cancelled() {
            break;
        }
        let chunks = match semantic.filter(|_| config.strategy().needs_embedder()) {
            Some(chunker) => {
                chunker
                    .chunk_with_config(&document.content, &document.page_breaks, &config)
                    .await?
            }
            None => chunk_text(&document.content, &document.page_breaks, &config)?,
        };
        debug!(document = %document.id, chunks = chunks.len(), "rechunked");
        total += chunks.len();
        store.replace_chunks(document.id, chunks).await?;
    }
    Ok(total)
}

/// Counts from [`embed_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedSummary {
    /// Chunks embedded and saved.
    pub chunks: usize,
    /// Phrases embedded and saved.
    pub phrases: usize,
    /// Batches that failed and were skipped.
    pub failed_batches: usize,
}

/// Embed every chunk (as documents) and every phrase (as queries) for the
/// embedder's model, in sequential batches.
///
/// A failing batch (provider error, wrong vector count or length) is logged,
/// reported as progress, and skipped; its items simply have no embedding.
///
/// # Errors
///
/// Propagates errors loading chunks or phrases.
pub async fn embed_all(
    store: &dyn Store,
    embedder: &dyn Embedder,
    batch_size: usize,
    sink: &EventSink,
) -> Result<EmbedSummary> {
    let model_id = embedder.model().name().to_string();
    let batch_size = batch_size.max(1);
    let mut summary = EmbedSummary::default();

    let chunks = store.all_chunks().await?;
    let mut done = 0;
    for batch in chunks.chunks(batch_size) {
        if sink.is_cancelled() {
            return Ok(summary);
        }
        let texts: Vec<String> = batch.iter().map(|c| c.chunk.content.clone()).collect();
        let saved: Result<()> = async {
            let vectors = embedder.embed(&texts, EmbeddingRole::Document).await?;
            check_count(texts.len(), vectors.len())?;
            let pairs = batch.iter().map(|c| c.id).zip(vectors).collect();
            store.save_chunk_embeddings(&model_id, pairs).await
        }
        .await;

        match saved {
            Ok(()) => summary.chunks += batch.len(),
            Err(e) => {
                warn!(error = %e, "chunk batch failed, skipping");
                summary.failed_batches += 1;
                sink.progress(format!("chunk batch failed: {e}")).await;
            }
        }
        done += batch.len();
        sink.progress(format!("embedding chunks: {done}/{}", chunks.len())).await;
    }

    let phrases = store.phrases().await?;
    for batch in phrases.chunks(batch_size) {
        if sink.is_cancelled() {
            return Ok(summary);
        }
        let texts: Vec<String> = batch.iter().map(|p| p.phrase.clone()).collect();
        let saved: Result<()> = async {
            let vectors = embedder.embed(&texts, EmbeddingRole::Query).await?;
            check_count(texts.len(), vectors.len())?;
            let pairs = batch.iter().map(|p| p.id).zip(vectors).collect();
            store.save_phrase_embeddings(&model_id, pairs).await
        }
        .await;

        match saved {
            Ok(()) => summary.phrases += batch.len(),
            Err(e) => {
                warn!(error = %e, "phrase batch failed, skipping");
                summary.failed_batches += 1;
                sink.progress(format!("phrase batch failed: {e}")).await;
            }
        }
    }

    debug!(?summary, model = %model_id, "embedded");
    Ok(summary)
}
