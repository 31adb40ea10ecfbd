//! Persistence boundary for documents, chunks, phrases, embeddings, and runs.
//!
//! The evaluation pipeline only talks to a [`Store`]. [`MemoryStore`] is the
//! bundled implementation; a database-backed store implements the same trait.
//!
//! ## Generations
//!
//! Every [`Store::replace_chunks`] on a document bumps that document's
//! generation. Embeddings remember the generation of the chunk they were
//! computed from, and retrieval only returns embeddings whose generation is
//! current:
//!
//! ```text
//! replace_chunks(doc)   gen 1  -> chunks c1..c4
//! save_chunk_embeddings        -> (c1, gen 1) ... (c4, gen 1)
//! replace_chunks(doc)   gen 2  -> chunks c5..c7
//! nearest_chunks               -> c5..c7 only once re-embedded; gen-1 vectors never surface
//! ```

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::eval::RetrievalMetrics;
use crate::similarity::SimilarChunk;
use crate::{Chunk, ChunkConfig, Result};

pub use memory::{Corpus, CorpusDocument, CorpusPhrase, MemoryStore};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_id!(
    /// Identifies a [`SourceDocument`].
    DocumentId
);
define_id!(
    /// Identifies a [`StoredChunk`].
    ChunkId
);
define_id!(
    /// Identifies a [`TestPhrase`].
    PhraseId
);
define_id!(
    /// Identifies an [`EvaluationRun`].
    RunId
);

/// A document whose text is chunked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    /// Document id.
    pub id: DocumentId,
    /// Human-readable title.
    pub title: String,
    /// Full extracted text.
    pub content: String,
    /// Sorted character offsets where each page ends (empty if unknown).
    #[serde(default)]
    pub page_breaks: Vec<usize>,
}

/// A chunk persisted for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChunk {
    /// Chunk id; new on every re-chunk.
    pub id: ChunkId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Document generation this chunk belongs to.
    pub generation: u64,
    /// Content and position.
    #[serde(flatten)]
    pub chunk: Chunk,
}

/// A query with a known answer location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPhrase {
    /// Phrase id.
    pub id: PhraseId,
    /// The query text.
    pub phrase: String,
    /// Free-form grouping (e.g. "factual", "paraphrase").
    pub category: Option<String>,
    /// Document the answer lives in.
    pub document_id: Option<DocumentId>,
    /// Text the correct chunk should contain.
    pub expected_content: Option<String>,
    /// The chunk currently holding the answer, if resolved.
    pub expected_chunk: Option<ChunkId>,
}

impl TestPhrase {
    /// Whether this phrase can be remapped after a re-chunk.
    #[must_use]
    pub fn is_remappable(&self) -> bool {
        self.document_id.is_some() && self.expected_content.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Outcome of retrieving one phrase in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseResult {
    /// The phrase.
    pub phrase_id: PhraseId,
    /// The chunk that should have been retrieved.
    pub expected_chunk: ChunkId,
    /// Retrieved chunk ids, best first.
    pub retrieved: Vec<ChunkId>,
    /// Similarities aligned with `retrieved`.
    pub similarities: Vec<f32>,
    /// 1-based rank of the expected chunk, if retrieved.
    pub expected_rank: Option<usize>,
    /// Whether the expected chunk was retrieved at all.
    pub hit: bool,
}

/// One evaluated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRun {
    /// Run id.
    pub id: RunId,
    /// Embedding model the run used.
    pub model_id: String,
    /// Chunking configuration under test.
    pub config: ChunkConfig,
    /// Chunks across all documents at evaluation time.
    pub total_chunks: usize,
    /// Ground-truthed phrases scored.
    pub total_phrases: usize,
    /// Aggregate metrics; `None` until the run is finished.
    pub metrics: Option<RetrievalMetrics>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
}

/// Storage operations the pipeline needs.
///
/// Embeddings are keyed by `(chunk or phrase, model id)`. Saving an embedding
/// for an existing key replaces it.
#[async_trait]
pub trait Store: Send + Sync {
    /// All documents, in insertion order.
    async fn documents(&self) -> Result<Vec<SourceDocument>>;

    /// Delete a document's chunks (and their embeddings), insert `chunks`, and
    /// bump the document's generation.
    async fn replace_chunks(&self, document: DocumentId, chunks: Vec<Chunk>) -> Result<Vec<StoredChunk>>;

    /// Delete a document's chunks and their embeddings.
    async fn delete_chunks(&self, document: DocumentId) -> Result<()>;

    /// A document's chunks ordered by index.
    async fn chunks_for_document(&self, document: DocumentId) -> Result<Vec<StoredChunk>>;

    /// Every chunk, grouped by document, ordered by index.
    async fn all_chunks(&self) -> Result<Vec<StoredChunk>>;

    /// Current generation of a document's chunk set (0 before the first chunking).
    async fn generation(&self, document: DocumentId) -> Result<u64>;

    /// All test phrases, in insertion order.
    async fn phrases(&self) -> Result<Vec<TestPhrase>>;

    /// Point a phrase at a chunk, or clear its expected chunk.
    async fn set_expected_chunk(&self, phrase: PhraseId, chunk: Option<ChunkId>) -> Result<()>;

    /// Upsert chunk embeddings for a model, tagged with each chunk's generation.
    async fn save_chunk_embeddings(&self, model_id: &str, embeddings: Vec<(ChunkId, Vec<f32>)>) -> Result<()>;

    /// Upsert phrase embeddings for a model.
    async fn save_phrase_embeddings(&self, model_id: &str, embeddings: Vec<(PhraseId, Vec<f32>)>)
        -> Result<()>;

    /// A phrase's embedding for a model.
    async fn phrase_embedding(&self, phrase: PhraseId, model_id: &str) -> Result<Option<Vec<f32>>>;

    /// Every current-generation chunk embedding for a model.
    async fn chunk_embeddings(&self, model_id: &str) -> Result<Vec<(StoredChunk, Vec<f32>)>>;

    /// The `top_k` current-generation chunks closest to `query` by cosine distance.
    async fn nearest_chunks(&self, query: &[f32], model_id: &str, top_k: usize) -> Result<Vec<SimilarChunk>>;

    /// Create an unfinished run.
    async fn create_run(
        &self,
        model_id: &str,
        config: ChunkConfig,
        total_chunks: usize,
        total_phrases: usize,
    ) -> Result<EvaluationRun>;

    /// Attach per-phrase results to a run.
    async fn record_results(&self, run: RunId, results: Vec<PhraseResult>) -> Result<()>;

    /// Set a run's metrics. A run can be finished once; a second call is
    /// [`Error::RunAlreadyFinished`](crate::Error::RunAlreadyFinished).
    async fn finish_run(&self, run: RunId, metrics: RetrievalMetrics) -> Result<EvaluationRun>;

    /// All runs, oldest first.
    async fn runs(&self) -> Result<Vec<EvaluationRun>>;

    /// Per-phrase results of a run.
    async fn run_results(&self, run: RunId) -> Result<Vec<PhraseResult>>;
}
