//! In-memory [`Store`] backed by a `parking_lot::RwLock`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{
    ChunkId, DocumentId, EvaluationRun, PhraseId, PhraseResult, RunId, SourceDocument, Store,
    StoredChunk, TestPhrase,
};
use crate::eval::RetrievalMetrics;
use crate::similarity::{rank_by_similarity, SimilarChunk};
use crate::{Chunk, ChunkConfig, Error, Result};

/// A corpus file: documents plus the phrases that test retrieval over them.
///
/// ```json
/// {
///   "documents": [{ "title": "Handbook", "content": "...", "pageBreaks": [1800, 3650] }],
///   "phrases": [{ "phrase": "how many vacation days", "document": "Handbook",
///                 "expectedContent": "Employees receive 25 days" }]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Corpus {
    /// Documents to chunk.
    pub documents: Vec<CorpusDocument>,
    /// Test phrases.
    #[serde(default)]
    pub phrases: Vec<CorpusPhrase>,
}

/// A document entry in a [`Corpus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusDocument {
    /// Title; phrases refer to documents by title.
    pub title: String,
    /// Full text.
    pub content: String,
    /// Page end offsets, if known.
    #[serde(default)]
    pub page_breaks: Vec<usize>,
}

/// A phrase entry in a [`Corpus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusPhrase {
    /// Query text.
    pub phrase: String,
    /// Optional grouping.
    #[serde(default)]
    pub category: Option<String>,
    /// Title of the document holding the answer.
    #[serde(default)]
    pub document: Option<String>,
    /// Text the correct chunk contains.
    #[serde(default)]
    pub expected_content: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredEmbedding {
    generation: u64,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
struct Inner {
    documents: Vec<SourceDocument>,
    generations: HashMap<DocumentId, u64>,
    chunks: HashMap<DocumentId, Vec<StoredChunk>>,
    chunk_owner: HashMap<ChunkId, DocumentId>,
    phrases: Vec<TestPhrase>,
    chunk_embeddings: HashMap<(ChunkId, String), StoredEmbedding>,
    phrase_embeddings: HashMap<(PhraseId, String), Vec<f32>>,
    runs: Vec<EvaluationRun>,
    results: HashMap<RunId, Vec<PhraseResult>>,
}

impl Inner {
    fn require_document(&self, id: DocumentId) -> Result<()> {
        if self.documents.iter().any(|d| d.id == id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("document {id}")))
        }
    }

    fn remove_chunks(&mut self, document: DocumentId) {
        let Some(old) = self.chunks.remove(&document) else {
            return;
        };
        for chunk in &old {
            self.chunk_owner.remove(&chunk.id);
        }
        let old: HashSet<ChunkId> = old.iter().map(|c| c.id).collect();
        self.chunk_embeddings
            .retain(|(chunk_id, _), _| !old.contains(chunk_id));
    }

    fn find_chunk(&self, id: ChunkId) -> Option<&StoredChunk> {
        let owner = self.chunk_owner.get(&id)?;
        self.chunks.get(owner)?.iter().find(|c| c.id == id)
    }

    fn run_mut(&mut self, id: RunId) -> Result<&mut EvaluationRun> {
        self.runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(format!("run {id}")))
    }
}

/// Thread-safe in-memory store.
///
/// Concurrent readers are cheap; writers are serialized by the lock. Two grid
/// searches over the same documents are not serialized against each other.
///
/// ```rust
/// use cleave::{Chunk, MemoryStore, Store};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// let doc = store.add_document("Notes", "One. Two.", vec![]);
/// let stored = store.replace_chunks(doc, vec![Chunk::new("One. Two.", 0, None)]).await.unwrap();
/// assert_eq!(stored[0].generation, 1);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a corpus, resolving phrase documents by title.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if a phrase names an unknown document.
    pub fn from_corpus(corpus: Corpus) -> Result<Self> {
        let store = Self::new();
        let mut by_title = HashMap::new();
        for doc in corpus.documents {
            let id = store.add_document(&doc.title, doc.content, doc.page_breaks);
            by_title.insert(doc.title, id);
        }
        for phrase in corpus.phrases {
            let document = match &phrase.document {
                Some(title) => Some(
                    *by_title
                        .get(title)
                        .ok_or_else(|| Error::NotFound(format!("document titled {title:?}")))?,
                ),
                None => None,
            };
            store.add_phrase(phrase.phrase, phrase.category, document, phrase.expected_content);
        }
        Ok(store)
    }

    /// Load a JSON [`Corpus`] file.
    ///
    /// # Errors
    ///
    /// Returns I/O and JSON errors, or [`Error::NotFound`] for dangling phrase
    /// document titles.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let corpus: Corpus = serde_json::from_str(&raw)?;
        Self::from_corpus(corpus)
    }

    /// Add a document and return its id.
    pub fn add_document(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
        page_breaks: Vec<usize>,
    ) -> DocumentId {
        let id = DocumentId::new();
        let mut inner = self.inner.write();
        inner.documents.push(SourceDocument {
            id,
            title: title.into(),
            content: content.into(),
            page_breaks,
        });
        inner.generations.insert(id, 0);
        id
    }

    /// Add a test phrase and return its id. Its expected chunk starts unresolved.
    pub fn add_phrase(
        &self,
        phrase: impl Into<String>,
        category: Option<String>,
        document_id: Option<DocumentId>,
        expected_content: Option<String>,
    ) -> PhraseId {
        let id = PhraseId::new();
        self.inner.write().phrases.push(TestPhrase {
            id,
            phrase: phrase.into(),
            category,
            document_id,
            expected_content,
            expected_chunk: None,
        });
        id
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn documents(&self) -> Result<Vec<SourceDocument>> {
        Ok(self.inner.read().documents.clone())
    }

    async fn replace_chunks(&self, document: DocumentId, chunks: Vec<Chunk>) -> Result<Vec<StoredChunk>> {
        let mut inner = self.inner.write();
        inner.require_document(document)?;
        inner.remove_chunks(document);

        let generation = {
            let g = inner.generations.entry(document).or_insert(0);
            *g += 1;
            *g
        };
        let stored: Vec<StoredChunk> = chunks
            .into_iter()
            .map(|chunk| StoredChunk {
                id: ChunkId::new(),
                document_id: document,
                generation,
                chunk,
            })
            .collect();
        for chunk in &stored {
            inner.chunk_owner.insert(chunk.id, document);
        }
        inner.chunks.insert(document, stored.clone());
        Ok(stored)
    }

    async fn delete_chunks(&self, document: DocumentId) -> Result<()> {
        let mut inner = self.inner.write();
        inner.require_document(document)?;
        inner.remove_chunks(document);
        Ok(())
    }

    async fn chunks_for_document(&self, document: DocumentId) -> Result<Vec<StoredChunk>> {
        let inner = self.inner.read();
        inner.require_document(document)?;
        let mut chunks = inner.chunks.get(&document).cloned().unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk.chunk_index);
        Ok(chunks)
    }

    async fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let inner = self.inner.read();
        let mut all = Vec::new();
        for doc in &inner.documents {
            if let Some(chunks) = inner.chunks.get(&doc.id) {
                let mut chunks = chunks.clone();
                chunks.sort_by_key(|c| c.chunk.chunk_index);
                all.extend(chunks);
            }
        }
        Ok(all)
    }

    async fn generation(&self, document: DocumentId) -> Result<u64> {
        let inner = self.inner.read();
        inner
            .generations
            .get(&document)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("document {document}")))
    }

    async fn phrases(&self) -> Result<Vec<TestPhrase>> {
        Ok(self.inner.read().phrases.clone())
    }

    async fn set_expected_chunk(&self, phrase: PhraseId, chunk: Option<ChunkId>) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(chunk) = chunk {
            if inner.find_chunk(chunk).is_none() {
                return Err(Error::NotFound(format!("chunk {chunk}")));
            }
        }
        let entry = inner
            .phrases
            .iter_mut()
            .find(|p| p.id == phrase)
            .ok_or_else(|| Error::NotFound(format!("phrase {phrase}")))?;
        entry.expected_chunk = chunk;
        Ok(())
    }

    async fn save_chunk_embeddings(&self, model_id: &str, embeddings: Vec<(ChunkId, Vec<f32>)>) -> Result<()> {
        let mut inner = self.inner.write();
        for (chunk_id, vector) in embeddings {
            let generation = inner
                .find_chunk(chunk_id)
                .map(|c| c.generation)
                .ok_or_else(|| Error::NotFound(format!("chunk {chunk_id}")))?;
            inner.chunk_embeddings.insert(
                (chunk_id, model_id.to_string()),
                StoredEmbedding { generation, vector },
            );
        }
        Ok(())
    }

    async fn save_phrase_embeddings(
        &self,
        model_id: &str,
        embeddings: Vec<(PhraseId, Vec<f32>)>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        for (phrase_id, vector) in embeddings {
            if !inner.phrases.iter().any(|p| p.id == phrase_id) {
                return Err(Error::NotFound(format!("phrase {phrase_id}")));
            }
            inner
                .phrase_embeddings
                .insert((phrase_id, model_id.to_string()), vector);
        }
        Ok(())
    }

    async fn phrase_embedding(&self, phrase: PhraseId, model_id: &str) -> Result<Option<Vec<f32>>> {
        Ok(self
            .inner
            .read()
            .phrase_embeddings
            .get(&(phrase, model_id.to_string()))
            .cloned())
    }

    async fn chunk_embeddings(&self, model_id: &str) -> Result<Vec<(StoredChunk, Vec<f32>)>> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for doc in &inner.documents {
            let current = inner.generations.get(&doc.id).copied().unwrap_or(0);
            let Some(chunks) = inner.chunks.get(&doc.id) else {
                continue;
            };
            for chunk in chunks {
                let key = (chunk.id, model_id.to_string());
                if let Some(embedding) = inner.chunk_embeddings.get(&key) {
                    if embedding.generation == current {
                        out.push((chunk.clone(), embedding.vector.clone()));
                    }
                }
            }
        }
        Ok(out)
    }

    async fn nearest_chunks(&self, query: &[f32], model_id: &str, top_k: usize) -> Result<Vec<SimilarChunk>> {
        let candidates = self.chunk_embeddings(model_id).await?;
        rank_by_similarity(query, candidates, top_k)
    }

    async fn create_run(
        &self,
        model_id: &str,
        config: ChunkConfig,
        total_chunks: usize,
        total_phrases: usize,
    ) -> Result<EvaluationRun> {
        let run = EvaluationRun {
            id: RunId::new(),
            model_id: model_id.to_string(),
            config,
            total_chunks,
            total_phrases,
            metrics: None,
            created_at: Utc::now(),
        };
        self.inner.write().runs.push(run.clone());
        Ok(run)
    }

    async fn record_results(&self, run: RunId, results: Vec<PhraseResult>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.run_mut(run)?;
        inner.results.entry(run).or_default().extend(results);
        Ok(())
    }

    async fn finish_run(&self, run: RunId, metrics: RetrievalMetrics) -> Result<EvaluationRun> {
        let mut inner = self.inner.write();
        let entry = inner.run_mut(run)?;
        if entry.metrics.is_some() {
            return Err(Error::RunAlreadyFinished(run.to_string()));
        }
        entry.metrics = Some(metrics);
        Ok(entry.clone())
    }

    async fn runs(&self) -> Result<Vec<EvaluationRun>> {
        Ok(self.inner.read().runs.clone())
    }

    async fn run_results(&self, run: RunId) -> Result<Vec<PhraseResult>> {
        let inner = self.inner.read();
        if !inner.runs.iter().any(|r| r.id == run) {
            return Err(Error::NotFound(format!("run {run}")));
        }
        Ok(inner.results.get(&run).cloned().unwrap_or_default())
    }
}
