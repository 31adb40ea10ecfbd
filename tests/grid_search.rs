//! End-to-end grid search over an in-memory corpus.
//!
//! Uses a keyword embedder so retrieval is deterministic: a text's vector
//! points at whichever keyword it mentions most.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cleave::{
    recommend, CancelToken, ChunkStrategy, Corpus, CorpusDocument, CorpusPhrase, Embedder,
    EmbeddingModelConfig, EmbeddingRole, Error, GridEvent, GridSearch, GridSpec, MemoryStore,
    Provider, RetrievalMode, Store,
};
use tokio::sync::mpsc;

const KEYWORDS: [&str; 2] = ["cat", "rocket"];

struct KeywordEmbedder {
    model: EmbeddingModelConfig,
    calls: AtomicUsize,
    fail_first_call: bool,
}

impl KeywordEmbedder {
    fn new() -> Self {
        let model = EmbeddingModelConfig::builder("keyword", Provider::Local, KEYWORDS.len() + 1)
            .build()
            .unwrap();
        Self {
            model,
            calls: AtomicUsize::new(0),
            fail_first_call: false,
        }
    }

    /// First request answers with vectors of the wrong length.
    fn failing_once() -> Self {
        Self {
            fail_first_call: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: &[String], _role: EmbeddingRole) -> cleave::Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 && self.fail_first_call {
            return Err(Error::DimensionMismatch {
                left: KEYWORDS.len() + 1,
                right: KEYWORDS.len(),
            });
        }
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let counts: Vec<usize> = KEYWORDS.iter().map(|k| lower.matches(k).count()).collect();
                let mut v = vec![0.0; KEYWORDS.len() + 1];
                let best = counts.iter().copied().max().unwrap_or(0);
                if best > 0 {
                    v[counts.iter().position(|&c| c == best).unwrap()] = 1.0;
                }
                v[KEYWORDS.len()] = 0.01;
                v
            })
            .collect())
    }

    fn model(&self) -> &EmbeddingModelConfig {
        &self.model
    }
}

fn corpus(with_ground_truth: bool) -> Corpus {
    let expected = |text: &str| with_ground_truth.then(|| text.to_string());
    Corpus {
        documents: vec![
            CorpusDocument {
                title: "Pets".into(),
                content: "A cat sleeps most of the day. The cat purrs when content. \
                          Feed the cat twice daily."
                    .into(),
                page_breaks: vec![],
            },
            CorpusDocument {
                title: "Launch".into(),
                content: "The rocket stands on the pad. Fuel loads into the rocket. \
                          The rocket lifts off at dawn."
                    .into(),
                page_breaks: vec![],
            },
        ],
        phrases: vec![
            CorpusPhrase {
                phrase: "why does my cat purr".into(),
                category: Some("pets".into()),
                document: Some("Pets".into()),
                expected_content: expected("The cat purrs when content."),
            },
            CorpusPhrase {
                phrase: "when does the rocket launch".into(),
                category: Some("space".into()),
                document: Some("Launch".into()),
                expected_content: expected("The rocket lifts off at dawn."),
            },
        ],
    }
}

fn spec() -> GridSpec {
    GridSpec {
        chunk_sizes: vec![100, 200],
        overlaps: vec![0, 30],
        strategies: vec![ChunkStrategy::Sentence],
    }
}

fn setup(with_ground_truth: bool) -> (Arc<MemoryStore>, GridSearch) {
    setup_with(with_ground_truth, KeywordEmbedder::new())
}

fn setup_with(with_ground_truth: bool, embedder: KeywordEmbedder) -> (Arc<MemoryStore>, GridSearch) {
    let store = Arc::new(MemoryStore::from_corpus(corpus(with_ground_truth)).unwrap());
    let search = GridSearch::new(store.clone(), Arc::new(embedder)).with_top_k(5);
    (store, search)
}

async fn drain(mut rx: mpsc::Receiver<GridEvent>) -> Vec<GridEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn grid_search_runs_every_configuration() {
    let (store, search) = setup(true);
    let (tx, rx) = mpsc::channel(1024);

    let outcome = search.run(&spec(), tx, CancelToken::new()).await.unwrap();
    let events = drain(rx).await;

    assert!(!outcome.cancelled);
    let labels: Vec<String> = outcome.results.iter().map(|r| r.config.label()).collect();
    assert_eq!(
        labels,
        [
            "100t / 0o / sentence",
            "100t / 30o / sentence",
            "200t / 0o / sentence",
            "200t / 30o / sentence",
        ]
    );
    for result in &outcome.results {
        assert_eq!(result.total_phrases, 2);
        assert_eq!(result.metrics.hit_at_1, 1.0, "{}", result.config.label());
        assert_eq!(result.details.len(), 2);
    }

    // Every result ties on quality, so the smallest size wins and the first
    // in grid order breaks the remaining tie.
    let recommendation = outcome.recommendation.unwrap();
    assert_eq!(recommendation.config.label(), "100t / 0o / sentence");
    assert_eq!(recommendation.run_id, outcome.results[0].run_id);
    assert_eq!(
        recommend(&outcome.results).unwrap().run_id,
        recommendation.run_id
    );

    let runs = store.runs().await.unwrap();
    assert_eq!(runs.len(), 4);
    for run in &runs {
        assert!(run.metrics.is_some());
        assert_eq!(run.model_id, "keyword");
        assert_eq!(store.run_results(run.id).await.unwrap().len(), 2);
    }

    let started = events
        .iter()
        .filter(|e| matches!(e, GridEvent::ConfigStarted { .. }))
        .count();
    let results = events.iter().filter(|e| matches!(e, GridEvent::Result(_))).count();
    assert_eq!(started, 4);
    assert_eq!(results, 4);
    assert!(matches!(events.last(), Some(GridEvent::Complete { results, .. }) if results.len() == 4));
    assert!(!events.iter().any(|e| matches!(e, GridEvent::Error { .. })));
}

#[tokio::test]
async fn config_events_count_up() {
    let (_store, search) = setup(true);
    let (tx, rx) = mpsc::channel(1024);

    search.run(&spec(), tx, CancelToken::new()).await.unwrap();
    let positions: Vec<(usize, usize)> = drain(rx)
        .await
        .into_iter()
        .filter_map(|e| match e {
            GridEvent::ConfigStarted { current, total, .. } => Some((current, total)),
            _ => None,
        })
        .collect();

    assert_eq!(positions, [(1, 4), (2, 4), (3, 4), (4, 4)]);
}

#[tokio::test]
async fn truncated_retrieval_matches_full_vectors() {
    let (_store, search) = setup(true);
    let search = search.with_retrieval(RetrievalMode::Truncated { dims: 2 });
    let (tx, _rx) = mpsc::channel(1024);

    let outcome = search.run(&spec(), tx, CancelToken::new()).await.unwrap();

    assert_eq!(outcome.results.len(), 4);
    assert!(outcome.results.iter().all(|r| r.metrics.hit_at_1 == 1.0));
}

#[tokio::test]
async fn missing_ground_truth_aborts() {
    let (store, search) = setup(false);
    let (tx, rx) = mpsc::channel(1024);

    let err = search.run(&spec(), tx, CancelToken::new()).await.unwrap_err();
    let events = drain(rx).await;

    assert!(matches!(err, Error::NoGroundTruth));
    assert!(matches!(events.last(), Some(GridEvent::Error { .. })));
    assert!(!events.iter().any(|e| matches!(e, GridEvent::Complete { .. })));
    assert!(store.runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_grid_rejected_before_work() {
    let (store, search) = setup(true);
    let (tx, rx) = mpsc::channel(1024);
    let spec = GridSpec {
        chunk_sizes: vec![50],
        overlaps: vec![50],
        strategies: vec![ChunkStrategy::Sentence],
    };

    let err = search.run(&spec, tx, CancelToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::NoValidConfigurations));
    assert!(matches!(drain(rx).await.as_slice(), [GridEvent::Error { .. }]));
    assert!(store.all_chunks().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_before_start_persists_nothing() {
    let (store, search) = setup(true);
    let (tx, rx) = mpsc::channel(1024);
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = search.run(&spec(), tx, cancel).await.unwrap();
    let events = drain(rx).await;

    assert!(outcome.cancelled);
    assert!(outcome.results.is_empty());
    assert!(outcome.recommendation.is_none());
    assert!(!events.iter().any(|e| matches!(e, GridEvent::Complete { .. })));
    assert!(store.runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn dropped_receiver_cancels() {
    let (store, search) = setup(true);
    let (tx, rx) = mpsc::channel(1024);
    drop(rx);

    let outcome = search.run(&spec(), tx, CancelToken::new()).await.unwrap();

    assert!(outcome.cancelled);
    assert!(outcome.results.is_empty());
    assert!(store.runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_after_first_result_keeps_finished_run() {
    let (store, search) = setup(true);
    // Capacity 1: the search cannot run ahead of the consumer
    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancelToken::new();
    let spec = spec();

    let consumer = async {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            if matches!(event, GridEvent::Result(_)) {
                cancel.cancel();
            }
            events.push(event);
        }
        events
    };
    let (outcome, events) = tokio::join!(search.run(&spec, tx, cancel.clone()), consumer);
    let outcome = outcome.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.recommendation.unwrap().run_id, outcome.results[0].run_id);

    let runs = store.runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, outcome.results[0].run_id);
    assert!(runs[0].metrics.is_some());

    let results = events.iter().filter(|e| matches!(e, GridEvent::Result(_))).count();
    assert_eq!(results, 1);
    assert!(!events.iter().any(|e| matches!(e, GridEvent::Complete { .. })));
}

#[tokio::test]
async fn failed_embedding_batch_does_not_stop_the_grid() {
    let (store, search) = setup_with(true, KeywordEmbedder::failing_once());
    let search = search.with_batch_size(1);
    let (tx, rx) = mpsc::channel(1024);

    let outcome = search.run(&spec(), tx, CancelToken::new()).await.unwrap();
    let events = drain(rx).await;

    assert!(!outcome.cancelled);
    assert_eq!(outcome.results.len(), 4);
    assert_eq!(store.runs().await.unwrap().len(), 4);

    // The first configuration lost the "Pets" chunk embedding, so it missed once
    assert_eq!(outcome.results[0].metrics.hit_at_1, 0.5);
    assert!(outcome.results[1..].iter().all(|r| r.metrics.hit_at_1 == 1.0));
    assert_eq!(
        outcome.recommendation.unwrap().config.label(),
        "100t / 30o / sentence"
    );

    let reported = events.iter().any(|e| {
        matches!(e, GridEvent::Progress { message } if message.contains("chunk batch failed"))
    });
    assert!(reported);
    assert!(matches!(events.last(), Some(GridEvent::Complete { .. })));
}
