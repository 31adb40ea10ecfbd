//! `cleave` command-line interface.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cleave::{
    chunk_text, CancelToken, ChunkConfig, ChunkStrategy, GridEvent, GridSearch, GridSpec, HttpEmbedder,
    MemoryStore, Provider, RetrievalMode, SemanticChunker, SessionRegistry, Settings,
};

/// Chunk documents and benchmark chunking configurations for retrieval.
#[derive(Parser, Debug)]
#[command(name = "cleave", version, about)]
struct Cli {
    #[command(flatten)]
    provider: ProviderArgs,

    #[command(subcommand)]
    command: Command,
}

/// Embedding provider overrides (defaults come from `CLEAVE_*` variables).
#[derive(clap::Args, Debug)]
struct ProviderArgs {
    /// Provider protocol: ollama or openai
    #[arg(long, global = true)]
    provider: Option<Provider>,

    /// Provider base URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Embedding model name
    #[arg(long, global = true)]
    model: Option<String>,

    /// Embedding dimensions
    #[arg(long, global = true)]
    dimensions: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk a text file and print the chunks as JSON
    Chunk {
        /// UTF-8 text file
        path: PathBuf,

        /// Target chunk size in estimated tokens
        #[arg(long, default_value_t = cleave::DEFAULT_TARGET_TOKENS)]
        target_tokens: usize,

        /// Overlap in estimated tokens
        #[arg(long, default_value_t = cleave::DEFAULT_OVERLAP_TOKENS)]
        overlap_tokens: usize,

        /// sentence, paragraph, recursive, or semantic
        #[arg(long, default_value_t = ChunkStrategy::Sentence)]
        strategy: ChunkStrategy,

        /// Comma-separated character offsets where pages end
        #[arg(long, value_delimiter = ',')]
        page_breaks: Vec<usize>,
    },

    /// Evaluate every configuration of a grid over a corpus, printing one JSON event per line
    GridSearch {
        /// Corpus JSON file (documents and test phrases)
        corpus: PathBuf,

        /// Chunk sizes in tokens
        #[arg(long, value_delimiter = ',', default_values_t = [100, 200, 300, 500])]
        sizes: Vec<usize>,

        /// Overlaps in tokens
        #[arg(long, value_delimiter = ',', default_values_t = [0, 30, 60])]
        overlaps: Vec<usize>,

        /// Strategies to compare
        #[arg(long, value_delimiter = ',', default_values_t = [ChunkStrategy::Sentence])]
        strategies: Vec<ChunkStrategy>,

        /// Results retrieved per phrase (default: CLEAVE_TOP_K)
        #[arg(long)]
        top_k: Option<usize>,

        /// Texts per embedding request (default: CLEAVE_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Retrieve with vectors truncated to this many leading dimensions
        #[arg(long)]
        truncate_dims: Option<usize>,
    },
}

fn settings(args: &ProviderArgs) -> Result<Settings> {
    let mut settings = Settings::from_env().context("failed to read CLEAVE_* settings")?;
    if let Some(provider) = args.provider {
        settings.provider = provider;
    }
    if let Some(url) = &args.url {
        settings.url.clone_from(url);
    }
    if let Some(model) = &args.model {
        settings.model.clone_from(model);
    }
    if let Some(dimensions) = args.dimensions {
        settings.dimensions = dimensions;
    }
    Ok(settings)
}

fn embedder(settings: &Settings) -> Result<Arc<HttpEmbedder>> {
    let model = settings.model_config().context("invalid embedding model settings")?;
    let embedder = HttpEmbedder::new(model, settings.api_key.clone())
        .context("failed to create embedding provider")?;
    Ok(Arc::new(embedder))
}

fn print_json_line(value: &impl serde::Serialize) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

async fn chunk_command(
    args: &ProviderArgs,
    path: PathBuf,
    config: ChunkConfig,
    page_breaks: Vec<usize>,
) -> Result<()> {
    let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;

    let chunks = if config.strategy().needs_embedder() {
        let settings = settings(args)?;
        SemanticChunker::new(embedder(&settings)?)
            .with_batch_size(settings.batch_size)
            .chunk_with_config(&text, &page_breaks, &config)
            .await?
    } else {
        chunk_text(&text, &page_breaks, &config)?
    };

    info!(path = %path.display(), chunks = chunks.len(), config = %config.label(), "chunked");
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, &chunks)?;
    writeln!(out)?;
    Ok(())
}

async fn grid_command(
    settings: Settings,
    corpus: PathBuf,
    spec: GridSpec,
    retrieval: RetrievalMode,
) -> Result<()> {
    let store = Arc::new(
        MemoryStore::load(&corpus).with_context(|| format!("failed to load corpus {}", corpus.display()))?,
    );
    let search = GridSearch::new(store, embedder(&settings)?)
        .with_batch_size(settings.batch_size)
        .with_top_k(settings.top_k)
        .with_retrieval(retrieval);

    let sessions = Arc::new(SessionRegistry::new().with_on_close(|id, token: &CancelToken| {
        warn!(session = id, "cancelling");
        token.cancel();
    }));
    let cancel = CancelToken::new();
    sessions.insert("grid-search", cancel.clone());

    let interrupt = {
        let sessions = Arc::clone(&sessions);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                sessions.close_all();
            }
        })
    };

    let (tx, mut rx) = mpsc::channel::<GridEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = print_json_line(&event) {
                warn!(error = %e, "stdout closed");
                break;
            }
        }
    });

    let outcome = search.run(&spec, tx, cancel).await;
    interrupt.abort();
    printer.await.context("event printer panicked")?;
    sessions.remove("grid-search");

    let outcome = outcome?;
    if outcome.cancelled {
        warn!(completed = outcome.results.len(), "grid search cancelled");
    } else if let Some(best) = &outcome.recommendation {
        info!(config = %best.config.label(), hit_at_1 = best.metrics.hit_at_1, "recommended");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Chunk {
            path,
            target_tokens,
            overlap_tokens,
            strategy,
            page_breaks,
        } => {
            let config = ChunkConfig::new(target_tokens, overlap_tokens, strategy)?;
            chunk_command(&cli.provider, path, config, page_breaks).await
        }
        Command::GridSearch {
            corpus,
            sizes,
            overlaps,
            strategies,
            top_k,
            batch_size,
            truncate_dims,
        } => {
            let mut settings = settings(&cli.provider)?;
            if let Some(top_k) = top_k {
                settings.top_k = top_k;
            }
            if let Some(batch_size) = batch_size {
                settings.batch_size = batch_size;
            }
            let retrieval = truncate_dims.map_or(RetrievalMode::Nearest, |dims| RetrievalMode::Truncated { dims });
            let spec = GridSpec {
                chunk_sizes: sizes,
                overlaps,
                strategies,
            };
            grid_command(settings, corpus, spec, retrieval).await
        }
    }
}
