use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use opsrag_core::chunker::TextSplitter;
use opsrag_core::config::{expand_path, Config, Settings};
use opsrag_core::data_processor::DataProcessor;
use opsrag_core::types::EmbeddingMode;
use opsrag_core::Error;
use opsrag_pipeline::RetrievalPipeline;
use opsrag_vector::{EmbeddingProvider, IndexStore, Retriever};

#[derive(Parser, Debug)]
#[command(name = "opsrag", about = "Build a vector index over a text corpus and answer questions from it")]
struct Cli {
    /// Extra TOML config merged after config.toml and before APP_* env vars
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the index for a mode, building it from the corpus if missing
    Index {
        #[arg(long)]
        mode: Option<EmbeddingMode>,
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Rebuild even when an index exists
        #[arg(long)]
        force: bool,
    },
    /// Print the chunks most similar to a query
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long)]
        mode: Option<EmbeddingMode>,
    },
    /// Answer a question from the indexed corpus
    Ask {
        question: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Show what is stored for one mode, or for all of them
    Status {
        #[arg(long)]
        mode: Option<EmbeddingMode>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn store(settings: &Settings) -> IndexStore {
    IndexStore::new(expand_path(&settings.index.base_dir))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::load_with(cli.config.as_deref()).context("loading configuration")?;
    let mut settings = config.settings()?;

    match cli.command {
        Command::Index { mode, corpus, force } => {
            let mode = mode.unwrap_or(settings.index.mode);
            let corpus = corpus.unwrap_or_else(|| expand_path(&settings.corpus.path));
            let embedder = EmbeddingProvider::from_settings(mode, &settings.embedding)?;
            let processor = DataProcessor::new(TextSplitter::new(settings.corpus.chunk_size, settings.corpus.chunk_overlap)?);
            let store = store(&settings);
            let index = store.get_or_build(mode, &corpus, &processor, &embedder, force).await?;
            let m = index.manifest();
            println!("Index ready: mode={} chunks={} dim={} embedder={}", m.mode, m.chunk_count, m.dim, m.embedder_id);
            println!("Location: {}", store.index_path(mode).display());
        }
        Command::Search { query, k, mode } => {
            let mode = mode.unwrap_or(settings.index.mode);
            let k = k.unwrap_or(settings.retrieval.top_k);
            let embedder = Arc::new(EmbeddingProvider::from_settings(mode, &settings.embedding)?);
            let index = store(&settings).load(mode, embedder.as_ref()).await?;
            let retriever = Retriever::with_index(embedder, index)?;
            let result = retriever.retrieve(&query, k).await?;
            if result.is_empty() {
                println!("No results.");
            }
            for (rank, hit) in result.hits.iter().enumerate() {
                println!("{:>2}. [{:.4}] chunk {}", rank + 1, hit.score, hit.chunk.index);
                println!("    {}", hit.chunk.text.replace('\n', " "));
            }
        }
        Command::Ask { question, k } => {
            if let Some(k) = k {
                settings.retrieval.top_k = k;
            }
            let answer = match RetrievalPipeline::from_settings(&settings, false).await {
                Ok(pipeline) => pipeline.answer(&question).await,
                Err(e) => Err(e),
            };
            match answer {
                Ok(answer) => println!("{}", answer.trim()),
                Err(e) => {
                    debug!(stage = %e.stage, kind = e.kind(), error = %e.cause(), "ask failed");
                    eprintln!("{}", e.user_message());
                    std::process::exit(1);
                }
            }
        }
        Command::Status { mode } => {
            let store = store(&settings);
            let modes: Vec<EmbeddingMode> = mode.map(|m| vec![m]).unwrap_or_else(|| EmbeddingMode::ALL.to_vec());
            for mode in modes {
                match store.status(mode).await {
                    Ok(m) => println!(
                        "{:<7} chunks={} dim={} embedder={} built_at={} corpus={}",
                        mode.as_str(),
                        m.chunk_count,
                        m.dim,
                        m.embedder_id,
                        m.built_at,
                        m.corpus_hash.as_deref().map(|h| &h[..h.len().min(12)]).unwrap_or("-")
                    ),
                    Err(Error::IndexNotFound(_)) => println!("{:<7} not built", mode.as_str()),
                    Err(e) => println!("{:<7} unreadable: {}", mode.as_str(), e),
                }
            }
            info!(base_dir = %store.base_dir().display(), "status done");
        }
    }
    Ok(())
}
