//! The orchestrator callers talk to: retrieve, then compose.
//!
//! Failures are never retried or papered over. Whatever goes wrong comes back
//! as one [`PipelineError`] naming the stage and carrying the original error.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use opsrag_core::chunker::TextSplitter;
use opsrag_core::config::{expand_path, Settings};
use opsrag_core::data_processor::DataProcessor;
use opsrag_core::traits::{CompletionService, Embedder};
use opsrag_core::types::{EmbeddingMode, RetrievalResult};
use opsrag_core::Error;
use opsrag_llm::CompletionProvider;
use opsrag_vector::{EmbeddingProvider, IndexStore, Retriever, VectorIndex};

use crate::composer::AnswerComposer;

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Wiring providers and loading or building the index.
    Load,
    Retrieve,
    Compose,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Load => "load",
            Stage::Retrieve => "retrieve",
            Stage::Compose => "compose",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("pipeline {stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn new(stage: Stage, source: Error) -> Self { Self { stage, source } }

    pub fn cause(&self) -> &Error { &self.source }

    pub fn kind(&self) -> &'static str { self.source.kind() }

    /// Stable text for end users, one per error kind. Details stay in `source`.
    pub fn user_message(&self) -> &'static str {
        match &self.source {
            Error::InvalidConfig(_) => "The request or configuration is invalid. Check the settings and try again.",
            Error::ProviderUnavailable(_) => "The embedding or language model service is unreachable or misconfigured. Please try again later.",
            Error::IndexNotFound(_) => "No knowledge base has been built yet. Run `opsrag index` first.",
            Error::IndexCorrupt(_) => "The stored knowledge base is unreadable or was built with a different embedding model. Rebuild it with `opsrag index --force`.",
            Error::IndexNotLoaded => "The knowledge base is not loaded yet.",
            Error::Completion(_) => "The language model failed to produce an answer. Please try again later.",
            Error::Storage(_) => "The knowledge base could not be saved.",
            Error::Io(_) => "The document corpus could not be read.",
        }
    }
}

/// Where a pipeline gets its index when none is attached yet.
pub struct IndexLoader {
    store: Arc<IndexStore>,
    mode: EmbeddingMode,
    corpus: PathBuf,
    processor: DataProcessor,
}

impl IndexLoader {
    pub fn new(store: Arc<IndexStore>, mode: EmbeddingMode, corpus: impl Into<PathBuf>, processor: DataProcessor) -> Self {
        Self { store, mode, corpus: corpus.into(), processor }
    }

    pub async fn load(&self, embedder: &dyn Embedder, force_rebuild: bool) -> opsrag_core::Result<VectorIndex> {
        self.store.get_or_build(self.mode, &self.corpus, &self.processor, embedder, force_rebuild).await
    }
}

pub struct RetrievalPipeline {
    retriever: Arc<Retriever>,
    composer: AnswerComposer,
    top_k: usize,
    loader: Option<IndexLoader>,
    load_lock: tokio::sync::Mutex<()>,
}

impl RetrievalPipeline {
    pub fn new(retriever: Arc<Retriever>, composer: AnswerComposer) -> Self {
        Self { retriever, composer, top_k: DEFAULT_TOP_K, loader: None, load_lock: tokio::sync::Mutex::new(()) }
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    /// Load (or build) the index on the first request that finds none attached.
    pub fn with_index_loader(mut self, loader: IndexLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Wire providers, store and composer from `settings` and attach the index now.
    pub async fn from_settings(settings: &Settings, force_rebuild: bool) -> Result<Self, PipelineError> {
        let load = |e| PipelineError::new(Stage::Load, e);
        settings.validate().map_err(load)?;
        let mode = settings.index.mode;
        let embedder = Arc::new(EmbeddingProvider::from_settings(mode, &settings.embedding).map_err(load)?);
        let splitter = TextSplitter::new(settings.corpus.chunk_size, settings.corpus.chunk_overlap).map_err(load)?;
        let loader = IndexLoader::new(
            Arc::new(IndexStore::new(expand_path(&settings.index.base_dir))),
            mode,
            expand_path(&settings.corpus.path),
            DataProcessor::new(splitter),
        );
        let completion: Arc<dyn CompletionService> = Arc::new(CompletionProvider::from_settings(&settings.llm).map_err(load)?);

        let retriever = Arc::new(Retriever::new(embedder.clone()));
        let index = loader.load(embedder.as_ref(), force_rebuild).await.map_err(load)?;
        retriever.attach(index).map_err(load)?;
        info!(%mode, embedder = embedder.id(), completion = completion.name(), "pipeline ready");

        Ok(Self::new(retriever, AnswerComposer::new(completion, settings.retrieval.max_context_chars))
            .with_top_k(settings.retrieval.top_k)
            .with_index_loader(loader))
    }

    pub fn retriever(&self) -> &Arc<Retriever> { &self.retriever }
    pub fn composer(&self) -> &AnswerComposer { &self.composer }
    pub fn top_k(&self) -> usize { self.top_k }

    /// Attach an index through the loader if none is attached. Without a loader this is `IndexNotLoaded`.
    pub async fn ensure_loaded(&self) -> Result<(), PipelineError> {
        if self.retriever.is_loaded() {
            return Ok(());
        }
        let Some(loader) = &self.loader else {
            return Err(PipelineError::new(Stage::Retrieve, Error::IndexNotLoaded));
        };
        let _guard = self.load_lock.lock().await;
        if self.retriever.is_loaded() {
            return Ok(());
        }
        let load = |e| PipelineError::new(Stage::Load, e);
        let index = loader.load(self.retriever.embedder().as_ref(), false).await.map_err(load)?;
        self.retriever.attach(index).map_err(load)
    }

    pub async fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult, PipelineError> {
        self.ensure_loaded().await?;
        self.retriever.retrieve(question, k).await.map_err(|e| PipelineError::new(Stage::Retrieve, e))
    }

    pub async fn answer(&self, question: &str) -> Result<String, PipelineError> {
        self.answer_with_k(question, self.top_k).await
    }

    pub async fn answer_with_k(&self, question: &str, k: usize) -> Result<String, PipelineError> {
        let result = self.retrieve(question, k).await?;
        debug!(k, hits = result.len(), "retrieval done");
        let chunks = result.into_chunks();
        self.composer.compose(question, &chunks).await.map_err(|e| PipelineError::new(Stage::Compose, e))
    }
}
