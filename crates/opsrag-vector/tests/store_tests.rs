use async_trait::async_trait;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use opsrag_core::chunker::TextSplitter;
use opsrag_core::data_processor::DataProcessor;
use opsrag_core::traits::Embedder;
use opsrag_core::types::{Chunk, EmbeddingMode};
use opsrag_core::{Error, Result};
use opsrag_embed::FakeEmbedder;
use opsrag_vector::embed_provider::LocalProvider;
use opsrag_vector::store::embed_chunks;
use opsrag_vector::{IndexStore, Retriever};

fn fake(dim: usize) -> LocalProvider {
    LocalProvider::from_encoder(Box::new(FakeEmbedder::new(dim).unwrap()))
}

fn chunks(texts: &[&str]) -> Vec<Chunk> {
    texts.iter().enumerate().map(|(i, t)| Chunk::new(i, None, *t)).collect()
}

async fn build(store: &IndexStore, embedder: &dyn Embedder, texts: &[&str]) -> opsrag_vector::VectorIndex {
    let chunks = chunks(texts);
    let embeddings = embed_chunks(embedder, &chunks).await.expect("embed");
    store.build(EmbeddingMode::Local, embedder, chunks, embeddings, None).await.expect("build")
}

struct Failing;

#[async_trait]
impl Embedder for Failing {
    fn id(&self) -> &str { "local:hash:d64" }
    fn dim(&self) -> usize { 64 }
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::ProviderUnavailable("model went away".into()))
    }
}

#[tokio::test]
async fn build_then_load_returns_the_same_index() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let embedder = fake(64);
    let built = build(&store, &embedder, &["alpha beta", "gamma delta", "epsilon"]).await;

    let loaded = store.load(EmbeddingMode::Local, &embedder).await.expect("load");
    assert_eq!(loaded.chunks(), built.chunks());
    assert_eq!(loaded.manifest(), built.manifest());
    assert_eq!(loaded.embedder_id(), "local:hash:d64");
    assert_eq!(loaded.dim(), 64);
    assert!(store.index_path(EmbeddingMode::Local).is_dir());
}

#[tokio::test]
async fn query_equal_to_a_chunk_ranks_it_first() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let embedder = fake(128);
    build(&store, &embedder, &["rivers flow to the sea", "mountains are tall and cold", "deserts are dry"]).await;

    let index = store.load(EmbeddingMode::Local, &embedder).await.unwrap();
    let query = embedder.embed_query("mountains are tall and cold").await.unwrap();
    let result = index.search(&query, 3).unwrap();
    assert_eq!(result.hits[0].chunk.index, 1);
    assert!((result.hits[0].score - 1.0).abs() < 1e-4);
    assert!(result.hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn loading_an_unbuilt_mode_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let err = store.load(EmbeddingMode::Local, &fake(16)).await.unwrap_err();
    assert!(matches!(err, Error::IndexNotFound(ref m) if m == "local"), "got {err:?}");
    assert!(matches!(store.status(EmbeddingMode::Ollama).await, Err(Error::IndexNotFound(_))));
}

#[tokio::test]
async fn loading_with_a_different_embedder_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    build(&store, &fake(64), &["alpha", "beta"]).await;

    let err = store.load(EmbeddingMode::Local, &fake(32)).await.unwrap_err();
    assert!(matches!(err, Error::IndexCorrupt(_)), "got {err:?}");
}

#[tokio::test]
async fn directory_without_tables_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    fs::create_dir_all(store.index_path(EmbeddingMode::Local)).unwrap();
    let err = store.load(EmbeddingMode::Local, &fake(16)).await.unwrap_err();
    assert!(matches!(err, Error::IndexCorrupt(_)), "got {err:?}");
}

#[tokio::test]
async fn invalid_build_input_persists_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let embedder = fake(8);

    let err = store
        .build(EmbeddingMode::Local, &embedder, chunks(&["a", "b"]), vec![vec![0.0; 8]], None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));

    let err = store
        .build(EmbeddingMode::Local, &embedder, chunks(&["a"]), vec![vec![0.0; 4]], None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert!(!store.exists(EmbeddingMode::Local));
}

#[tokio::test]
async fn get_or_build_reuses_then_force_rebuilds() {
    let tmp = TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus.txt");
    fs::write(&corpus, "The sky is blue. Grass is green.").unwrap();
    let store = IndexStore::new(tmp.path().join("index"));
    let processor = DataProcessor::new(TextSplitter::new(20, 5).unwrap());
    let embedder = fake(64);

    let first = store.get_or_build(EmbeddingMode::Local, &corpus, &processor, &embedder, false).await.unwrap();
    assert_eq!(first.len(), 2);
    let hash = first.manifest().corpus_hash.clone();
    assert!(hash.is_some());

    fs::write(&corpus, "Snow is white.").unwrap();
    let reused = store.get_or_build(EmbeddingMode::Local, &corpus, &processor, &embedder, false).await.unwrap();
    assert_eq!(reused.chunks(), first.chunks(), "existing index is loaded, corpus not re-read");

    let rebuilt = store.get_or_build(EmbeddingMode::Local, &corpus, &processor, &embedder, true).await.unwrap();
    assert_eq!(rebuilt.len(), 1);
    assert_eq!(rebuilt.chunks()[0].text, "Snow is white.");
    assert_ne!(rebuilt.manifest().corpus_hash, hash);

    let status = store.status(EmbeddingMode::Local).await.unwrap();
    assert_eq!(status.chunk_count, 1);
    let leftovers: Vec<_> = fs::read_dir(store.base_dir()).unwrap().filter_map(|e| e.ok()).filter(|e| e.file_name().to_string_lossy().starts_with('.')).collect();
    assert!(leftovers.is_empty(), "staging directories are cleaned up");
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_index() {
    let tmp = TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus.txt");
    fs::write(&corpus, "Rust compiles to native code.").unwrap();
    let store = IndexStore::new(tmp.path().join("index"));
    let processor = DataProcessor::new(TextSplitter::new(300, 30).unwrap());
    let embedder = fake(64);
    store.get_or_build(EmbeddingMode::Local, &corpus, &processor, &embedder, false).await.unwrap();

    let err = store.get_or_build(EmbeddingMode::Local, &corpus, &processor, &Failing, true).await.unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)));

    let index = store.load(EmbeddingMode::Local, &embedder).await.unwrap();
    assert_eq!(index.chunks()[0].text, "Rust compiles to native code.");
}

#[tokio::test]
async fn modes_are_stored_separately() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    build(&store, &fake(16), &["only local"]).await;
    assert!(store.exists(EmbeddingMode::Local));
    assert!(!store.exists(EmbeddingMode::Ollama));
    assert!(!store.exists(EmbeddingMode::OpenAi));
}

#[tokio::test]
async fn retriever_requires_an_index() {
    let retriever = Retriever::new(Arc::new(fake(32)));
    assert!(!retriever.is_loaded());
    let err = retriever.retrieve("anything", 3).await.unwrap_err();
    assert!(matches!(err, Error::IndexNotLoaded));
}

#[tokio::test]
async fn retriever_ranks_the_sky_chunk_first() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let embedder = Arc::new(fake(256));
    let chunks = TextSplitter::new(20, 5).unwrap().split("The sky is blue. Grass is green.");
    let embeddings = embed_chunks(embedder.as_ref(), &chunks).await.unwrap();
    let index = store.build(EmbeddingMode::Local, embedder.as_ref(), chunks, embeddings, None).await.unwrap();

    let retriever = Retriever::with_index(embedder, index).unwrap();
    let result = retriever.retrieve("What color is the sky?", 1).await.unwrap();
    assert_eq!(result.len(), 1);
    assert!(result.hits[0].chunk.text.contains("sky"));

    assert_eq!(retriever.retrieve("What color is the sky?", 10).await.unwrap().len(), 2);
    assert!(matches!(retriever.retrieve("sky", 0).await, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn retriever_rejects_index_from_another_embedder() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let index = build(&store, &fake(64), &["alpha"]).await;
    let retriever = Retriever::new(Arc::new(fake(32)));
    assert!(matches!(retriever.attach(index), Err(Error::IndexCorrupt(_))));
    assert!(!retriever.is_loaded());
}

fn build_dirs(store: &IndexStore) -> Vec<String> {
    fs::read_dir(store.base_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(".local.staging-") || n.starts_with(".local.retired-"))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rebuilds_of_one_mode_are_serialized() {
    let tmp = TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus.txt");
    let text = "Drain the agent before cleaning its disk. Renew certificates fourteen days early. Shift traffic away from a slow region.";
    fs::write(&corpus, text).unwrap();
    let store = Arc::new(IndexStore::new(tmp.path().join("index")));
    let processor = DataProcessor::new(TextSplitter::new(40, 8).unwrap());
    let embedder = Arc::new(fake(64));
    let expected = processor.splitter().split(text).len();

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let (store, processor, embedder, corpus) = (store.clone(), processor.clone(), embedder.clone(), corpus.clone());
        tasks.push(tokio::spawn(async move {
            store.get_or_build(EmbeddingMode::Local, &corpus, &processor, embedder.as_ref(), true).await
        }));
    }
    for task in tasks {
        let index = task.await.unwrap().expect("every rebuild succeeds");
        assert_eq!(index.len(), expected);
    }

    let loaded = store.load(EmbeddingMode::Local, embedder.as_ref()).await.unwrap();
    assert_eq!(loaded.len(), expected);
    assert_eq!(loaded.manifest().chunk_count, expected);
    assert!(build_dirs(&store).is_empty(), "left behind: {:?}", build_dirs(&store));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retrievals_share_one_snapshot() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let embedder = Arc::new(fake(128));
    let index = build(&store, embedder.as_ref(), &["rivers flow to the sea", "mountains are tall and cold", "deserts are dry"]).await;
    let retriever = Arc::new(Retriever::with_index(embedder, index).unwrap());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let retriever = retriever.clone();
        tasks.push(tokio::spawn(async move { retriever.retrieve("tall cold mountains", 2).await }));
    }
    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.hits[0].chunk.index, 1);
    }
}

#[tokio::test]
async fn retired_index_survives_while_mode_dir_is_missing() {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::new(tmp.path());
    let retired = tmp.path().join(".local.retired-1");
    let staging = tmp.path().join(".local.staging-1");
    fs::create_dir_all(&retired).unwrap();
    fs::create_dir_all(&staging).unwrap();
    fs::write(retired.join("marker"), "previous index").unwrap();

    build(&store, &fake(16), &["first"]).await;
    assert!(retired.join("marker").exists(), "only copy of the previous index is kept");
    assert!(!staging.exists());

    build(&store, &fake(16), &["second"]).await;
    assert!(!retired.exists(), "removed once a current index exists");
}
