//! Mode-keyed, persisted vector indexes.
//!
//! Each [`EmbeddingMode`] owns `<base_dir>/<mode>/`, a LanceDB database with a
//! `chunks` table and a `meta` manifest. A build is written to a staging
//! directory next to it and swapped in by rename, so a failed build leaves the
//! previous index untouched. Builds and loads for one mode are serialized.

use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use opsrag_core::data_processor::DataProcessor;
use opsrag_core::traits::Embedder;
use opsrag_core::types::{Chunk, EmbeddingMode};
use opsrag_core::{Error, Result};

use crate::index::{IndexManifest, VectorIndex, FORMAT_VERSION};
use crate::table::{open_db, read_chunks, read_meta, write_meta};
use crate::writer::write_chunks;

/// Inputs per `embed_documents` call during a build.
pub const EMBED_BATCH: usize = 32;

pub struct IndexStore {
    base_dir: PathBuf,
    locks: Mutex<HashMap<EmbeddingMode, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), locks: Mutex::new(HashMap::new()) }
    }

    pub fn base_dir(&self) -> &Path { &self.base_dir }

    pub fn index_path(&self, mode: EmbeddingMode) -> PathBuf { self.base_dir.join(mode.as_str()) }

    pub fn exists(&self, mode: EmbeddingMode) -> bool { self.index_path(mode).is_dir() }

    fn mode_lock(&self, mode: EmbeddingMode) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(mode).or_default().clone()
    }

    /// Persist a fresh index for `mode` from already-embedded chunks, replacing any previous one.
    pub async fn build(
        &self,
        mode: EmbeddingMode,
        embedder: &dyn Embedder,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
        corpus_hash: Option<String>,
    ) -> Result<VectorIndex> {
        let lock = self.mode_lock(mode);
        let _guard = lock.lock().await;
        self.build_locked(mode, embedder, chunks, embeddings, corpus_hash).await
    }

    pub async fn load(&self, mode: EmbeddingMode, embedder: &dyn Embedder) -> Result<VectorIndex> {
        let lock = self.mode_lock(mode);
        let _guard = lock.lock().await;
        self.load_locked(mode, embedder).await
    }

    /// Load the persisted index for `mode`, or ingest `corpus` and build one when
    /// none exists or `force_rebuild` is set. A corrupt index is reported, not replaced.
    pub async fn get_or_build(
        &self,
        mode: EmbeddingMode,
        corpus: &Path,
        processor: &DataProcessor,
        embedder: &dyn Embedder,
        force_rebuild: bool,
    ) -> Result<VectorIndex> {
        let lock = self.mode_lock(mode);
        let _guard = lock.lock().await;
        if self.exists(mode) && !force_rebuild {
            return self.load_locked(mode, embedder).await;
        }
        info!(%mode, corpus = %corpus.display(), force_rebuild, "building index from corpus");
        let text = processor.load_corpus(corpus)?;
        let corpus_hash = blake3::hash(text.as_bytes()).to_hex().to_string();
        let chunks = processor.splitter().split(&text);
        let embeddings = embed_chunks(embedder, &chunks).await?;
        self.build_locked(mode, embedder, chunks, embeddings, Some(corpus_hash)).await
    }

    /// Manifest of the persisted index, without reading vectors.
    pub async fn status(&self, mode: EmbeddingMode) -> Result<IndexManifest> {
        let path = self.index_path(mode);
        if !path.is_dir() {
            return Err(Error::IndexNotFound(mode.to_string()));
        }
        let conn = open_db(&path.to_string_lossy()).await.map_err(|e| Error::IndexCorrupt(format!("{e:#}")))?;
        let meta = read_meta(&conn).await.map_err(|e| Error::IndexCorrupt(format!("{e:#}")))?;
        IndexManifest::from_entries(&meta)
    }

    async fn build_locked(
        &self,
        mode: EmbeddingMode,
        embedder: &dyn Embedder,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
        corpus_hash: Option<String>,
    ) -> Result<VectorIndex> {
        if chunks.len() != embeddings.len() {
            return Err(Error::InvalidConfig(format!("{} chunks but {} embeddings", chunks.len(), embeddings.len())));
        }
        let dim = embedder.dim();
        if let Some((i, v)) = embeddings.iter().enumerate().find(|(_, v)| v.len() != dim) {
            return Err(Error::InvalidConfig(format!("embedding {} has {} dims, {} produces {}", i, v.len(), embedder.id(), dim)));
        }
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            mode,
            embedder_id: embedder.id().to_string(),
            dim,
            chunk_count: chunks.len(),
            corpus_hash,
            built_at: chrono::Utc::now().to_rfc3339(),
        };

        fs::create_dir_all(&self.base_dir).map_err(|e| Error::Storage(format!("{}: {e}", self.base_dir.display())))?;
        self.remove_stale_dirs(mode);
        let staging = self.base_dir.join(format!(".{}.staging-{}", mode, unique_suffix()));
        if let Err(e) = write_staging(&staging, &manifest, &chunks, &embeddings).await {
            let _ = fs::remove_dir_all(&staging);
            return Err(Error::Storage(format!("{e:#}")));
        }
        let target = self.index_path(mode);
        if let Err(e) = self.publish(mode, &staging, &target) {
            let _ = fs::remove_dir_all(&staging);
            return Err(Error::Storage(format!("publishing {}: {e}", target.display())));
        }
        info!(%mode, chunks = manifest.chunk_count, dim, path = %target.display(), "index built");
        VectorIndex::new(manifest, chunks, embeddings)
    }

    async fn load_locked(&self, mode: EmbeddingMode, embedder: &dyn Embedder) -> Result<VectorIndex> {
        let path = self.index_path(mode);
        if !path.is_dir() {
            return Err(Error::IndexNotFound(mode.to_string()));
        }
        let corrupt = |e: anyhow::Error| Error::IndexCorrupt(format!("{}: {e:#}", path.display()));
        let conn = open_db(&path.to_string_lossy()).await.map_err(corrupt)?;
        let manifest = IndexManifest::from_entries(&read_meta(&conn).await.map_err(corrupt)?)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(Error::IndexCorrupt(format!("unsupported format version {}", manifest.format_version)));
        }
        if manifest.mode != mode {
            return Err(Error::IndexCorrupt(format!("directory for '{}' holds an index for '{}'", mode, manifest.mode)));
        }
        if manifest.dim != embedder.dim() || manifest.embedder_id != embedder.id() {
            return Err(Error::IndexCorrupt(format!(
                "index built by {} (d{}) cannot be queried with {} (d{})",
                manifest.embedder_id, manifest.dim, embedder.id(), embedder.dim()
            )));
        }
        let rows = read_chunks(&conn).await.map_err(corrupt)?;
        if rows.len() != manifest.chunk_count {
            return Err(Error::IndexCorrupt(format!("manifest lists {} chunks, found {}", manifest.chunk_count, rows.len())));
        }
        let (chunks, vectors): (Vec<Chunk>, Vec<Vec<f32>>) = rows.into_iter().unzip();
        info!(%mode, chunks = chunks.len(), dim = manifest.dim, "index loaded");
        VectorIndex::new(manifest, chunks, vectors)
    }

    fn publish(&self, mode: EmbeddingMode, staging: &Path, target: &Path) -> std::io::Result<()> {
        if !target.exists() {
            return fs::rename(staging, target);
        }
        let retired = self.base_dir.join(format!(".{}.retired-{}", mode, unique_suffix()));
        fs::rename(target, &retired)?;
        if let Err(e) = fs::rename(staging, target) {
            if let Err(restore) = fs::rename(&retired, target) {
                warn!(retired = %retired.display(), target = %target.display(), error = %restore, "could not restore previous index");
            }
            return Err(e);
        }
        if let Err(e) = fs::remove_dir_all(&retired) {
            warn!(path = %retired.display(), error = %e, "could not remove replaced index");
        }
        Ok(())
    }

    /// Leftovers of interrupted builds for `mode`. Only called while holding the mode lock.
    ///
    /// A retired index is kept while `<mode>/` is missing: it is then the only copy.
    fn remove_stale_dirs(&self, mode: EmbeddingMode) {
        let Ok(entries) = fs::read_dir(&self.base_dir) else { return };
        let mut prefixes = vec![format!(".{}.staging-", mode)];
        if self.exists(mode) {
            prefixes.push(format!(".{}.retired-", mode));
        }
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                debug!(path = %entry.path().display(), "removing stale build directory");
                let _ = fs::remove_dir_all(entry.path());
            }
        }
    }
}

async fn write_staging(staging: &Path, manifest: &IndexManifest, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> anyhow::Result<()> {
    fs::create_dir_all(staging)?;
    let conn = open_db(&staging.to_string_lossy()).await?;
    write_chunks(&conn, chunks, embeddings, manifest.dim).await?;
    write_meta(&conn, &manifest.to_entries()).await?;
    Ok(())
}

/// Embed chunk texts in batches of [`EMBED_BATCH`], with a progress bar.
pub async fn embed_chunks(embedder: &dyn Embedder, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
    let pb = ProgressBar::new(chunks.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}") {
        pb.set_style(style.progress_chars("#>-"));
    }
    let mut embeddings = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_documents(&texts).await?;
        embeddings.extend(vectors);
        pb.inc(batch.len() as u64);
    }
    pb.finish_and_clear();
    debug!(embedder = embedder.id(), chunks = chunks.len(), "embedded chunks");
    Ok(embeddings)
}

fn unique_suffix() -> String {
    let now = chrono::Utc::now();
    now.timestamp_nanos_opt().map_or_else(|| now.timestamp_micros().to_string(), |n| n.to_string())
}
