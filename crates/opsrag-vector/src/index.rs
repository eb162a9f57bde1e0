//! In-memory, read-only snapshot of a persisted index.
//!
//! Vectors are unit-normalised on construction so cosine similarity is a dot
//! product. Search is exact (flat) over all rows: corpora here are small and
//! the snapshot is shared by concurrent readers without locking.

use std::sync::Arc;

use opsrag_core::types::{Chunk, EmbeddingMode, RetrievalResult, ScoredChunk};
use opsrag_core::{Error, Result};

/// Identity recorded with every persisted index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexManifest {
    pub format_version: u32,
    pub mode: EmbeddingMode,
    pub embedder_id: String,
    pub dim: usize,
    pub chunk_count: usize,
    pub corpus_hash: Option<String>,
    pub built_at: String,
}

pub const FORMAT_VERSION: u32 = 1;

impl IndexManifest {
    pub fn to_entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            ("format_version".to_string(), self.format_version.to_string()),
            ("mode".to_string(), self.mode.as_str().to_string()),
            ("embedder_id".to_string(), self.embedder_id.clone()),
            ("dim".to_string(), self.dim.to_string()),
            ("chunk_count".to_string(), self.chunk_count.to_string()),
            ("built_at".to_string(), self.built_at.clone()),
        ];
        if let Some(h) = &self.corpus_hash { entries.push(("corpus_hash".to_string(), h.clone())); }
        entries
    }

    pub fn from_entries(meta: &std::collections::HashMap<String, String>) -> Result<Self> {
        let field = |k: &str| meta.get(k).ok_or_else(|| Error::IndexCorrupt(format!("meta key '{k}' missing")));
        let number = |k: &str| -> Result<usize> {
            field(k)?.parse::<usize>().map_err(|e| Error::IndexCorrupt(format!("meta key '{k}': {e}")))
        };
        let format_version = u32::try_from(number("format_version")?).map_err(|e| Error::IndexCorrupt(e.to_string()))?;
        let mode = field("mode")?.parse::<EmbeddingMode>().map_err(|e| Error::IndexCorrupt(e.to_string()))?;
        Ok(Self {
            format_version,
            mode,
            embedder_id: field("embedder_id")?.clone(),
            dim: number("dim")?,
            chunk_count: number("chunk_count")?,
            corpus_hash: meta.get("corpus_hash").cloned(),
            built_at: field("built_at")?.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: Arc<IndexManifest>,
    chunks: Arc<[Chunk]>,
    vectors: Arc<[Vec<f32>]>,
}

impl VectorIndex {
    /// Every vector must have `manifest.dim` entries.
    pub fn new(manifest: IndexManifest, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(Error::IndexCorrupt(format!("{} chunks but {} vectors", chunks.len(), vectors.len())));
        }
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != manifest.dim) {
            return Err(Error::IndexCorrupt(format!("vector {} has {} dims, index declares {}", i, v.len(), manifest.dim)));
        }
        let vectors: Vec<Vec<f32>> = vectors.into_iter().map(normalize).collect();
        Ok(Self { manifest: Arc::new(manifest), chunks: chunks.into(), vectors: vectors.into() })
    }

    pub fn manifest(&self) -> &IndexManifest { &self.manifest }
    pub fn mode(&self) -> EmbeddingMode { self.manifest.mode }
    pub fn dim(&self) -> usize { self.manifest.dim }
    pub fn embedder_id(&self) -> &str { &self.manifest.embedder_id }
    pub fn len(&self) -> usize { self.chunks.len() }
    pub fn is_empty(&self) -> bool { self.chunks.is_empty() }
    pub fn chunks(&self) -> &[Chunk] { &self.chunks }

    /// Up to `k` chunks by descending cosine similarity; ties go to the lower chunk index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(Error::InvalidConfig("k must be a positive integer".into()));
        }
        if query.len() != self.dim() {
            return Err(Error::IndexCorrupt(format!(
                "query has {} dims but index '{}' was built with {}",
                query.len(), self.manifest.embedder_id, self.dim()
            )));
        }
        let q = normalize(query.to_vec());
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(&q, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(RetrievalResult {
            hits: scored.into_iter().map(|(i, score)| ScoredChunk { chunk: self.chunks[i].clone(), score }).collect(),
        })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 { for x in &mut v { *x /= norm; } }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(dim: usize, n: usize) -> IndexManifest {
        IndexManifest {
            format_version: FORMAT_VERSION,
            mode: EmbeddingMode::Local,
            embedder_id: "local:test:d2".into(),
            dim,
            chunk_count: n,
            corpus_hash: None,
            built_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn index() -> VectorIndex {
        let chunks = vec![Chunk::new(0, Some(0), "east"), Chunk::new(1, Some(4), "north"), Chunk::new(2, Some(9), "north-east")];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 3.0], vec![1.0, 1.0]];
        VectorIndex::new(manifest(2, 3), chunks, vectors).unwrap()
    }

    #[test]
    fn results_are_sorted_and_capped() {
        let r = index().search(&[0.0, 1.0], 2).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r.hits[0].chunk.text, "north");
        assert_eq!(r.hits[1].chunk.text, "north-east");
        assert!(r.hits[0].score >= r.hits[1].score);
        assert!((r.hits[0].score - 1.0).abs() < 1e-6, "magnitude does not matter for cosine");
    }

    #[test]
    fn k_larger_than_index_returns_everything() {
        assert_eq!(index().search(&[1.0, 0.0], 10).unwrap().len(), 3);
    }

    #[test]
    fn ties_prefer_lower_chunk_index() {
        let chunks = vec![Chunk::new(0, None, "a"), Chunk::new(1, None, "b")];
        let idx = VectorIndex::new(manifest(2, 2), chunks, vec![vec![1.0, 0.0], vec![1.0, 0.0]]).unwrap();
        assert_eq!(idx.search(&[1.0, 0.0], 1).unwrap().hits[0].chunk.index, 0);
    }

    #[test]
    fn zero_k_and_wrong_dimension_are_rejected() {
        assert!(matches!(index().search(&[1.0, 0.0], 0), Err(Error::InvalidConfig(_))));
        assert!(matches!(index().search(&[1.0, 0.0, 0.0], 1), Err(Error::IndexCorrupt(_))));
    }

    #[test]
    fn non_finite_vectors_do_not_break_ordering() {
        let chunks = vec![Chunk::new(0, None, "inf"), Chunk::new(1, None, "east"), Chunk::new(2, None, "nan")];
        let vectors = vec![vec![f32::INFINITY, 0.0], vec![1.0, 0.0], vec![f32::NAN, 1.0]];
        let idx = VectorIndex::new(manifest(2, 3), chunks, vectors).unwrap();
        let r = idx.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(r.len(), 3);
        assert!(r.hits.iter().any(|h| h.chunk.text == "east" && (h.score - 1.0).abs() < 1e-6));
    }

    #[test]
    fn mismatched_vector_lengths_are_corrupt() {
        let err = VectorIndex::new(manifest(2, 1), vec![Chunk::new(0, None, "x")], vec![vec![1.0]]).unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt(_)));
    }

    #[test]
    fn manifest_roundtrips_through_meta_entries() {
        let m = manifest(2, 3);
        let map = m.to_entries().into_iter().collect();
        assert_eq!(IndexManifest::from_entries(&map).unwrap(), m);
    }
}
