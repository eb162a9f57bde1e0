use std::sync::{Arc, RwLock};
use tracing::debug;

use opsrag_core::traits::Embedder;
use opsrag_core::types::RetrievalResult;
use opsrag_core::{Error, Result};

use crate::index::VectorIndex;

/// Embeds queries and searches the attached index snapshot.
///
/// The snapshot is swapped as a whole by [`Retriever::attach`]; in-flight
/// retrievals keep the snapshot they started with.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: RwLock<Option<VectorIndex>>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder, index: RwLock::new(None) }
    }

    pub fn with_index(embedder: Arc<dyn Embedder>, index: VectorIndex) -> Result<Self> {
        let retriever = Self::new(embedder);
        retriever.attach(index)?;
        Ok(retriever)
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> { &self.embedder }

    /// Serve `index` from now on. It must have been built by this retriever's embedder.
    pub fn attach(&self, index: VectorIndex) -> Result<()> {
        if index.embedder_id() != self.embedder.id() || index.dim() != self.embedder.dim() {
            return Err(Error::IndexCorrupt(format!(
                "index built by {} (d{}) cannot be queried with {} (d{})",
                index.embedder_id(), index.dim(), self.embedder.id(), self.embedder.dim()
            )));
        }
        *self.index.write().unwrap_or_else(|e| e.into_inner()) = Some(index);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool { self.index.read().unwrap_or_else(|e| e.into_inner()).is_some() }

    pub fn index(&self) -> Option<VectorIndex> { self.index.read().unwrap_or_else(|e| e.into_inner()).clone() }

    /// Up to `k` chunks most similar to `query`, best first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(Error::InvalidConfig("k must be a positive integer".into()));
        }
        let index = self.index().ok_or(Error::IndexNotLoaded)?;
        let query_vec = self.embedder.embed_query(query).await?;
        let result = index.search(&query_vec, k)?;
        debug!(k, hits = result.len(), top = result.hits.first().map(|h| h.score), "retrieved");
        Ok(result)
    }
}
