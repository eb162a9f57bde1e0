//! Domain types shared by the chunker, the index store and the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A bounded segment of the corpus that is embedded and retrieved as a unit.
///
/// - `index`: position of the chunk in the corpus (0-based, dense)
/// - `offset`: character offset of the first char in the source text, when known
/// - `text`: the payload handed to the embedder and to the prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub offset: Option<usize>,
    pub text: String,
}

impl Chunk {
    pub fn new(index: usize, offset: Option<usize>, text: impl Into<String>) -> Self {
        Self { index, offset, text: text.into() }
    }
}

/// A chunk paired with its similarity to a query. Higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Ranked hits of one retrieval, ordered by descending score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize { self.hits.len() }
    pub fn is_empty(&self) -> bool { self.hits.is_empty() }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.hits.iter().map(|h| &h.chunk)
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.hits.into_iter().map(|h| h.chunk).collect()
    }
}

/// Which embedding backend produced an index. Each mode owns its own on-disk location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    /// In-process model.
    Local,
    /// Self-hosted embedding service (Ollama).
    #[serde(alias = "hosted-self")]
    Ollama,
    /// Third-party hosted API (OpenAI-compatible).
    #[serde(alias = "hosted-api")]
    OpenAi,
}

impl EmbeddingMode {
    pub const ALL: [EmbeddingMode; 3] = [EmbeddingMode::Local, EmbeddingMode::Ollama, EmbeddingMode::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingMode::Local => "local",
            EmbeddingMode::Ollama => "ollama",
            EmbeddingMode::OpenAi => "openai",
        }
    }
}

impl fmt::Display for EmbeddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for EmbeddingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(EmbeddingMode::Local),
            "ollama" | "hosted-self" => Ok(EmbeddingMode::Ollama),
            "openai" | "hosted-api" => Ok(EmbeddingMode::OpenAi),
            other => Err(Error::InvalidConfig(format!("unknown embedding mode '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_labels_and_aliases() {
        assert_eq!("local".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::Local);
        assert_eq!("hosted-self".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::Ollama);
        assert_eq!("OpenAI".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::OpenAi);
        assert!(matches!("faiss".parse::<EmbeddingMode>(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn mode_label_roundtrips_through_display() {
        for mode in EmbeddingMode::ALL {
            assert_eq!(mode.to_string().parse::<EmbeddingMode>().unwrap(), mode);
        }
    }
}
